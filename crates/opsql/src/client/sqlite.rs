//! SQLite adapter over a single `rusqlite::Connection`.
//!
//! Statements run on the blocking thread pool. While a transaction is open the
//! gate is held, so statements from other tasks wait until it finishes.
//! Within the task running `transact`, the `SqliteDb` handle itself routes
//! statements into the open transaction. Spawned tasks do not inherit it.

use super::{Connection, ExecResult, Executor, Rows, check_bound, settle};
use crate::error::{OrmError, OrmResult};
use crate::options::SqlOptions;
use crate::value::Value;
use rusqlite::types::{ToSqlOutput, ValueRef};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Shared = Arc<Mutex<rusqlite::Connection>>;

tokio::task_local! {
    /// Transactions opened by `transact` in the current task, innermost last.
    static ACTIVE: Vec<SqliteTx>;
}

fn active_list() -> Vec<SqliteTx> {
    ACTIVE.try_with(Clone::clone).unwrap_or_default()
}

/// Shared SQLite connection.
#[derive(Clone)]
pub struct SqliteDb {
    conn: Shared,
    gate: Arc<Mutex<()>>,
    options: SqlOptions,
}

impl SqliteDb {
    pub fn new(conn: rusqlite::Connection) -> OrmResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(OrmError::from_sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            gate: Arc::new(Mutex::new(())),
            options: SqlOptions::sqlite(),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> OrmResult<Self> {
        let conn = rusqlite::Connection::open(path).map_err(OrmError::from_sqlite_error)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> OrmResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(OrmError::from_sqlite_error)?;
        Self::new(conn)
    }

    /// Open from a `sqlite:` URL: `sqlite::memory:`, `sqlite:path` or `sqlite://path`.
    pub fn connect(url: &str) -> OrmResult<Self> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| OrmError::Connection(format!("not a sqlite url: {url}")))?;
        match path {
            "" | ":memory:" => Self::open_in_memory(),
            path => Self::open(path),
        }
    }

    /// Override the dialect options used to compile statements.
    pub fn with_options(mut self, options: SqlOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `sql` (one or more statements, no arguments), e.g. a schema script.
    pub async fn execute_batch(&self, sql: &str) -> OrmResult<()> {
        let _gate = match self.active() {
            Some(_) => None,
            None => Some(self.gate.lock().await),
        };
        let sql = sql.to_string();
        blocking(&self.conn, move |conn| {
            conn.execute_batch(&sql).map_err(OrmError::from_sqlite_error)
        })
        .await
    }

    /// The transaction this task has open on this connection, if any.
    fn active(&self) -> Option<SqliteTx> {
        ACTIVE
            .try_with(|list| {
                list.iter()
                    .rev()
                    .find(|tx| Arc::ptr_eq(&tx.conn, &self.conn))
                    .cloned()
            })
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for SqliteDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDb").finish_non_exhaustive()
    }
}

/// Open SQLite transaction. Clones share the transaction; it ends when `transact` returns.
#[derive(Clone)]
pub struct SqliteTx {
    conn: Shared,
    _gate: Arc<OwnedMutexGuard<()>>,
    options: SqlOptions,
}

impl std::fmt::Debug for SqliteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTx").finish_non_exhaustive()
    }
}

/// Run `f` against the connection on the blocking pool.
async fn blocking<R, F>(conn: &Shared, f: F) -> OrmResult<R>
where
    R: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> OrmResult<R> + Send + 'static,
{
    let mut guard = Arc::clone(conn).lock_owned().await;
    tokio::task::spawn_blocking(move || f(&mut *guard))
        .await
        .map_err(|e| OrmError::Other(format!("sqlite task failed: {e}")))?
}

async fn exec_on(conn: &Shared, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
    check_bound(args)?;
    tracing::debug!(target: "opsql.sql", sql, args = args.len(), "exec");

    let sql = sql.to_string();
    let args = args.to_vec();
    blocking(conn, move |conn| {
        let mut stmt = conn.prepare_cached(&sql).map_err(OrmError::from_sqlite_error)?;
        let affected = stmt
            .execute(rusqlite::params_from_iter(args.iter()))
            .map_err(OrmError::from_sqlite_error)?;
        Ok(ExecResult::new(
            i64::try_from(affected).unwrap_or(i64::MAX),
            Some(conn.last_insert_rowid()),
        ))
    })
    .await
}

async fn query_on(conn: &Shared, sql: &str, args: &[Value]) -> OrmResult<Rows> {
    check_bound(args)?;
    tracing::debug!(target: "opsql.sql", sql, args = args.len(), "query");

    let sql = sql.to_string();
    let args = args.to_vec();
    let (columns, rows) = blocking(conn, move |conn| {
        let mut stmt = conn.prepare_cached(&sql).map_err(OrmError::from_sqlite_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut cursor = stmt
            .query(rusqlite::params_from_iter(args.iter()))
            .map_err(OrmError::from_sqlite_error)?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().map_err(OrmError::from_sqlite_error)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value = row.get_ref(i).map_err(OrmError::from_sqlite_error)?;
                values.push(value_from_ref(value).map_err(|e| OrmError::decode(&columns[i], e))?);
            }
            rows.push(values);
        }
        Ok((columns, rows))
    })
    .await?;

    Ok(Rows::from_values(columns, rows))
}

impl Executor for SqliteDb {
    fn sql_options(&self) -> SqlOptions {
        self.options
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        if let Some(tx) = self.active() {
            return tx.exec(sql, args).await;
        }
        let _gate = self.gate.lock().await;
        exec_on(&self.conn, sql, args).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Rows> {
        if let Some(tx) = self.active() {
            return tx.query(sql, args).await;
        }
        let _gate = self.gate.lock().await;
        query_on(&self.conn, sql, args).await
    }
}

async fn batch_on(conn: &Shared, sql: &'static str) -> OrmResult<()> {
    blocking(conn, move |conn| {
        conn.execute_batch(sql).map_err(OrmError::from_sqlite_error)
    })
    .await
}

/// Rolls back a transaction whose future was dropped before commit or rollback.
///
/// The gate stays held until the rollback has run.
struct OpenTx {
    conn: Option<Shared>,
    gate: Arc<OwnedMutexGuard<()>>,
}

impl OpenTx {
    fn finish(mut self) {
        self.conn = None;
    }
}

fn rollback_open(conn: &mut rusqlite::Connection) -> OrmResult<()> {
    if conn.is_autocommit() {
        return Ok(());
    }
    conn.execute_batch("ROLLBACK")
        .map_err(OrmError::from_sqlite_error)
}

impl Drop for OpenTx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        tracing::warn!(target: "opsql.sql", "transaction dropped unfinished, rolling back");
        let gate = Arc::clone(&self.gate);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = blocking(&conn, rollback_open).await {
                        tracing::warn!(target: "opsql.sql", error = %err, "rollback failed");
                    }
                    drop(gate);
                });
            }
            Err(_) => match conn.try_lock() {
                Ok(mut conn) => {
                    if let Err(err) = rollback_open(&mut conn) {
                        tracing::warn!(target: "opsql.sql", error = %err, "rollback failed");
                    }
                }
                Err(_) => {
                    tracing::warn!(target: "opsql.sql", "connection busy, rollback deferred");
                }
            },
        }
    }
}

impl Connection for SqliteDb {
    type Tx = SqliteTx;

    /// Open a transaction, or join the one this task already has open here.
    async fn transact<F, Fut, T>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(Self::Tx) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        if let Some(tx) = self.active() {
            return f(tx).await;
        }

        let gate = Arc::new(Arc::clone(&self.gate).lock_owned().await);
        let guard = OpenTx {
            conn: Some(Arc::clone(&self.conn)),
            gate: Arc::clone(&gate),
        };

        // Deferred rollbacks from a runtime-less drop are finished here.
        let begin = blocking(&self.conn, |conn| {
            if !conn.is_autocommit() {
                tracing::warn!(target: "opsql.sql", "rolling back abandoned transaction");
                rollback_open(conn)?;
            }
            conn.execute_batch("BEGIN").map_err(OrmError::from_sqlite_error)
        })
        .await;
        if let Err(err) = begin {
            guard.finish();
            return Err(err);
        }
        tracing::debug!(target: "opsql.sql", "transaction begin");

        let tx = SqliteTx {
            conn: Arc::clone(&self.conn),
            _gate: Arc::clone(&gate),
            options: self.options,
        };
        let mut active = active_list();
        active.push(tx.clone());

        let result = settle(
            ACTIVE.scope(active, f(tx)).await,
            batch_on(&self.conn, "COMMIT"),
            batch_on(&self.conn, "ROLLBACK"),
        )
        .await;
        if result.is_err() {
            // A failed COMMIT leaves the transaction open.
            if let Err(err) = blocking(&self.conn, rollback_open).await {
                tracing::warn!(target: "opsql.sql", error = %err, "rollback failed");
            }
        }
        guard.finish();
        drop(gate);
        result
    }

    async fn close(&self) {
        tracing::debug!(target: "opsql.sql", "sqlite connection released");
    }
}

impl Executor for SqliteTx {
    fn sql_options(&self) -> SqlOptions {
        self.options
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        exec_on(&self.conn, sql, args).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Rows> {
        query_on(&self.conn, sql, args).await
    }
}

impl Connection for SqliteTx {
    type Tx = SqliteTx;

    async fn transact<F, Fut, T>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(Self::Tx) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        f(self.clone()).await
    }

    async fn close(&self) {}
}

fn value_from_ref(value: ValueRef<'_>) -> Result<Value, String> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(text) => Value::Text(
            std::str::from_utf8(text)
                .map_err(|e| e.to_string())?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    })
}

/// SQLite has no native bool, uuid, json or timestamp: those bind as integers and text.
impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;

        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(v) => ToSqlOutput::Owned(Sql::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(Sql::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(Sql::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Json(v) => ToSqlOutput::Owned(Sql::Text(v.to_string())),
            Value::Uuid(v) => ToSqlOutput::Owned(Sql::Text(v.to_string())),
            Value::Timestamp(v) => ToSqlOutput::Owned(Sql::Text(v.to_rfc3339())),
            Value::ArgRef(name) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(Box::new(
                    OrmError::UnboundArg(name.clone()),
                )));
            }
        })
    }
}

impl rusqlite::types::FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        value_from_ref(value).map_err(|e| rusqlite::types::FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FromValue;
    use std::time::Duration;

    async fn names(db: &SqliteDb) -> Vec<String> {
        db.query("SELECT name FROM items ORDER BY id", &[])
            .await
            .unwrap()
            .map(|(_, row)| row.try_get::<String>(0).unwrap())
            .collect()
    }

    async fn db() -> SqliteDb {
        let db = SqliteDb::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, flag INTEGER)")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_exec_and_query() {
        let db = db().await;
        let res = db
            .exec(
                "INSERT INTO items (name, flag) VALUES ($1, $2)",
                &[Value::Text("a".into()), Value::Bool(true)],
            )
            .await
            .unwrap();
        assert_eq!(res.rows_affected(), 1);
        assert_eq!(res.last_insert_id().unwrap(), 1);

        let row = db
            .query_row("SELECT id, name, flag FROM items WHERE id = $1", &[Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(row.columns(), ["id", "name", "flag"]);
        assert_eq!(row.try_get::<String>(1).unwrap(), "a");
        assert!(bool::from_value(row.get(2).cloned().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_query_row_not_found() {
        let db = db().await;
        let err = db
            .query_row("SELECT id FROM items WHERE id = $1", &[Value::Int(42)])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_transact_commit_and_rollback() {
        let db = db().await;

        db.transact(|tx| async move {
            tx.exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("kept".into())])
                .await?;
            Ok(())
        })
        .await
        .unwrap();

        let err = db
            .transact(|tx| async move {
                tx.exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("lost".into())])
                    .await?;
                Err::<(), _>(OrmError::Other("boom".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");

        assert_eq!(names(&db).await, vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_transact_rolls_back() {
        let db = db().await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            db.transact(|tx| async move {
                tx.exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("lost".into())])
                    .await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        )
        .await;
        assert!(cancelled.is_err());

        db.exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("autocommit".into())])
            .await
            .unwrap();
        db.transact(|_tx| async { Ok(()) }).await.unwrap();

        assert_eq!(names(&db).await, vec!["autocommit".to_string()]);
    }

    #[tokio::test]
    async fn test_db_handle_joins_open_transaction() {
        let db = db().await;
        let handle = db.clone();

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            db.transact(|_tx| async move {
                handle
                    .exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("inner".into())])
                    .await?;
                handle
                    .transact(|tx| async move {
                        tx.exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("nested".into())])
                            .await?;
                        Ok(())
                    })
                    .await?;
                let seen = handle
                    .query_row("SELECT COUNT(*) FROM items", &[])
                    .await?
                    .try_get::<i64>(0)?;
                assert_eq!(seen, 2);
                Err::<(), _>(OrmError::Other("undo".into()))
            }),
        )
        .await
        .expect("statements inside transact must not wait on the gate")
        .unwrap_err();
        assert_eq!(err.to_string(), "undo");

        assert!(names(&db).await.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_task_waits_for_transaction() {
        let db = db().await;
        let other = db.clone();

        db.transact(|tx| async move {
            tx.exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("first".into())])
                .await?;
            let waiting = tokio::spawn(async move {
                other
                    .exec("INSERT INTO items (name) VALUES ($1)", &[Value::Text("second".into())])
                    .await
            });
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(!waiting.is_finished());
            Ok(())
        })
        .await
        .unwrap();

        // The spawned insert lands once the gate is released.
        tokio::time::timeout(Duration::from_secs(2), async {
            while names(&db).await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(names(&db).await, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_unbound_arg_is_rejected() {
        let db = db().await;
        let err = db
            .exec("DELETE FROM items WHERE id = $1", &[Value::ArgRef("id".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::UnboundArg(_)));
    }

    #[test]
    fn test_connect_urls() {
        assert!(SqliteDb::connect("sqlite::memory:").is_ok());
        assert!(matches!(
            SqliteDb::connect("mysql://localhost").unwrap_err(),
            OrmError::Connection(_)
        ));
    }
}
