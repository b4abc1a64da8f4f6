//! Connection abstraction shared by the PostgreSQL and SQLite adapters.
//!
//! [`Executor`] runs already compiled SQL; [`Connection`] adds transactions. Both
//! adapters return the same [`Rows`], [`Row`] and [`ExecResult`] types, carrying
//! dialect-neutral [`Value`]s.
//!
//! ```ignore
//! use opsql::client::{Connection, Executor};
//!
//! let n = db
//!     .transact(|tx| async move {
//!         let res = tx.exec("DELETE FROM users WHERE id = $1", &[Value::Int(7)]).await?;
//!         Ok(res.rows_affected())
//!     })
//!     .await?;
//! ```

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::error::{OrmError, OrmResult};
use crate::options::SqlOptions;
use crate::value::{FromValue, Value};
use std::future::Future;
use std::sync::Arc;

/// Runs compiled statements.
pub trait Executor: Send + Sync {
    /// Dialect used to compile statements for this connection.
    fn sql_options(&self) -> SqlOptions;

    fn exec(
        &self,
        sql: &str,
        args: &[Value],
    ) -> impl Future<Output = OrmResult<ExecResult>> + Send;

    fn query(&self, sql: &str, args: &[Value]) -> impl Future<Output = OrmResult<Rows>> + Send;

    /// First row of the result.
    ///
    /// - 0 rows: [`OrmError::NotFound`]
    /// - more than one row: the first one
    fn query_row(
        &self,
        sql: &str,
        args: &[Value],
    ) -> impl Future<Output = OrmResult<Row>> + Send {
        async move {
            let mut rows = self.query(sql, args).await?;
            let first = rows.next();
            rows.close()?;
            match first {
                Some((_, row)) => Ok(row),
                None => Err(OrmError::not_found("query returned no rows")),
            }
        }
    }
}

/// A connection that can open transactions.
pub trait Connection: Executor {
    /// Owned transaction handle. Calling `transact` on it reuses the open transaction.
    type Tx: Connection + Clone;

    /// Run `f` inside a READ COMMITTED transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back on `Err`. A failed rollback is
    /// reported together with the original error.
    fn transact<F, Fut, T>(&self, f: F) -> impl Future<Output = OrmResult<T>> + Send
    where
        F: FnOnce(Self::Tx) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send;

    /// Release pooled resources.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Outcome of a statement run through [`Executor::exec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    rows_affected: i64,
    last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: i64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
        }
    }

    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    /// Row id of the last insert. PostgreSQL has none; use RETURNING instead.
    pub fn last_insert_id(&self) -> OrmResult<i64> {
        self.last_insert_id
            .ok_or_else(|| OrmError::Unsupported("last insert id".to_string()))
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.values.get(index)
    }

    /// Decode column `index` into `T`.
    pub fn try_get<T: FromValue>(&self, index: usize) -> OrmResult<T> {
        let column = self
            .columns
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string());
        let value = self
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| OrmError::decode(&column, "column index out of range"))?;
        T::from_value(value).map_err(|err| match err {
            OrmError::Decode { message, .. } => OrmError::decode(column, message),
            other => other,
        })
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

type RowSource = Box<dyn Iterator<Item = OrmResult<Vec<Value>>> + Send>;

/// Forward-only cursor over `(index, Row)` pairs.
///
/// A row that fails to decode stops iteration; the error is then available from
/// [`Rows::err`] and returned by [`Rows::close`].
pub struct Rows {
    columns: Arc<[String]>,
    source: RowSource,
    index: usize,
    err: Option<OrmError>,
}

impl Rows {
    pub fn new(
        columns: impl Into<Arc<[String]>>,
        source: impl Iterator<Item = OrmResult<Vec<Value>>> + Send + 'static,
    ) -> Self {
        Self {
            columns: columns.into(),
            source: Box::new(source),
            index: 0,
            err: None,
        }
    }

    /// Rows that were decoded up front.
    pub fn from_values(columns: impl Into<Arc<[String]>>, rows: Vec<Vec<Value>>) -> Self {
        Self::new(columns, rows.into_iter().map(Ok))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn err(&self) -> Option<&OrmError> {
        self.err.as_ref()
    }

    /// Finish the cursor, reporting a deferred decode error.
    pub fn close(self) -> OrmResult<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Iterator for Rows {
    type Item = (usize, Row);

    fn next(&mut self) -> Option<Self::Item> {
        if self.err.is_some() {
            return None;
        }
        match self.source.next()? {
            Ok(values) => {
                let index = self.index;
                self.index += 1;
                Some((index, Row::new(Arc::clone(&self.columns), values)))
            }
            Err(err) => {
                self.err = Some(err);
                None
            }
        }
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("index", &self.index)
            .field("err", &self.err)
            .finish_non_exhaustive()
    }
}

/// Fail on named slots that were never bound.
pub(crate) fn check_bound(args: &[Value]) -> OrmResult<()> {
    match args.iter().find_map(|arg| match arg {
        Value::ArgRef(name) => Some(name),
        _ => None,
    }) {
        Some(name) => Err(OrmError::UnboundArg(name.clone())),
        None => Ok(()),
    }
}

/// Commit on `Ok`, roll back on `Err`.
pub(crate) async fn settle<T>(
    result: OrmResult<T>,
    commit: impl Future<Output = OrmResult<()>>,
    rollback: impl Future<Output = OrmResult<()>>,
) -> OrmResult<T> {
    match result {
        Ok(value) => {
            commit.await?;
            tracing::debug!(target: "opsql.sql", "transaction committed");
            Ok(value)
        }
        Err(err) => match rollback.await {
            Ok(()) => {
                tracing::debug!(target: "opsql.sql", error = %err, "transaction rolled back");
                Err(err)
            }
            Err(rollback_err) => {
                tracing::warn!(target: "opsql.sql", error = %rollback_err, "rollback failed");
                Err(OrmError::Other(format!(
                    "{err} (rollback failed: {rollback_err})"
                )))
            }
        },
    }
}

/// Either adapter, chosen at runtime from a [`DbConfig`](crate::config::DbConfig).
#[cfg(any(feature = "postgres", feature = "sqlite"))]
#[derive(Clone, Debug)]
pub enum Db {
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteDb),
}

/// Transaction handle of a [`Db`].
#[cfg(any(feature = "postgres", feature = "sqlite"))]
#[derive(Clone, Debug)]
pub enum DbTx {
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgTx),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteTx),
}

macro_rules! dispatch {
    ($enum:ident, $self:expr, $inner:ident => $body:expr) => {
        match $self {
            #[cfg(feature = "postgres")]
            $enum::Postgres($inner) => $body,
            #[cfg(feature = "sqlite")]
            $enum::Sqlite($inner) => $body,
        }
    };
}

macro_rules! impl_executor_dispatch {
    ($enum:ident) => {
        #[cfg(any(feature = "postgres", feature = "sqlite"))]
        impl Executor for $enum {
            fn sql_options(&self) -> SqlOptions {
                dispatch!($enum, self, inner => inner.sql_options())
            }

            async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
                dispatch!($enum, self, inner => inner.exec(sql, args).await)
            }

            async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Rows> {
                dispatch!($enum, self, inner => inner.query(sql, args).await)
            }

            async fn query_row(&self, sql: &str, args: &[Value]) -> OrmResult<Row> {
                dispatch!($enum, self, inner => inner.query_row(sql, args).await)
            }
        }
    };
}

impl_executor_dispatch!(Db);
impl_executor_dispatch!(DbTx);

#[cfg(any(feature = "postgres", feature = "sqlite"))]
impl Connection for Db {
    type Tx = DbTx;

    async fn transact<F, Fut, T>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(Self::Tx) -> Fut + Send,
        Fut: Future<Output = OrmResult<T>> + Send,
        T: Send,
    {
        match self {
            #[cfg(feature = "postgres")]
            Db::Postgres(db) => db.transact(|tx| f(DbTx::Postgres(tx))).await,
            #[cfg(feature = "sqlite")]
            Db::Sqlite(db) => db.transact(|tx| f(DbTx::Sqlite(tx))).await,
        }
    }

    async fn close(&self) {
        dispatch!(Db, self, inner => inner.close().await)
    }
}

#[cfg(any(feature = "postgres", feature = "sqlite"))]
impl Connection for DbTx {
    type Tx = DbTx;

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

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Arc<[String]> {
        vec!["id".to_string(), "name".to_string()].into()
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::new(columns(), vec![Value::Int(1), Value::Text("ann".into())]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("ann".into())));
        assert_eq!(row.try_get::<i64>(0).unwrap(), 1);

        let err = row.try_get::<i64>(1).unwrap_err();
        assert!(matches!(err, OrmError::Decode { ref column, .. } if column == "name"));
        assert!(row.try_get::<i64>(5).is_err());
    }

    #[test]
    fn test_rows_stop_on_decode_error() {
        let source = vec![
            Ok(vec![Value::Int(1), Value::Null]),
            Err(OrmError::decode("name", "bad utf-8")),
            Ok(vec![Value::Int(3), Value::Null]),
        ];
        let mut rows = Rows::new(columns(), source.into_iter());

        let seen: Vec<usize> = rows.by_ref().map(|(i, _)| i).collect();
        assert_eq!(seen, vec![0]);
        assert!(rows.err().is_some());
        assert!(rows.close().is_err());
    }

    #[test]
    fn test_exec_result_last_insert_id() {
        assert_eq!(ExecResult::new(1, Some(9)).last_insert_id().unwrap(), 9);
        let err = ExecResult::new(1, None).last_insert_id().unwrap_err();
        assert_eq!(err.to_string(), "last insert id: unsupported");
    }

    #[test]
    fn test_check_bound() {
        assert!(check_bound(&[Value::Int(1)]).is_ok());
        let err = check_bound(&[Value::ArgRef("id".into())]).unwrap_err();
        assert!(matches!(err, OrmError::UnboundArg(name) if name == "id"));
    }
}
