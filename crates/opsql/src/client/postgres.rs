//! PostgreSQL adapter over a `deadpool_postgres` pool.
//!
//! Within the task running `transact`, the `PgDb` handle routes statements to
//! the transaction's connection instead of a fresh pooled one. Spawned tasks
//! do not inherit the transaction.

use super::{Connection, ExecResult, Executor, Rows, check_bound, settle};
use crate::error::{OrmError, OrmResult};
use crate::options::SqlOptions;
use crate::value::Value;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolBuilder, RecyclingMethod};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{NoTls, Socket};

const DEFAULT_MAX_SIZE: usize = 16;

tokio::task_local! {
    /// Transactions opened by `transact` in the current task, innermost last.
    static ACTIVE: Vec<PgTx>;
}

/// Create a connection pool from a database URL.
///
/// Uses `NoTls`. For TLS use [`create_pool_with_tls`].
pub fn create_pool(database_url: &str) -> OrmResult<Pool> {
    create_pool_with_config(database_url, DEFAULT_MAX_SIZE)
}

/// Create a connection pool with at most `max_size` connections.
pub fn create_pool_with_config(database_url: &str, max_size: usize) -> OrmResult<Pool> {
    create_pool_with_manager_config(database_url, NoTls, default_manager_config(), |builder| {
        builder.max_size(max_size)
    })
}

/// Create a connection pool using a custom TLS connector.
pub fn create_pool_with_tls<T>(database_url: &str, tls: T, max_size: usize) -> OrmResult<Pool>
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    create_pool_with_manager_config(database_url, tls, default_manager_config(), |builder| {
        builder.max_size(max_size)
    })
}

/// Create a connection pool with an explicit `ManagerConfig` and `PoolBuilder` hook.
pub fn create_pool_with_manager_config<T>(
    database_url: &str,
    tls: T,
    manager_config: ManagerConfig,
    configure_pool: impl FnOnce(PoolBuilder) -> PoolBuilder,
) -> OrmResult<Pool>
where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: Sync + Send,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| OrmError::Connection(e.to_string()))?;

    let mgr = Manager::from_config(pg_config, tls, manager_config);
    configure_pool(Pool::builder(mgr))
        .build()
        .map_err(|e| OrmError::Pool(e.to_string()))
}

fn default_manager_config() -> ManagerConfig {
    ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    }
}

/// Pooled PostgreSQL connection.
#[derive(Clone)]
pub struct PgDb {
    pool: Pool,
    /// Shared by clones; tells this handle's transactions apart from others.
    scope: Arc<()>,
    options: SqlOptions,
}

impl PgDb {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            scope: Arc::new(()),
            options: SqlOptions::postgres(),
        }
    }

    pub fn connect(database_url: &str, max_size: usize) -> OrmResult<Self> {
        Ok(Self::new(create_pool_with_config(database_url, max_size)?))
    }

    /// Override the dialect options used to compile statements.
    pub fn with_options(mut self, options: SqlOptions) -> Self {
        self.options = options;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The transaction this task has open through this handle, if any.
    fn active(&self) -> Option<PgTx> {
        ACTIVE
            .try_with(|list| {
                list.iter()
                    .rev()
                    .find(|tx| Arc::ptr_eq(&tx.scope, &self.scope))
                    .cloned()
            })
            .ok()
            .flatten()
    }
}

impl std::fmt::Debug for PgDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDb")
            .field("status", &self.pool.status())
            .finish()
    }
}

/// Open PostgreSQL transaction. Clones share the same connection.
#[derive(Clone)]
pub struct PgTx {
    client: Arc<Object>,
    scope: Arc<()>,
    options: SqlOptions,
}

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTx").finish_non_exhaustive()
    }
}

fn params(args: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    args.iter().map(|arg| arg as &(dyn ToSql + Sync)).collect()
}

async fn exec_on(client: &tokio_postgres::Client, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
    check_bound(args)?;
    tracing::debug!(target: "opsql.sql", sql, args = args.len(), "exec");

    let affected = client
        .execute(sql, &params(args))
        .await
        .map_err(OrmError::from_db_error)?;
    Ok(ExecResult::new(
        i64::try_from(affected).unwrap_or(i64::MAX),
        None,
    ))
}

async fn query_on(client: &tokio_postgres::Client, sql: &str, args: &[Value]) -> OrmResult<Rows> {
    check_bound(args)?;
    tracing::debug!(target: "opsql.sql", sql, args = args.len(), "query");

    let stmt = client.prepare(sql).await.map_err(OrmError::from_db_error)?;
    let rows = client
        .query(&stmt, &params(args))
        .await
        .map_err(OrmError::from_db_error)?;

    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
    Ok(Rows::new(columns, rows.into_iter().map(|row| decode_row(&row))))
}

async fn batch_on(client: &tokio_postgres::Client, sql: &str) -> OrmResult<()> {
    client
        .batch_execute(sql)
        .await
        .map_err(OrmError::from_db_error)
}

impl Executor for PgDb {
    fn sql_options(&self) -> SqlOptions {
        self.options
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        if let Some(tx) = self.active() {
            return tx.exec(sql, args).await;
        }
        let client = self.pool.get().await?;
        exec_on(&client, sql, args).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Rows> {
        if let Some(tx) = self.active() {
            return tx.query(sql, args).await;
        }
        let client = self.pool.get().await?;
        query_on(&client, sql, args).await
    }
}

/// Rolls back a transaction whose future was dropped before commit or rollback.
struct OpenTx(Option<Arc<Object>>);

impl OpenTx {
    fn finish(mut self) {
        self.0 = None;
    }
}

impl Drop for OpenTx {
    fn drop(&mut self) {
        let Some(client) = self.0.take() else {
            return;
        };
        tracing::warn!(target: "opsql.sql", "transaction dropped unfinished, rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = batch_on(&client, "ROLLBACK").await {
                        tracing::warn!(target: "opsql.sql", error = %err, "rollback failed");
                    }
                });
            }
            Err(_) => {
                if let Ok(object) = Arc::try_unwrap(client) {
                    drop(Object::take(object));
                }
            }
        }
    }
}

impl Connection for PgDb {
    type Tx = PgTx;

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

        let client = Arc::new(self.pool.get().await?);
        batch_on(&client, "BEGIN ISOLATION LEVEL READ COMMITTED").await?;
        tracing::debug!(target: "opsql.sql", "transaction begin");

        let guard = OpenTx(Some(Arc::clone(&client)));
        let tx = PgTx {
            client: Arc::clone(&client),
            scope: Arc::clone(&self.scope),
            options: self.options,
        };
        let mut active = ACTIVE.try_with(Clone::clone).unwrap_or_default();
        active.push(tx.clone());

        let result = settle(
            ACTIVE.scope(active, f(tx)).await,
            batch_on(&client, "COMMIT"),
            batch_on(&client, "ROLLBACK"),
        )
        .await;
        guard.finish();
        result
    }

    async fn close(&self) {
        tracing::debug!(target: "opsql.sql", "closing pool");
        self.pool.close();
    }
}

impl Executor for PgTx {
    fn sql_options(&self) -> SqlOptions {
        self.options
    }

    async fn exec(&self, sql: &str, args: &[Value]) -> OrmResult<ExecResult> {
        exec_on(&self.client, sql, args).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> OrmResult<Rows> {
        query_on(&self.client, sql, args).await
    }
}

impl Connection for PgTx {
    type Tx = PgTx;

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

type BoxError = Box<dyn Error + Sync + Send>;

/// Values adapt to the parameter type PostgreSQL inferred for each placeholder.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*v).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*v).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(v) => match *ty {
                Type::UUID => uuid::Uuid::parse_str(v)?.to_sql(ty, out),
                Type::INT2 => v.parse::<i16>()?.to_sql(ty, out),
                Type::INT4 => v.parse::<i32>()?.to_sql(ty, out),
                Type::INT8 => v.parse::<i64>()?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::String(v.clone()).to_sql(ty, out),
                Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(v)?.with_timezone(&Utc).to_sql(ty, out),
                Type::DATE => v.parse::<NaiveDate>()?.to_sql(ty, out),
                _ => v.as_str().to_sql(ty, out),
            },
            Value::Bytes(v) => v.as_slice().to_sql(ty, out),
            Value::Json(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Uuid(v) => match *ty {
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                Type::DATE => v.date_naive().to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_rfc3339().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::ArgRef(name) => Err(Box::new(OrmError::UnboundArg(name.clone()))),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Decode every column of `row` by its PostgreSQL type.
pub fn decode_row(row: &tokio_postgres::Row) -> OrmResult<Vec<Value>> {
    (0..row.len()).map(|i| decode_column(row, i)).collect()
}

fn decode_column(row: &tokio_postgres::Row, index: usize) -> OrmResult<Value> {
    let column = &row.columns()[index];
    let name = column.name();
    let ty = column.type_();

    let decoded = match *ty {
        Type::BOOL => get::<bool>(row, index, name)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, index, name)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, index, name)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, index, name)?.map(Value::Int),
        Type::OID => get::<u32>(row, index, name)?.map(|v| Value::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, index, name)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, index, name)?.map(Value::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, index, name)?.map(Value::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, index, name)?.map(Value::Bytes),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, index, name)?.map(Value::Json),
        Type::UUID => get::<uuid::Uuid>(row, index, name)?.map(Value::Uuid),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, index, name)?.map(Value::Timestamp),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, index, name)?.map(|v| Value::Timestamp(v.and_utc())),
        Type::DATE => get::<NaiveDate>(row, index, name)?.map(|v| Value::Text(v.to_string())),
        _ => return Err(OrmError::UnsupportedType(format!("{} (column {name})", ty.name()))),
    };
    Ok(decoded.unwrap_or(Value::Null))
}

fn get<'a, T>(row: &'a tokio_postgres::Row, index: usize, name: &str) -> OrmResult<Option<T>>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(index)
        .map_err(|e| OrmError::decode(name, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Result<Vec<u8>, BoxError> {
        let mut out = BytesMut::new();
        match value.to_sql_checked(ty, &mut out)? {
            IsNull::Yes => Ok(Vec::new()),
            IsNull::No => Ok(out.to_vec()),
        }
    }

    #[test]
    fn test_int_narrows_to_parameter_type() {
        assert_eq!(encode(&Value::Int(7), &Type::INT4).unwrap(), 7i32.to_be_bytes());
        assert_eq!(encode(&Value::Int(7), &Type::INT8).unwrap(), 7i64.to_be_bytes());
        assert!(encode(&Value::Int(i64::MAX), &Type::INT2).is_err());
    }

    #[test]
    fn test_text_coerces_to_uuid() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            encode(&Value::Text(id.to_string()), &Type::UUID).unwrap(),
            id.as_bytes()
        );
    }

    #[test]
    fn test_null_and_unbound() {
        assert!(encode(&Value::Null, &Type::TEXT).unwrap().is_empty());
        let err = encode(&Value::ArgRef("id".into()), &Type::INT8).unwrap_err();
        assert_eq!(err.to_string(), "argument \"id\" is not bound");
    }

    #[test]
    fn test_bad_url_is_connection_error() {
        let err = create_pool("postgres://user@localhost:notaport/db").unwrap_err();
        assert!(matches!(err, OrmError::Connection(_)));
    }
}
