//! Error types for opsql

use thiserror::Error;

/// Result type alias for opsql operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Errors raised while assembling or emitting SQL.
///
/// Builders keep the first one they hit and report it when emitted, so this type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Identifier contains a character outside `[A-Za-z0-9_\-.$]`.
    #[error("{kind} \"{input}\" contains illegal character '{ch}'")]
    IllegalCharacter {
        kind: &'static str,
        input: String,
        ch: char,
    },

    /// A join other than CROSS JOIN without an ON predicate.
    #[error("{0} operation requires an ON clause to specify join condition")]
    MissingOnClause(&'static str),

    #[error("{0}: fields is empty")]
    EmptyFields(&'static str),

    #[error("insert: no insert values")]
    NoInsertValues,

    /// `values`/`columns` called on a single-row insert.
    #[error("Values/Columns available only for InsertMany")]
    InsertManyOnly,

    /// `set` called on a multi-row insert.
    #[error("Set available only for single-row Insert")]
    SingleInsertOnly,

    /// An operator got the wrong number of right-hand operands.
    #[error("{op} expects {expected} operands, got {got}")]
    OperandCount {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("cast format is not described in sql options")]
    CastFormatMissing,

    /// Bound argument count differs from the number of named slots.
    #[error("incorrect argument count")]
    ArgCount,

    #[error("no such arg \"{0}\" inside container")]
    UnknownArg(String),
}

/// Errors raised while parsing a paginate request.
#[derive(Debug, Error)]
pub enum PaginateError {
    #[error("invalid value: \"{0}\": filter invalid")]
    FilterInvalid(String),

    #[error("\"{0}\" is not allowed: disallowed key")]
    DisallowedKey(String),

    #[error("filter depth exceeded, max depth {0}")]
    DepthExceeded(usize),

    #[error("\"{0}\" value is too long: filter array length exceeded")]
    ArrayTooLong(String),

    #[error("target \"{0}\" is not allowed")]
    OrderNotAllowed(String),

    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// SQL assembly error
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Paginate request rejected
    #[error("paginate: {0}")]
    Paginate(#[from] PaginateError),

    /// Key passed to a model lookup has no setter
    #[error("key \"{key}\" is not described in {type_name}")]
    KeyNotDescribed { key: String, type_name: String },

    /// Returning target cannot be mapped onto the model
    #[error("\"{target}\": target is not described in the struct {type_name}")]
    TargetNotDescribed { target: String, type_name: String },

    /// Returning target maps onto more than one table of the model
    #[error("\"{0}\": target is ambiguous")]
    AmbiguousTarget(String),

    #[error("no primary key for model {0}")]
    NoPrimaryKey(String),

    /// A named argument reached the driver without being bound
    #[error("argument \"{0}\" is not bound")]
    UnboundArg(String),

    /// Operation not supported by the current driver
    #[error("{0}: unsupported")]
    Unsupported(String),

    /// Column type the adapter cannot decode
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// PostgreSQL query execution error
    #[cfg(feature = "postgres")]
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// SQLite execution error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Pool error
    #[cfg(feature = "postgres")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub(crate) fn key_not_described(key: impl Into<String>, type_name: &str) -> Self {
        Self::KeyNotDescribed {
            key: key.into(),
            type_name: type_name.to_string(),
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    #[cfg(feature = "postgres")]
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{constraint}: {message}")),
                "23503" => return Self::ForeignKeyViolation(format!("{constraint}: {message}")),
                "23514" => return Self::CheckViolation(format!("{constraint}: {message}")),
                _ => {}
            }
        }
        Self::Query(err)
    }

    /// Map a rusqlite error, splitting out constraint failures
    #[cfg(feature = "sqlite")]
    pub fn from_sqlite_error(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;

        let constraint = match &err {
            rusqlite::Error::QueryReturnedNoRows => {
                return Self::not_found("query returned no rows");
            }
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                let message = message.clone().unwrap_or_else(|| code.to_string());
                Some((code.extended_code, message))
            }
            _ => None,
        };

        match constraint {
            Some((rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE, message))
            | Some((rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY, message)) => {
                Self::UniqueViolation(message)
            }
            Some((rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY, message)) => {
                Self::ForeignKeyViolation(message)
            }
            Some((rusqlite::ffi::SQLITE_CONSTRAINT_CHECK, message)) => Self::CheckViolation(message),
            _ => Self::Sqlite(err),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
