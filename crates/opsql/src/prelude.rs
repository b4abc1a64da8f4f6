//! Common imports:
//!
//! ```ignore
//! use opsql::prelude::*;
//! ```

pub use crate::{
    Args, Connection, DbConfig, Executor, FromValue, Model, OrmError, OrmResult, PaginateRequest,
    Paginator, SqlOptions, ToValue, Value, compile, put, query,
};

#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub use crate::Db;
