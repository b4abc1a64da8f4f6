//! # opsql
//!
//! A composable SQL expression builder with a struct row mapper, for PostgreSQL and SQLite.
//!
//! ## Features
//!
//! - **Expressions as values**: columns, operators, functions and sub-selects are small nodes
//!   that emit parameterised SQL for the chosen dialect
//! - **Safe identifiers**: column and alias names outside `[A-Za-z0-9_\-.$]` are refused, never escaped
//! - **Struct mapping**: `#[derive(Model)]` with `#[op("tag,primary,aggregated,nested")]` fields
//! - **Prepared shapes**: compile a statement once, bind `arg(name)` slots per call
//! - **Pagination**: a whitelisted JSON filter language wrapped around any SELECT
//! - **Two adapters**: `tokio-postgres` with a `deadpool` pool, and `rusqlite`
//!
//! ## Building and running
//!
//! ```ignore
//! use opsql::prelude::*;
//! use opsql::expr::{eq, gt};
//! use opsql::stmt::{desc, select};
//!
//! #[derive(Debug, Default, Model)]
//! struct User {
//!     #[op("id,primary")]
//!     id: i64,
//!     #[op("name")]
//!     name: String,
//! }
//!
//! let db = Db::connect(&DbConfig::from_env()?)?;
//!
//! let users: Vec<User> = query(
//!     select(["id", "name"])
//!         .from("users")
//!         .filter(gt("id", 10))
//!         .order_by([desc("id")]),
//! )
//! .get_many(&db)
//! .await?;
//!
//! let mut user = User { name: "ann".into(), ..Default::default() };
//! put("users", &mut user).with(&db).await?;
//! ```
//!
//! ## Emitting only
//!
//! ```ignore
//! let out = compile(&select(["id"]).from("users").filter(eq("id", 1)), &SqlOptions::postgres())?;
//! assert_eq!(out.sql, r#"SELECT "id" FROM "users" WHERE "id" = $1"#);
//! ```

extern crate self as opsql;

pub mod binder;
pub mod client;
pub mod config;
pub mod emit;
pub mod error;
pub mod expr;
pub mod model;
pub mod options;
pub mod paginate;
pub mod prelude;
pub mod prepared;
pub mod stmt;
pub mod value;

pub use binder::{Put, Query, put, query};
pub use client::{Connection, ExecResult, Executor, Row, Rows};
pub use config::DbConfig;
pub use emit::{Emit, Fragment, compile};
pub use error::{BuildError, OrmError, OrmResult, PaginateError};
pub use model::{FieldDef, Model, ModelDetails, describe};
pub use options::SqlOptions;
pub use paginate::{OrderRequest, Page, PageStatements, PaginateRequest, Paginator, PaginatorConfig};
pub use prepared::{Args, ReturnableCache};
pub use stmt::{CounterKind, Returnable};
pub use value::{FromValue, ToValue, Value};

#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub use client::{Db, DbTx};

#[cfg(feature = "postgres")]
pub use client::postgres::{PgDb, PgTx, create_pool, create_pool_with_config};

#[cfg(feature = "sqlite")]
pub use client::sqlite::{SqliteDb, SqliteTx};

#[cfg(feature = "derive")]
pub use opsql_derive::Model;
