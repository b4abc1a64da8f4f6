//! Database configuration.

use crate::error::{OrmError, OrmResult};
use serde::Deserialize;

const DEFAULT_MAX_CONNECTIONS: usize = 16;

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// Where to connect and how many pooled connections to keep.
///
/// `url` selects the adapter: `postgres://` / `postgresql://` or `sqlite:`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Read `DATABASE_URL` and the optional `OPSQL_MAX_CONNECTIONS`.
    pub fn from_env() -> OrmResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| OrmError::Connection("DATABASE_URL is not set".into()))?;

        let max_connections = match std::env::var("OPSQL_MAX_CONNECTIONS") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                OrmError::Connection(format!("OPSQL_MAX_CONNECTIONS is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            url,
            max_connections,
        })
    }

    pub fn backend(&self) -> OrmResult<Backend> {
        let url = self.url.as_str();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else {
            Err(OrmError::Connection(format!(
                "unsupported database url scheme: {url}"
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

#[cfg(any(feature = "postgres", feature = "sqlite"))]
impl crate::client::Db {
    /// Open the adapter matching `config.url`. Pools connect lazily.
    pub fn connect(config: &DbConfig) -> OrmResult<Self> {
        match config.backend()? {
            #[cfg(feature = "postgres")]
            Backend::Postgres => Ok(Self::Postgres(crate::client::postgres::PgDb::connect(
                &config.url,
                config.max_connections,
            )?)),
            #[cfg(feature = "sqlite")]
            Backend::Sqlite => Ok(Self::Sqlite(crate::client::sqlite::SqliteDb::connect(
                &config.url,
            )?)),
            #[allow(unreachable_patterns)]
            backend => Err(OrmError::Unsupported(format!("{backend:?} backend"))),
        }
    }
}
