/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Database connection management supporting both PostgreSQL and SQLite.
//!
//! This module provides an async connection pool built on `deadpool-diesel`.
//! The backend is detected at runtime from the connection string, so the same
//! binary can run a single-node install on a local SQLite file or a larger
//! deployment against PostgreSQL.
//!
//! # Example
//!
//! ```rust,ignore
//! use homefleet::database::Database;
//!
//! // SQLite file next to the binary
//! let db = Database::new("sqlite://./homefleet.db", 1)?;
//! db.run_migrations().await?;
//! ```

use tracing::info;

#[cfg(feature = "postgres")]
use deadpool_diesel::postgres::{Manager as PgManager, Pool as PgPool, Runtime as PgRuntime};
#[cfg(feature = "sqlite")]
use deadpool_diesel::sqlite::{
    Manager as SqliteManager, Pool as SqlitePool, Runtime as SqliteRuntime,
};

use crate::error::StoreError;

/// Milliseconds SQLite waits on a locked database before failing a statement.
#[cfg(feature = "sqlite")]
const SQLITE_BUSY_TIMEOUT_MS: u32 = 30_000;

/// Represents the database backend type, detected at runtime from the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// PostgreSQL backend
    #[cfg(feature = "postgres")]
    Postgres,
    /// SQLite backend
    #[cfg(feature = "sqlite")]
    Sqlite,
}

impl BackendType {
    /// Detect the backend type from a connection URL.
    ///
    /// Returns [`StoreError::InvalidUrl`] when the scheme does not match an
    /// enabled backend.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            #[cfg(feature = "postgres")]
            return Ok(BackendType::Postgres);
            #[cfg(not(feature = "postgres"))]
            return Err(StoreError::InvalidUrl(format!(
                "'{}' needs the `postgres` feature",
                url
            )));
        }

        // SQLite URLs can be:
        // - sqlite:// prefix
        // - file: URI format (e.g., file:test?mode=memory&cache=shared)
        // - file paths (relative or absolute)
        // - :memory: for in-memory databases
        if url.starts_with("sqlite://")
            || url.starts_with("file:")
            || url.starts_with('/')
            || url.starts_with("./")
            || url.starts_with("../")
            || url == ":memory:"
            || url.ends_with(".db")
            || url.ends_with(".sqlite")
            || url.ends_with(".sqlite3")
        {
            #[cfg(feature = "sqlite")]
            return Ok(BackendType::Sqlite);
            #[cfg(not(feature = "sqlite"))]
            return Err(StoreError::InvalidUrl(format!(
                "'{}' needs the `sqlite` feature",
                url
            )));
        }

        Err(StoreError::InvalidUrl(format!(
            "unable to detect database backend from '{}'; expected postgres://, postgresql://, sqlite://, or a file path",
            url
        )))
    }

    /// Short lowercase name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            #[cfg(feature = "postgres")]
            BackendType::Postgres => "postgres",
            #[cfg(feature = "sqlite")]
            BackendType::Sqlite => "sqlite",
        }
    }
}

/// Pool enum that wraps both PostgreSQL and SQLite connection pools.
#[derive(Clone)]
pub enum AnyPool {
    /// PostgreSQL connection pool
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
    /// SQLite connection pool
    #[cfg(feature = "sqlite")]
    Sqlite(SqlitePool),
}

impl std::fmt::Debug for AnyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(_) => write!(f, "AnyPool::Postgres(...)"),
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(_) => write!(f, "AnyPool::Sqlite(...)"),
        }
    }
}

/// A pool of database connections shared by the job store and node registry.
///
/// `Database` is `Clone`; every clone references the same underlying pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: AnyPool,
    backend: BackendType,
}

impl Database {
    /// Creates a new connection pool with automatic backend detection.
    ///
    /// * `connection_string` - `postgres://...`, `sqlite://...`, a file path or `:memory:`
    /// * `max_size` - maximum number of pooled connections (SQLite always uses one)
    pub fn new(connection_string: &str, max_size: u32) -> Result<Self, StoreError> {
        let backend = BackendType::from_url(connection_string)?;

        match backend {
            #[cfg(feature = "postgres")]
            BackendType::Postgres => {
                let connection_url = Self::build_postgres_url(connection_string)?;
                let manager = PgManager::new(connection_url, PgRuntime::Tokio1);
                let pool = PgPool::builder(manager)
                    .max_size(max_size as usize)
                    .build()
                    .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

                info!("PostgreSQL connection pool initialized (size: {})", max_size);

                Ok(Self {
                    pool: AnyPool::Postgres(pool),
                    backend,
                })
            }
            #[cfg(feature = "sqlite")]
            BackendType::Sqlite => {
                let connection_url = Self::build_sqlite_url(connection_string);
                let manager = SqliteManager::new(connection_url, SqliteRuntime::Tokio1);
                // SQLite has limited concurrent write support even with WAL mode.
                // A single connection avoids "database is locked" errors.
                let sqlite_pool_size = 1;
                if max_size > 1 {
                    tracing::debug!(
                        "Ignoring requested pool size {} for SQLite, using {}",
                        max_size,
                        sqlite_pool_size
                    );
                }
                let pool = SqlitePool::builder(manager)
                    .max_size(sqlite_pool_size)
                    .build()
                    .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

                info!(
                    "SQLite connection pool initialized (size: {})",
                    sqlite_pool_size
                );

                Ok(Self {
                    pool: AnyPool::Sqlite(pool),
                    backend,
                })
            }
        }
    }

    /// Returns the detected backend type.
    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[cfg(feature = "postgres")]
    fn build_postgres_url(base_url: &str) -> Result<String, StoreError> {
        let url = url::Url::parse(base_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(url.to_string())
    }

    #[cfg(feature = "sqlite")]
    fn build_sqlite_url(connection_string: &str) -> String {
        // Strip sqlite:// prefix if present
        if let Some(path) = connection_string.strip_prefix("sqlite://") {
            path.to_string()
        } else {
            connection_string.to_string()
        }
    }

    /// Runs pending database migrations for the detected backend.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        use diesel_migrations::MigrationHarness;

        match &self.pool {
            #[cfg(feature = "postgres")]
            AnyPool::Postgres(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;
                conn.interact(|conn| {
                    conn.run_pending_migrations(crate::database::POSTGRES_MIGRATIONS)
                        .map(|applied| applied.len())
                        .map_err(|e| StoreError::Migration(e.to_string()))
                })
                .await
                .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
                .map(|applied| info!("Applied {} PostgreSQL migration(s)", applied))?;
            }
            #[cfg(feature = "sqlite")]
            AnyPool::Sqlite(pool) => {
                let conn = pool
                    .get()
                    .await
                    .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;
                conn.interact(|conn| {
                    use diesel::prelude::*;

                    // WAL mode allows concurrent readers while a worker holds the write lock
                    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
                    diesel::sql_query(format!("PRAGMA busy_timeout={};", SQLITE_BUSY_TIMEOUT_MS))
                        .execute(conn)?;

                    conn.run_pending_migrations(crate::database::SQLITE_MIGRATIONS)
                        .map(|applied| applied.len())
                        .map_err(|e| StoreError::Migration(e.to_string()))
                })
                .await
                .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
                .map(|applied| info!("Applied {} SQLite migration(s)", applied))?;
            }
        }
        Ok(())
    }

    /// Gets a PostgreSQL connection.
    ///
    /// Returns an error if this is a SQLite backend.
    #[cfg(feature = "postgres")]
    pub async fn get_postgres_connection(
        &self,
    ) -> Result<deadpool::managed::Object<PgManager>, StoreError> {
        #[allow(unreachable_patterns)]
        let pool = match &self.pool {
            AnyPool::Postgres(pool) => pool,
            _ => {
                return Err(StoreError::ConnectionPool(
                    "PostgreSQL connection requested from a SQLite database".to_string(),
                ))
            }
        };

        pool.get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))
    }

    /// Gets a SQLite connection.
    ///
    /// Returns an error if this is a PostgreSQL backend.
    #[cfg(feature = "sqlite")]
    pub async fn get_sqlite_connection(
        &self,
    ) -> Result<deadpool::managed::Object<SqliteManager>, StoreError> {
        #[allow(unreachable_patterns)]
        let pool = match &self.pool {
            AnyPool::Sqlite(pool) => pool,
            _ => {
                return Err(StoreError::ConnectionPool(
                    "SQLite connection requested from a PostgreSQL database".to_string(),
                ))
            }
        };

        pool.get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))
    }
}
