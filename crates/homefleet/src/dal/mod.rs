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

//! Data Access Layer with runtime backend selection.
//!
//! The [`DAL`] wraps a [`Database`] and hands out per-entity accessors:
//! [`DAL::jobs`] for the job store and [`DAL::nodes`] for the node registry.
//! Each accessor borrows the DAL, so they are cheap to create per call.
//!
//! # Example
//!
//! ```rust,ignore
//! use homefleet::dal::DAL;
//! use homefleet::database::Database;
//!
//! let db = Database::new("sqlite://./homefleet.db", 1)?;
//! db.run_migrations().await?;
//! let dal = DAL::new(db);
//!
//! if let Some(job) = dal.jobs().claim_pending_job("worker-1").await? {
//!     println!("claimed {}", job.id);
//! }
//! ```

use crate::database::{AnyPool, BackendType, Database};

pub mod jobs;
pub mod models;
pub mod nodes;

pub use jobs::JobDAL;
pub use nodes::NodeDAL;

/// Runs a blocking diesel closure on a pooled connection for whichever
/// backend the database was opened with.
///
/// The body must evaluate to `Result<T, StoreError>`; the macro yields `T`
/// and propagates errors (pool checkout, interact panics, and the body's own
/// error) with `?`, so it can only be used inside functions returning
/// `Result<_, StoreError>`. Values used by the body must be moved in.
///
/// ```rust,ignore
/// let count = with_connection!(self.dal.database, |conn| {
///     Ok(jobs::table.count().get_result::<i64>(conn)?)
/// });
/// ```
#[macro_export]
macro_rules! with_connection {
    ($db:expr, |$conn:ident| $body:block) => {{
        match $db.backend() {
            #[cfg(feature = "postgres")]
            $crate::database::BackendType::Postgres => {
                let pooled = $db.get_postgres_connection().await?;
                pooled
                    .interact(move |$conn| -> Result<_, $crate::error::StoreError> { $body })
                    .await
                    .map_err(|e| $crate::error::StoreError::ConnectionPool(e.to_string()))??
            }
            #[cfg(feature = "sqlite")]
            $crate::database::BackendType::Sqlite => {
                let pooled = $db.get_sqlite_connection().await?;
                pooled
                    .interact(move |$conn| -> Result<_, $crate::error::StoreError> { $body })
                    .await
                    .map_err(|e| $crate::error::StoreError::ConnectionPool(e.to_string()))??
            }
        }
    }};
}

/// Transaction that holds the write lock for its whole duration.
///
/// SQLite starts plain transactions deferred: a connection that has read
/// cannot later upgrade to a writer once another connection has written,
/// and fails with "database is locked" regardless of `busy_timeout`.
/// `BEGIN IMMEDIATE` takes the lock up front, so competing writers queue on
/// the busy handler instead. PostgreSQL uses an ordinary transaction.
pub trait WriteTransaction: diesel::Connection {
    fn write_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<diesel::result::Error>;
}

#[cfg(feature = "sqlite")]
impl WriteTransaction for diesel::sqlite::SqliteConnection {
    fn write_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<diesel::result::Error>,
    {
        self.immediate_transaction(f)
    }
}

#[cfg(feature = "postgres")]
impl WriteTransaction for diesel::pg::PgConnection {
    fn write_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<diesel::result::Error>,
    {
        diesel::Connection::transaction(self, f)
    }
}

/// The Data Access Layer.
///
/// `DAL` is `Clone`; every clone shares the same connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    /// The database instance with connection pool
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Returns the backend type for this DAL instance.
    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn pool(&self) -> AnyPool {
        self.database.pool()
    }

    /// Job store operations.
    pub fn jobs(&self) -> JobDAL<'_> {
        JobDAL::new(self)
    }

    /// Node registry operations.
    pub fn nodes(&self) -> NodeDAL<'_> {
        NodeDAL::new(self)
    }
}
