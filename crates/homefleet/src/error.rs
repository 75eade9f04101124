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

//! Error types for the persistence layer.
//!
//! Errors specific to the circuit breaker, the inter-node client and the
//! bootstrap routine live next to those components.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

/// Errors returned by the job store, the node registry and the connection pool.
///
/// Nothing in the store retries on its own; every failure is handed back to
/// the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(DieselError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Job {id} cannot move from '{status}' to '{requested}'")]
    InvalidTransition {
        id: String,
        status: String,
        requested: String,
    },

    #[error("Corrupt {entity} row {id}: {reason}")]
    CorruptRow {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Unique constraint violated: {0}")]
    Conflict(String),
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

impl StoreError {
    pub(crate) fn job_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: "job",
            id: id.into(),
        }
    }

    pub(crate) fn node_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: "node",
            id: id.into(),
        }
    }

    /// True for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
