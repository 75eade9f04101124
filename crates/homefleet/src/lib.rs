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

//! # homefleet
//!
//! Coordination core for a small fleet of self-hosted nodes: one primary and
//! any number of secondaries, each running application workloads.
//!
//! The crate provides:
//!
//! - a persistent **job store** ([`dal::JobDAL`]) whose atomic claim lets any
//!   number of workers across processes execute each job exactly once, with
//!   cooperative cancellation, retries, stale-job recovery and retention GC;
//! - a **node registry** ([`dal::NodeDAL`]) holding cluster membership;
//! - a per-peer **circuit breaker** ([`circuit::CircuitBreaker`]);
//! - the **inter-node client** ([`remote::NodeClient`]) the breaker guards;
//! - the **bootstrap** routine ([`bootstrap::bootstrap`]) that registers this
//!   node without creating a second primary;
//! - a **job worker** runtime ([`worker::JobWorker`]) and a **peer health
//!   monitor** ([`health::HealthMonitor`]).
//!
//! Storage is PostgreSQL or SQLite through diesel, selected at runtime from
//! the connection URL.
//!
//! ```rust,ignore
//! use homefleet::{bootstrap, Database, NodeConfig, NodeRole, DAL};
//!
//! let db = Database::new("sqlite://./homefleet.db", 1)?;
//! db.run_migrations().await?;
//! let dal = DAL::new(db);
//!
//! let config = NodeConfig::new("node-a", "alpha", NodeRole::Primary, "shared-secret");
//! bootstrap::bootstrap(&dal, &config).await?;
//! ```

pub mod bootstrap;
pub mod circuit;
pub mod config;
pub mod dal;
pub mod database;
pub mod error;
pub mod health;
pub mod models;
pub mod remote;
pub mod worker;

pub use circuit::{CircuitBreaker, CircuitOpenError, CircuitState, CircuitStats};
pub use config::{
    CircuitBreakerConfig, ClientConfig, HealthMonitorConfig, NodeConfig, NodeRole, WorkerConfig,
};
pub use dal::DAL;
pub use database::Database;
pub use error::StoreError;
pub use models::{Job, JobPayload, JobStatus, JobType, NewJob, NewNode, Node, NodeStatus};
pub use remote::{NodeClient, RemoteError};

/// Installs a global `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `level`
/// (default `info`). Calling this more than once is harmless; only the
/// first subscriber is kept.
pub fn init_logging(level: Option<&str>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
