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

//! Runtime configuration for the library components.
//!
//! These structs are plain values with sensible defaults; the `homefleet`
//! CLI builds them from its TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for [`crate::circuit::CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before letting a probe through.
    pub timeout: Duration,
    /// Consecutive half-open successes needed to close the circuit.
    pub half_open_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_successes: 2,
        }
    }
}

/// Role this process plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Secondary,
}

/// Identity of this node, consumed by [`crate::bootstrap::bootstrap`].
#[derive(Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub name: String,
    pub role: NodeRole,
    /// Externally reachable base URL of this node's API.
    pub api_endpoint: Option<String>,
    /// Shared secret peers present in `X-API-Key`.
    pub api_key: String,
    /// Peer primary probed before this node claims the primary role.
    pub primary_url: Option<String>,
    /// Port used to derive a localhost endpoint when none is configured.
    pub listen_port: u16,
    /// Timeout for the split-brain reachability probe.
    pub probe_timeout: Duration,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("node_id", &self.node_id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("api_endpoint", &self.api_endpoint)
            .field("primary_url", &self.primary_url)
            .field("listen_port", &self.listen_port)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl NodeConfig {
    pub fn new(
        node_id: impl Into<String>,
        name: impl Into<String>,
        role: NodeRole,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            role,
            api_endpoint: None,
            api_key: api_key.into(),
            primary_url: None,
            listen_port: 8080,
            probe_timeout: Duration::from_secs(5),
        }
    }

    /// The configured endpoint, or `http://localhost:<listen_port>`.
    pub fn endpoint_or_localhost(&self) -> (String, bool) {
        match self.api_endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => (endpoint.to_string(), false),
            _ => (format!("http://localhost:{}", self.listen_port), true),
        }
    }
}

/// Settings for [`crate::worker::JobWorker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier written to `claimed_by`.
    pub worker_id: String,
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Running jobs idle longer than this are failed by the sweep.
    pub stale_threshold: Duration,
    /// How often the stale sweep and retention GC run.
    pub maintenance_interval: Duration,
    /// Terminal jobs kept per application by the retention GC.
    pub keep_completed: usize,
    /// Delay before the first retry; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Cap on the retry delay.
    pub retry_max_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            poll_interval: Duration::from_secs(2),
            stale_threshold: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(5 * 60),
            keep_completed: 20,
            retry_base_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(10 * 60),
        }
    }
}

impl WorkerConfig {
    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped at `retry_max_delay`.
    pub fn retry_delay(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 16) as u32;
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.retry_max_delay)
    }
}

/// Settings for [`crate::remote::NodeClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout for inter-node calls.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for [`crate::health::HealthMonitor`].
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    /// Consecutive failed checks after which a node is marked offline.
    pub offline_after: i32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            offline_after: 3,
        }
    }
}
