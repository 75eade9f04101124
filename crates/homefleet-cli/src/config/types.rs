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

use std::time::Duration;

use homefleet::{
    CircuitBreakerConfig, ClientConfig, HealthMonitorConfig, NodeConfig, NodeRole, WorkerConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomefleetConfig {
    pub database: DatabaseConfig,
    pub node: NodeSection,
    pub circuit_breaker: CircuitBreakerSection,
    pub client: ClientSection,
    pub worker: WorkerSection,
    pub health: HealthSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub id: String,
    pub name: String,
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    pub api_key: String,
    /// Probed before registering as primary to avoid split-brain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_url: Option<String>,
    pub listen_port: u16,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub timeout_secs: u64,
    pub half_open_successes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub poll_interval_ms: u64,
    pub stale_threshold_secs: u64,
    pub maintenance_interval_secs: u64,
    pub keep_completed: usize,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval_secs: u64,
    pub offline_after: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

/// Stands in for secrets when a config is printed.
pub const REDACTED: &str = "<redacted>";

impl HomefleetConfig {
    /// A copy safe to print: the shared API key is masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.node.api_key.is_empty() {
            config.node.api_key = REDACTED.to_string();
        }
        config
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_id: self.node.id.clone(),
            name: self.node.name.clone(),
            role: self.node.role,
            api_endpoint: self.node.api_endpoint.clone(),
            api_key: self.node.api_key.clone(),
            primary_url: self.node.primary_url.clone(),
            listen_port: self.node.listen_port,
            probe_timeout: Duration::from_secs(self.node.probe_timeout_secs),
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            timeout: Duration::from_secs(self.circuit_breaker.timeout_secs),
            half_open_successes: self.circuit_breaker.half_open_successes,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(self.client.request_timeout_secs),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_id: format!("{}-cli", self.node.id),
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            stale_threshold: Duration::from_secs(self.worker.stale_threshold_secs),
            maintenance_interval: Duration::from_secs(self.worker.maintenance_interval_secs),
            keep_completed: self.worker.keep_completed,
            retry_base_delay: Duration::from_secs(self.worker.retry_base_delay_secs),
            retry_max_delay: Duration::from_secs(self.worker.retry_max_delay_secs),
        }
    }

    pub fn health_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_secs(self.health.interval_secs),
            offline_after: self.health.offline_after,
        }
    }
}
