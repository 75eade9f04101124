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

//! Periodic health checks of peer nodes.
//!
//! The monitor calls each peer's breaker-gated health endpoint and mirrors
//! the outcome into the node registry (`status`, `consecutive_failures`,
//! `last_health_check`). Peers whose circuit is open are skipped without
//! touching their counters until the breaker lets a probe through.

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::circuit::CircuitStats;
use crate::config::HealthMonitorConfig;
use crate::dal::DAL;
use crate::error::StoreError;
use crate::remote::{NodeClient, RemoteError};

/// Result of checking one peer.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerHealth {
    Healthy,
    Unhealthy { failures: i32, error: String },
    /// The breaker refused the call; nothing was recorded.
    CircuitOpen(CircuitStats),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerCheck {
    pub node_id: String,
    pub name: String,
    pub health: PeerHealth,
}

pub struct HealthMonitor {
    dal: DAL,
    client: NodeClient,
    local_node_id: String,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        dal: DAL,
        client: NodeClient,
        local_node_id: impl Into<String>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            dal,
            client,
            local_node_id: local_node_id.into(),
            config,
        }
    }

    /// Checks every registered node except this one, one at a time.
    pub async fn check_all(&self) -> Result<Vec<PeerCheck>, StoreError> {
        let nodes = self.dal.nodes();
        let peers = nodes.list_nodes().await?;
        let mut checks = Vec::with_capacity(peers.len());

        for peer in peers.into_iter().filter(|n| n.id != self.local_node_id) {
            let health = match self.client.health_check(&peer).await {
                Ok(_) => {
                    nodes.record_health_success(&peer.id).await?;
                    debug!(node = %peer.name, "Peer healthy");
                    PeerHealth::Healthy
                }
                Err(RemoteError::CircuitOpen(open)) => {
                    debug!(node = %peer.name, "Peer skipped, circuit open");
                    PeerHealth::CircuitOpen(open.stats)
                }
                Err(e) => {
                    let failures = nodes
                        .record_health_failure(&peer.id, self.config.offline_after)
                        .await?;
                    warn!(node = %peer.name, failures, error = %e, "Peer health check failed");
                    PeerHealth::Unhealthy {
                        failures,
                        error: e.to_string(),
                    }
                }
            };
            checks.push(PeerCheck {
                node_id: peer.id,
                name: peer.name,
                health,
            });
        }
        Ok(checks)
    }

    /// Runs [`HealthMonitor::check_all`] every interval until `shutdown`
    /// becomes `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.interval, "Peer health monitor started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_all().await {
                        error!(error = %e, "Peer health pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Peer health monitor stopped");
    }
}
