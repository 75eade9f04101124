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

//! `homefleet nodes ...`: registry inspection and one-shot peer checks.

use std::sync::Arc;

use anyhow::{Context, Result};
use homefleet::health::{HealthMonitor, PeerHealth};
use homefleet::{CircuitBreaker, NodeClient, DAL};

use crate::config::HomefleetConfig;
use crate::NodeCommands;

pub async fn run(dal: &DAL, config: &HomefleetConfig, command: NodeCommands) -> Result<()> {
    match command {
        NodeCommands::List => {
            let nodes = dal.nodes().list_nodes().await.context("Failed to list nodes")?;
            println!(
                "{:<24}  {:<16}  {:<9}  {:<7}  {:>5}  ENDPOINT",
                "ID", "NAME", "ROLE", "STATUS", "FAILS"
            );
            for node in nodes {
                let role = if node.is_primary { "primary" } else { "secondary" };
                println!(
                    "{:<24}  {:<16}  {:<9}  {:<7}  {:>5}  {}",
                    node.id,
                    node.name,
                    role,
                    node.status.as_str(),
                    node.consecutive_failures,
                    node.api_endpoint
                );
            }
        }
        NodeCommands::Check => {
            let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker_config()));
            let client = NodeClient::new(config.node.id.clone(), breaker.clone(), &config.client_config())
                .context("Failed to build HTTP client")?;
            let monitor =
                HealthMonitor::new(dal.clone(), client, config.node.id.clone(), config.health_config());

            for check in monitor.check_all().await.context("Health check failed")? {
                let verdict = match check.health {
                    PeerHealth::Healthy => "healthy".to_string(),
                    PeerHealth::Unhealthy { failures, error } => {
                        format!("unhealthy ({} consecutive): {}", failures, error)
                    }
                    PeerHealth::CircuitOpen(stats) => format!("circuit {}", stats.state),
                };
                println!("{:<16}  {}", check.name, verdict);
            }

            println!();
            println!("{:<24}  {:<9}  {:>8}  {:>9}", "CIRCUIT", "STATE", "FAILURES", "SUCCESSES");
            for (node_id, stats) in breaker.all_stats() {
                println!(
                    "{:<24}  {:<9}  {:>8}  {:>9}",
                    node_id, stats.state, stats.failures, stats.successes
                );
            }
        }
    }
    Ok(())
}
