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

//! `homefleet bootstrap`: register this node.

use anyhow::{Context, Result};
use homefleet::bootstrap::{bootstrap, BootstrapOutcome};
use homefleet::DAL;
use tracing::info;

use crate::config::HomefleetConfig;

pub async fn run(dal: &DAL, config: &HomefleetConfig) -> Result<()> {
    let node_config = config.node_config();
    let outcome = bootstrap(dal, &node_config)
        .await
        .context("Bootstrap failed")?;

    match outcome {
        BootstrapOutcome::AlreadyRegistered(node) => {
            info!(node_id = %node.id, "Node already registered, nothing to do");
        }
        BootstrapOutcome::RegisteredSecondary(node) => {
            info!(node_id = %node.id, endpoint = %node.api_endpoint, "Registered as secondary");
        }
        BootstrapOutcome::RegisteredPrimary {
            node,
            migrated_apps,
        } => {
            info!(
                node_id = %node.id,
                endpoint = %node.api_endpoint,
                migrated_apps,
                "Registered as primary"
            );
        }
        BootstrapOutcome::ExistingCluster {
            primary,
            migrated_apps,
        } => {
            let primary = primary.map(|p| p.name).unwrap_or_else(|| "(none)".into());
            info!(%primary, migrated_apps, "Cluster already initialised");
        }
    }
    Ok(())
}
