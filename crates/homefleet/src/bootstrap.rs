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

//! Startup registration of this node in the cluster membership table.
//!
//! [`bootstrap`] runs once per process before any request handling. It is
//! idempotent across restarts and refuses to create a second primary while
//! anything still answers at the configured primary's address. The
//! `nodes_single_primary` index backs that check at the storage layer, so two
//! processes racing through the probe cannot both insert a primary row.

use reqwest::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{NodeConfig, NodeRole};
use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::{NewNode, Node};
use crate::remote::{API_KEY_HEADER, NODE_ID_HEADER};

/// Startup failures. All of them should stop the process.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(
        "refusing to start as primary: the primary at {primary_url} is reachable; \
         reconfigure this node as secondary or shut the other primary down"
    )]
    SplitBrain { primary_url: String },

    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    #[error("could not build the reachability probe client: {0}")]
    ProbeClient(#[source] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What [`bootstrap`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// A row for this node id already existed; nothing changed.
    AlreadyRegistered(Node),
    RegisteredSecondary(Node),
    RegisteredPrimary { node: Node, migrated_apps: usize },
    /// This node is configured as primary but the table already had rows.
    /// Orphan apps were assigned to the existing primary, if there is one.
    ExistingCluster {
        primary: Option<Node>,
        migrated_apps: usize,
    },
}

impl BootstrapOutcome {
    /// The row describing this process's node, when bootstrap produced one.
    pub fn local_node(&self) -> Option<&Node> {
        match self {
            BootstrapOutcome::AlreadyRegistered(node)
            | BootstrapOutcome::RegisteredSecondary(node)
            | BootstrapOutcome::RegisteredPrimary { node, .. } => Some(node),
            BootstrapOutcome::ExistingCluster { .. } => None,
        }
    }
}

/// Establishes this node's identity in the registry.
///
/// 1. An existing row for `config.node_id` makes this a no-op.
/// 2. A secondary inserts its own row and contacts nobody.
/// 3. A primary facing a non-empty table only migrates orphan apps to the
///    existing primary. Otherwise it probes `primary_url` (if set), aborts
///    with [`BootstrapError::SplitBrain`] on any HTTP response, and inserts its
///    row while adopting every orphan app.
pub async fn bootstrap(dal: &DAL, config: &NodeConfig) -> Result<BootstrapOutcome, BootstrapError> {
    validate(config)?;
    let nodes = dal.nodes();

    if let Some(existing) = nodes.get_node(&config.node_id).await? {
        info!(node_id = %existing.id, name = %existing.name, "Node already registered");
        return Ok(BootstrapOutcome::AlreadyRegistered(existing));
    }

    let (api_endpoint, derived) = config.endpoint_or_localhost();
    if derived {
        warn!(
            endpoint = %api_endpoint,
            "No API endpoint configured; peers can only reach this node on localhost"
        );
    }

    let new_node = NewNode {
        id: config.node_id.clone(),
        name: config.name.clone(),
        api_endpoint,
        api_key: config.api_key.clone(),
        is_primary: config.role == NodeRole::Primary,
    };

    match config.role {
        NodeRole::Secondary => {
            let node = nodes.create_node(new_node).await?;
            info!(node_id = %node.id, "Registered as secondary");
            Ok(BootstrapOutcome::RegisteredSecondary(node))
        }
        NodeRole::Primary => {
            if nodes.count_nodes().await? > 0 {
                // A previous run got partway; finish the migration only.
                let primary = nodes.get_primary().await?;
                let migrated_apps = match &primary {
                    Some(primary) => nodes.assign_orphan_apps(&primary.id).await?,
                    None => {
                        warn!("Node table is populated but has no primary; orphan apps left as-is");
                        0
                    }
                };
                return Ok(BootstrapOutcome::ExistingCluster {
                    primary,
                    migrated_apps,
                });
            }

            if let Some(primary_url) = config.primary_url.as_deref() {
                probe_existing_primary(primary_url, config).await?;
            }

            let (node, migrated_apps) = nodes.register_primary(new_node).await?;
            if migrated_apps > 0 {
                info!(
                    node_id = %node.id,
                    migrated_apps,
                    "Migrated single-node install to cluster layout"
                );
            }
            Ok(BootstrapOutcome::RegisteredPrimary {
                node,
                migrated_apps,
            })
        }
    }
}

fn validate(config: &NodeConfig) -> Result<(), BootstrapError> {
    if config.node_id.trim().is_empty() {
        return Err(BootstrapError::InvalidConfig("node id is empty".into()));
    }
    if config.name.trim().is_empty() {
        return Err(BootstrapError::InvalidConfig("node name is empty".into()));
    }
    if config.api_key.is_empty() {
        return Err(BootstrapError::InvalidConfig("api key is empty".into()));
    }
    Ok(())
}

/// Fails with `SplitBrain` if anything answers on `primary_url`.
///
/// Any HTTP response, whatever its status, means a process is serving there,
/// so only a transport failure lets this node proceed as primary.
async fn probe_existing_primary(primary_url: &str, config: &NodeConfig) -> Result<(), BootstrapError> {
    let client = Client::builder()
        .timeout(config.probe_timeout)
        .build()
        .map_err(BootstrapError::ProbeClient)?;
    let health_url = format!("{}/api/internal/health", primary_url.trim_end_matches('/'));

    let response = client
        .get(&health_url)
        .header(NODE_ID_HEADER, &config.node_id)
        .header(API_KEY_HEADER, &config.api_key)
        .send()
        .await;

    match response {
        Ok(response) => {
            warn!(
                primary_url = %primary_url,
                status = %response.status(),
                "Configured primary answered; refusing to start a second primary"
            );
            Err(BootstrapError::SplitBrain {
                primary_url: primary_url.to_string(),
            })
        }
        Err(e) => {
            warn!(
                primary_url = %primary_url,
                error = %e,
                "Configured primary is unreachable; proceeding as primary"
            );
            Ok(())
        }
    }
}
