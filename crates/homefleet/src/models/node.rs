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

//! Cluster membership types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status recorded for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Unknown,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            "unknown" => Ok(NodeStatus::Unknown),
            other => Err(format!("unknown node status '{}'", other)),
        }
    }
}

/// A cluster member.
#[derive(Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub api_endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub is_primary: bool,
    pub status: NodeStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// The shared secret stays out of logs.
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_endpoint", &self.api_endpoint)
            .field("api_key", &"<redacted>")
            .field("is_primary", &self.is_primary)
            .field("status", &self.status)
            .field("last_seen", &self.last_seen)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("last_health_check", &self.last_health_check)
            .finish()
    }
}

/// Parameters for registering a node.
#[derive(Clone, PartialEq)]
pub struct NewNode {
    pub id: String,
    pub name: String,
    pub api_endpoint: String,
    pub api_key: String,
    pub is_primary: bool,
}

impl fmt::Debug for NewNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_endpoint", &self.api_endpoint)
            .field("is_primary", &self.is_primary)
            .finish_non_exhaustive()
    }
}
