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

//! Job domain types.
//!
//! A job is a persisted unit of asynchronous work tied to one application.
//! Its kind and arguments travel together as a [`JobPayload`], so producers
//! and the handler that executes a given kind share one typed contract.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// `Pending -> Running -> Completed | Failed`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Pending and running jobs count as active for an application.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// The kind of a job, as stored in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    AppCreate,
    AppUpdate,
    AppDelete,
    TunnelCreate,
    TunnelDelete,
    QuickTunnel,
    ContainerUpdate,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::AppCreate,
        JobType::AppUpdate,
        JobType::AppDelete,
        JobType::TunnelCreate,
        JobType::TunnelDelete,
        JobType::QuickTunnel,
        JobType::ContainerUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::AppCreate => "app-create",
            JobType::AppUpdate => "app-update",
            JobType::AppDelete => "app-delete",
            JobType::TunnelCreate => "tunnel-create",
            JobType::TunnelDelete => "tunnel-delete",
            JobType::QuickTunnel => "quick-tunnel",
            JobType::ContainerUpdate => "container-update",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{}'", s))
    }
}

/// Kind-specific arguments of a job.
///
/// Serialized with the kind as `type` and the arguments as `payload`, which
/// matches the two columns the row is stored in. Kinds this build does not
/// know load as [`JobPayload::Other`] with both columns kept verbatim, so a
/// row written by a newer node can still be claimed, failed and retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum JobPayload {
    AppCreate {
        name: String,
        compose: String,
    },
    AppUpdate {
        #[serde(default)]
        pull_images: bool,
    },
    AppDelete {
        #[serde(default)]
        remove_volumes: bool,
    },
    TunnelCreate {
        hostname: String,
        service_url: String,
    },
    TunnelDelete {
        tunnel_id: String,
    },
    QuickTunnel {
        service_url: String,
    },
    ContainerUpdate {
        #[serde(default)]
        service: Option<String>,
    },
    /// A kind defined by a collaborator this build does not know.
    #[serde(skip_deserializing)]
    Other {
        job_type: String,
        payload: Option<String>,
    },
}

impl JobPayload {
    /// The known kind, or `None` for [`JobPayload::Other`].
    pub fn job_type(&self) -> Option<JobType> {
        let job_type = match self {
            JobPayload::AppCreate { .. } => JobType::AppCreate,
            JobPayload::AppUpdate { .. } => JobType::AppUpdate,
            JobPayload::AppDelete { .. } => JobType::AppDelete,
            JobPayload::TunnelCreate { .. } => JobType::TunnelCreate,
            JobPayload::TunnelDelete { .. } => JobType::TunnelDelete,
            JobPayload::QuickTunnel { .. } => JobType::QuickTunnel,
            JobPayload::ContainerUpdate { .. } => JobType::ContainerUpdate,
            JobPayload::Other { .. } => return None,
        };
        Some(job_type)
    }

    /// The value of the `type` column.
    pub fn type_tag(&self) -> &str {
        match self {
            JobPayload::Other { job_type, .. } => job_type,
            _ => self.job_type().map(|t| t.as_str()).unwrap_or_default(),
        }
    }

    /// Splits the payload into its `type` tag and JSON-encoded arguments.
    pub fn to_columns(&self) -> Result<(String, Option<String>), serde_json::Error> {
        if let JobPayload::Other { job_type, payload } = self {
            return Ok((job_type.clone(), payload.clone()));
        }
        let mut value = serde_json::to_value(self)?;
        let args = value
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok((self.type_tag().to_string(), Some(serde_json::to_string(&args)?)))
    }

    /// Rebuilds a payload from the `type` and `payload` columns.
    ///
    /// Fails only when a known kind carries arguments that do not match it.
    pub fn from_columns(job_type: &str, payload: Option<&str>) -> Result<Self, String> {
        if job_type.parse::<JobType>().is_err() {
            return Ok(JobPayload::Other {
                job_type: job_type.to_string(),
                payload: payload.map(str::to_string),
            });
        }
        let args = match payload {
            Some(text) => serde_json::from_str(text).map_err(|e| e.to_string())?,
            None => serde_json::Value::Object(Default::default()),
        };
        serde_json::from_value(serde_json::json!({ "type": job_type, "payload": args }))
            .map_err(|e| format!("payload does not match '{}': {}", job_type, e))
    }
}

/// A job as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub app_id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub progress: i32,
    pub progress_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub retry_after: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub timeout_seconds: Option<i32>,
    pub job_hash: Option<String>,
}

impl Job {
    pub fn job_type(&self) -> Option<JobType> {
        self.payload.job_type()
    }

    pub fn type_tag(&self) -> &str {
        self.payload.type_tag()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// A failed, non-cancelled job with retries left.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed
            && self.cancelled_at.is_none()
            && self.retry_count < self.max_retries
    }
}

/// Parameters for enqueueing a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub app_id: String,
    pub payload: JobPayload,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub job_hash: Option<String>,
}

impl NewJob {
    pub fn new(app_id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            app_id: app_id.into(),
            payload,
            max_retries: 0,
            timeout_seconds: None,
            job_hash: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: i32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.job_hash = Some(hash.into());
        self
    }
}

/// Outcome of [`crate::dal::JobDAL::enqueue_unique`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Created(Job),
    /// A non-terminal job with the same hash already existed.
    Existing(Job),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &Job {
        match self {
            EnqueueOutcome::Created(job) | EnqueueOutcome::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            EnqueueOutcome::Created(job) | EnqueueOutcome::Existing(job) => job,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}
