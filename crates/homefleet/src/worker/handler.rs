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

//! The contract between the worker runtime and the code that executes jobs.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::{Job, JobStatus};

/// Why a handler did not complete a job.
#[derive(Debug, Error)]
pub enum JobFailure {
    /// The handler saw the cancellation flag and stopped.
    #[error("job cancelled")]
    Cancelled,

    #[error("job exceeded its {seconds}s timeout")]
    TimedOut { seconds: i32 },

    #[error("{0}")]
    Failed(String),
}

impl JobFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        JobFailure::Failed(message.into())
    }

    /// Cancelled jobs are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobFailure::Cancelled)
    }
}

impl From<StoreError> for JobFailure {
    fn from(err: StoreError) -> Self {
        JobFailure::Failed(err.to_string())
    }
}

/// Executes jobs of one or more kinds.
///
/// Implementations should poll [`JobContext::is_cancelled`] at safe points
/// and return [`JobFailure::Cancelled`] once it reports true.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs `job` to completion. The returned value becomes the job's result.
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<Option<Value>, JobFailure>;
}

/// Per-job handle given to a [`JobHandler`].
#[derive(Clone)]
pub struct JobContext {
    dal: DAL,
    job_id: String,
}

impl JobContext {
    pub(crate) fn new(dal: DAL, job_id: String) -> Self {
        Self { dal, job_id }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Records progress (0..=100) and an optional message. Also bumps
    /// `updated_at`, which keeps the stale sweep away from this job.
    pub async fn report_progress(
        &self,
        progress: i32,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        self.dal
            .jobs()
            .update_job_status(&self.job_id, JobStatus::Running, progress, message)
            .await
            .map(|_| ())
    }

    /// Whether cancellation has been requested for this job.
    pub async fn is_cancelled(&self) -> Result<bool, StoreError> {
        self.dal.jobs().is_job_cancelled(&self.job_id).await
    }
}
