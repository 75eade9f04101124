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

//! Background job execution.
//!
//! A [`JobWorker`] repeatedly claims the oldest eligible job, hands it to a
//! [`JobHandler`], and records the outcome. Between claims it sleeps for the
//! poll interval unless woken through [`JobWorker::notifier`]. The stale
//! sweep and retention GC run on their own interval from the same loop.
//!
//! Any number of workers, in any number of processes, may share one
//! database; the claim protocol guarantees each job runs once.
//!
//! # Example
//!
//! ```rust,ignore
//! let worker = JobWorker::new(dal.clone(), Arc::new(MyHandler), WorkerConfig::default());
//! let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let handle = tokio::spawn(async move { worker.run(stop_rx).await });
//! // ...
//! stop_tx.send(true)?;
//! handle.await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

mod handler;

pub use handler::{JobContext, JobFailure, JobHandler};

use crate::config::WorkerConfig;
use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::{Job, JobStatus};

/// What happened to a job claimed by [`JobWorker::run_once`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobRunReport {
    pub job_id: String,
    pub status: JobStatus,
    /// Id of the follow-up job when a retry was scheduled.
    pub retry_job_id: Option<String>,
}

/// Counts from one [`JobWorker::run_maintenance`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub stale_failed: usize,
    pub cleaned_up: usize,
}

pub struct JobWorker {
    dal: DAL,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    notify: Arc<Notify>,
}

impl JobWorker {
    pub fn new(dal: DAL, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        Self {
            dal,
            handler,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Wakes an idle worker early, e.g. right after enqueueing a job.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Claims and executes at most one job. `Ok(None)` means nothing was
    /// claimable.
    pub async fn run_once(&self) -> Result<Option<JobRunReport>, StoreError> {
        let jobs = self.dal.jobs();
        let Some(job) = jobs.claim_pending_job(&self.config.worker_id).await? else {
            return Ok(None);
        };

        let outcome = self.execute(&job).await;
        let job_id = job.id.clone();

        let (status, result, error_message, retry) = match outcome {
            Ok(result) => (JobStatus::Completed, result, None, false),
            Err(failure) => {
                warn!(job_id = %job_id, job_type = job.type_tag(), error = %failure, "Job failed");
                (
                    JobStatus::Failed,
                    None,
                    Some(failure.to_string()),
                    failure.is_retryable(),
                )
            }
        };

        let finished = match jobs
            .update_job_completed(&job_id, status, result, error_message)
            .await
        {
            Ok(finished) => finished,
            Err(StoreError::InvalidTransition { status, .. }) => {
                // The stale sweep got there first
                warn!(job_id = %job_id, current = %status, "Job was already finished elsewhere");
                jobs.get_job(&job_id).await?
            }
            Err(e) => return Err(e),
        };

        let retry_job_id = if retry && finished.can_retry() {
            let delay = self.config.retry_delay(finished.retry_count + 1);
            jobs.enqueue_retry(&job_id, delay)
                .await?
                .map(|retry| retry.id)
        } else {
            None
        };

        Ok(Some(JobRunReport {
            job_id,
            status: finished.status,
            retry_job_id,
        }))
    }

    async fn execute(&self, job: &Job) -> Result<Option<serde_json::Value>, JobFailure> {
        if job.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }

        let ctx = JobContext::new(self.dal.clone(), job.id.clone());
        let run = self.handler.handle(job, &ctx);
        match job.timeout_seconds.filter(|s| *s > 0) {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds as u64), run)
                .await
                .unwrap_or(Err(JobFailure::TimedOut { seconds })),
            None => run.await,
        }
    }

    /// Runs the stale-job sweep and the retention GC once.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, StoreError> {
        let jobs = self.dal.jobs();
        let stale_failed = jobs
            .mark_stale_jobs_as_failed(self.config.stale_threshold)
            .await?;
        let cleaned_up = jobs
            .cleanup_all_old_completed_jobs(self.config.keep_completed)
            .await?;
        if stale_failed > 0 || cleaned_up > 0 {
            info!(stale_failed, cleaned_up, "Job maintenance finished");
        }
        Ok(MaintenanceReport {
            stale_failed,
            cleaned_up,
        })
    }

    /// Processes jobs until `shutdown` becomes `true` or its sender is
    /// dropped. A job already running is finished before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "Job worker started");
        let mut last_maintenance: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let due = last_maintenance
                .map_or(true, |at| at.elapsed() >= self.config.maintenance_interval);
            if due {
                if let Err(e) = self.run_maintenance().await {
                    error!(error = %e, "Job maintenance failed");
                }
                last_maintenance = Some(Instant::now());
            }

            match self.run_once().await {
                Ok(Some(report)) => {
                    debug!(job_id = %report.job_id, status = %report.status, "Job processed");
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to process job"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "Job worker stopped");
    }
}
