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

//! `homefleet jobs ...`: queue inspection and maintenance.

use anyhow::{Context, Result};
use homefleet::dal::jobs::JobFilter;
use homefleet::models::{Job, JobStatus};
use homefleet::DAL;
use tracing::info;

use super::parse_duration;
use crate::config::HomefleetConfig;
use crate::JobCommands;

pub async fn run(dal: &DAL, config: &HomefleetConfig, command: JobCommands) -> Result<()> {
    let jobs = dal.jobs();
    match command {
        JobCommands::List { app, status, limit } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            let found = jobs
                .list_jobs(JobFilter { app_id: app, status }, limit)
                .await
                .context("Failed to list jobs")?;
            print_jobs(&found);
        }
        JobCommands::Cancel { job_id } => {
            if jobs.cancel_job(&job_id).await.context("Failed to cancel job")? {
                info!(%job_id, "Cancellation requested");
            } else {
                info!(%job_id, "Job already finished, nothing to cancel");
            }
        }
        JobCommands::SweepStale { older_than } => {
            let threshold = match older_than {
                Some(older_than) => parse_duration(&older_than)
                    .with_context(|| format!("Invalid duration: '{}'", older_than))?,
                None => config.worker_config().stale_threshold,
            };
            let failed = jobs
                .mark_stale_jobs_as_failed(threshold)
                .await
                .context("Failed to sweep stale jobs")?;
            info!(failed, "Stale job sweep finished");
        }
        JobCommands::Cleanup { keep, app } => {
            let keep = keep.unwrap_or(config.worker_config().keep_completed);
            let deleted = match app {
                Some(app_id) => jobs.cleanup_old_completed_jobs(&app_id, keep).await,
                None => jobs.cleanup_all_old_completed_jobs(keep).await,
            }
            .context("Failed to clean up jobs")?;
            info!(deleted, keep, "Job cleanup finished");
        }
    }
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    println!(
        "{:<36}  {:<16}  {:<20}  {:<9}  {:>4}  CREATED",
        "ID", "TYPE", "APP", "STATUS", "PCT"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<16}  {:<20}  {:<9}  {:>4}  {}",
            job.id,
            job.type_tag(),
            job.app_id,
            job.status.as_str(),
            job.progress,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(error) = &job.error_message {
            println!("    error: {}", error);
        }
    }
}
