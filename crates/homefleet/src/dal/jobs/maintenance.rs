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

//! Crash recovery and retention for the job table.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use tracing::{info, warn};

use super::{JobDAL, TERMINAL_STATUSES};
use crate::dal::models::{before, now_naive};
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::JobStatus;
use crate::dal::WriteTransaction;
use crate::with_connection;

/// Upper bound on ids per `IN (...)` delete.
const DELETE_CHUNK: usize = 500;

impl<'a> JobDAL<'a> {
    /// Fails running jobs whose `updated_at` is older than `stale_threshold`.
    ///
    /// Such jobs are presumed to belong to a worker that died without
    /// reporting. Each gets an explanatory `error_message`, its claim is
    /// released and `completed_at` is set. Pending and terminal jobs are
    /// never touched. Returns the number of jobs failed.
    pub async fn mark_stale_jobs_as_failed(
        &self,
        stale_threshold: Duration,
    ) -> Result<usize, StoreError> {
        let threshold_secs = stale_threshold.as_secs();

        let failed = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let now = now_naive();
                let cutoff = before(now, stale_threshold);

                let stale: Vec<(String, Option<String>, NaiveDateTime)> = jobs::table
                    .filter(jobs::status.eq(JobStatus::Running.as_str()))
                    .filter(jobs::updated_at.lt(cutoff))
                    .select((jobs::id, jobs::claimed_by, jobs::updated_at))
                    .load(conn)?;

                let mut failed = Vec::with_capacity(stale.len());
                for (id, claimed_by, last_update) in stale {
                    let message = format!(
                        "Job marked as failed: no progress reported since {} (more than {}s); worker {} is presumed to have stopped",
                        last_update.format("%Y-%m-%d %H:%M:%S UTC"),
                        threshold_secs,
                        claimed_by.as_deref().unwrap_or("<unclaimed>"),
                    );
                    let updated = diesel::update(
                        jobs::table
                            .filter(jobs::id.eq(&id))
                            .filter(jobs::status.eq(JobStatus::Running.as_str()))
                            .filter(jobs::updated_at.lt(cutoff)),
                    )
                    .set((
                        jobs::status.eq(JobStatus::Failed.as_str()),
                        jobs::error_message.eq(Some(message)),
                        jobs::completed_at.eq(Some(now)),
                        jobs::updated_at.eq(now),
                        jobs::claimed_by.eq(None::<String>),
                        jobs::claimed_at.eq(None::<NaiveDateTime>),
                    ))
                    .execute(conn)?;
                    if updated > 0 {
                        failed.push((id, claimed_by));
                    }
                }
                Ok(failed)
            })
        });

        for (job_id, worker) in &failed {
            warn!(
                job_id = %job_id,
                worker_id = worker.as_deref().unwrap_or("<unclaimed>"),
                "Stale running job marked as failed"
            );
        }
        Ok(failed.len())
    }

    /// Keeps only the `keep_count` most recently created completed or failed
    /// jobs of one application and deletes the rest. Returns the number
    /// deleted.
    pub async fn cleanup_old_completed_jobs(
        &self,
        app_id: &str,
        keep_count: usize,
    ) -> Result<usize, StoreError> {
        let app = app_id.to_string();

        let deleted = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let ids: Vec<String> = jobs::table
                    .filter(jobs::app_id.eq(&app))
                    .filter(jobs::status.eq_any(TERMINAL_STATUSES))
                    .order((jobs::created_at.desc(), jobs::id.desc()))
                    .select(jobs::id)
                    .load(conn)?;

                let mut deleted = 0;
                let doomed: Vec<String> = ids.into_iter().skip(keep_count).collect();
                for chunk in doomed.chunks(DELETE_CHUNK) {
                    deleted += diesel::delete(jobs::table.filter(jobs::id.eq_any(chunk)))
                        .execute(conn)?;
                }
                Ok(deleted)
            })
        });

        if deleted > 0 {
            info!(app_id = %app_id, deleted, keep_count, "Old jobs cleaned up");
        }
        Ok(deleted)
    }

    /// Applies [`JobDAL::cleanup_old_completed_jobs`] to every application.
    pub async fn cleanup_all_old_completed_jobs(
        &self,
        keep_count: usize,
    ) -> Result<usize, StoreError> {
        let deleted = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let rows: Vec<(String, String)> = jobs::table
                    .filter(jobs::status.eq_any(TERMINAL_STATUSES))
                    .order((jobs::app_id.asc(), jobs::created_at.desc(), jobs::id.desc()))
                    .select((jobs::app_id, jobs::id))
                    .load(conn)?;

                let mut seen: HashMap<String, usize> = HashMap::new();
                let mut doomed = Vec::new();
                for (app_id, id) in rows {
                    let kept = seen.entry(app_id).or_insert(0);
                    if *kept < keep_count {
                        *kept += 1;
                    } else {
                        doomed.push(id);
                    }
                }

                let mut deleted = 0;
                for chunk in doomed.chunks(DELETE_CHUNK) {
                    deleted += diesel::delete(jobs::table.filter(jobs::id.eq_any(chunk)))
                        .execute(conn)?;
                }
                Ok(deleted)
            })
        });

        if deleted > 0 {
            info!(deleted, keep_count, "Old jobs cleaned up across all apps");
        }
        Ok(deleted)
    }
}
