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

//! Job claiming, claim release and retry scheduling.
//!
//! The claim is the only cross-process mutual exclusion in the system. It
//! relies on a conditional `UPDATE ... WHERE status = 'pending' AND
//! claimed_by IS NULL` inside one transaction: whichever caller's update
//! affects the row owns the job, everyone else sees zero rows and moves on.

use std::time::Duration;

use diesel::prelude::*;
use tracing::{debug, info};

use super::{new_job_row, JobDAL, ACTIVE_STATUSES};
use crate::dal::models::{after, now_naive, JobRow};
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::dal::WriteTransaction;
use crate::models::{Job, JobStatus, NewJob};
use crate::with_connection;

impl<'a> JobDAL<'a> {
    /// Atomically claims the oldest eligible pending job for `worker_id`.
    ///
    /// Eligible means pending, unclaimed, and not waiting on a future
    /// `retry_after`. Returns `Ok(None)` when nothing is eligible or another
    /// worker won the race for the selected row.
    pub async fn claim_pending_job(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let worker = worker_id.to_string();

        let claimed = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let now = now_naive();

                let candidate: Option<String> = jobs::table
                    .filter(jobs::status.eq(JobStatus::Pending.as_str()))
                    .filter(jobs::claimed_by.is_null())
                    .filter(jobs::retry_after.is_null().or(jobs::retry_after.le(now)))
                    .order((jobs::created_at.asc(), jobs::id.asc()))
                    .select(jobs::id)
                    .first(conn)
                    .optional()?;
                let Some(job_id) = candidate else {
                    return Ok(None);
                };

                let updated = diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&job_id))
                        .filter(jobs::status.eq(JobStatus::Pending.as_str()))
                        .filter(jobs::claimed_by.is_null()),
                )
                .set((
                    jobs::status.eq(JobStatus::Running.as_str()),
                    jobs::claimed_by.eq(Some(&worker)),
                    jobs::claimed_at.eq(Some(now)),
                    jobs::updated_at.eq(now),
                ))
                .execute(conn)?;

                if updated == 0 {
                    // Lost the race between select and update
                    return Ok(None);
                }

                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&job_id))
                        .filter(jobs::started_at.is_null()),
                )
                .set(jobs::started_at.eq(Some(now)))
                .execute(conn)?;

                let row: JobRow = jobs::table
                    .find(&job_id)
                    .select(JobRow::as_select())
                    .first(conn)?;
                // A row that does not load rolls the claim back
                Ok(Some(Job::try_from(row)?))
            })
        });

        match claimed {
            Some(job) => {
                info!(job_id = %job.id, worker_id = %worker_id, "Job claimed");
                Ok(Some(job))
            }
            None => {
                debug!(worker_id = %worker_id, "No claimable job");
                Ok(None)
            }
        }
    }

    /// Releases a running job's claim and returns it to `pending` so another
    /// worker can pick it up. `started_at` is kept.
    ///
    /// Returns `false` when the job was not running.
    pub async fn release_job_claim(&self, job_id: &str) -> Result<bool, StoreError> {
        let id = job_id.to_string();
        let released = with_connection!(self.dal.database, |conn| {
            let now = now_naive();
            let updated = diesel::update(
                jobs::table
                    .filter(jobs::id.eq(&id))
                    .filter(jobs::status.eq(JobStatus::Running.as_str())),
            )
            .set((
                jobs::status.eq(JobStatus::Pending.as_str()),
                jobs::claimed_by.eq(None::<String>),
                jobs::claimed_at.eq(None::<chrono::NaiveDateTime>),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        });

        if released {
            info!(job_id = %job_id, "Job claim released");
        }
        Ok(released)
    }

    /// Schedules another attempt of a failed job.
    ///
    /// The failed job stays failed; a new pending job is created with the
    /// same kind, application, hash and limits, `retry_count + 1`, and a
    /// `retry_after` of now plus `delay`. Claims skip it until then.
    ///
    /// Returns `Ok(None)` when the job is not retryable (not failed,
    /// cancelled, out of retries) or when another active job with the same
    /// hash already exists.
    pub async fn enqueue_retry(
        &self,
        job_id: &str,
        delay: Duration,
    ) -> Result<Option<Job>, StoreError> {
        let failed = self.get_job(job_id).await?;
        if !failed.can_retry() {
            debug!(
                job_id = %job_id,
                status = %failed.status,
                retry_count = failed.retry_count,
                max_retries = failed.max_retries,
                "Job is not retryable"
            );
            return Ok(None);
        }

        let retry = NewJob {
            app_id: failed.app_id.clone(),
            payload: failed.payload.clone(),
            max_retries: failed.max_retries,
            timeout_seconds: failed.timeout_seconds,
            job_hash: failed.job_hash.clone(),
        };
        let retry_after = after(now_naive(), delay);
        let row = new_job_row(&retry, failed.retry_count + 1, Some(retry_after))?;

        let inserted = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                if let Some(hash) = &row.job_hash {
                    let active: i64 = jobs::table
                        .filter(jobs::job_hash.eq(hash))
                        .filter(jobs::status.eq_any(ACTIVE_STATUSES))
                        .count()
                        .get_result(conn)?;
                    if active > 0 {
                        return Ok(None);
                    }
                }

                diesel::insert_into(jobs::table).values(&row).execute(conn)?;
                let inserted: JobRow = jobs::table
                    .find(&row.id)
                    .select(JobRow::as_select())
                    .first(conn)?;
                Ok(Some(inserted))
            })
        });

        let Some(inserted) = inserted else {
            debug!(job_id = %job_id, "Retry skipped; an active job with the same hash exists");
            return Ok(None);
        };

        let job = Job::try_from(inserted)?;
        info!(
            job_id = %job.id,
            retry_of = %job_id,
            attempt = job.retry_count,
            retry_after = %retry_after,
            "Job retry scheduled"
        );
        Ok(Some(job))
    }
}
