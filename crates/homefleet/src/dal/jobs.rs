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

//! Job store: persistence and lifecycle transitions for jobs.
//!
//! Every mutation is a conditional update guarded on the job's current
//! status, so terminal jobs stay terminal no matter how many processes touch
//! the table. Claiming and retry scheduling live in [`claiming`]; the stale
//! sweep and retention GC live in [`maintenance`].

use diesel::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{now_naive, JobRow, NewJobRow};
use super::{WriteTransaction, DAL};
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::{EnqueueOutcome, Job, JobStatus, NewJob};
use crate::with_connection;

/// Reads one job's status inside a `with_connection!` body, failing with
/// `NotFound` when the row is missing.
macro_rules! current_status {
    ($conn:expr, $id:expr) => {{
        let status: Option<String> = jobs::table
            .find($id)
            .select(jobs::status)
            .first($conn)
            .optional()?;
        $crate::dal::jobs::parse_status($id, status)?
    }};
}

mod claiming;
mod maintenance;

/// Status values a job may still be mutated in.
pub(crate) const ACTIVE_STATUSES: [&str; 2] = ["pending", "running"];
/// Status values that end a job's lifecycle.
pub(crate) const TERMINAL_STATUSES: [&str; 2] = ["completed", "failed"];

/// Optional filters for [`JobDAL::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub app_id: Option<String>,
    pub status: Option<JobStatus>,
}

/// Data access layer for jobs.
#[derive(Clone)]
pub struct JobDAL<'a> {
    dal: &'a DAL,
}

impl<'a> JobDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts a new job in `pending` status.
    pub async fn create_job(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let row = new_job_row(&new_job, 0, None)?;
        let job_id = row.id.clone();

        let created = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                diesel::insert_into(jobs::table).values(&row).execute(conn)?;
                Ok(jobs::table
                    .find(&row.id)
                    .select(JobRow::as_select())
                    .first(conn)?)
            })
        });

        info!(
            job_id = %job_id,
            app_id = %new_job.app_id,
            job_type = new_job.payload.type_tag(),
            "Job enqueued"
        );
        Job::try_from(created)
    }

    /// Inserts a job unless a non-terminal job with the same `job_hash`
    /// already exists, in which case that job is returned instead.
    ///
    /// Jobs without a hash are always created. Deduplication is advisory:
    /// it is enforced by this query, not by a constraint.
    pub async fn enqueue_unique(&self, new_job: NewJob) -> Result<EnqueueOutcome, StoreError> {
        let Some(hash) = new_job.job_hash.clone() else {
            return self.create_job(new_job).await.map(EnqueueOutcome::Created);
        };
        let row = new_job_row(&new_job, 0, None)?;

        let (created, job_row) = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let existing = jobs::table
                    .filter(jobs::job_hash.eq(&hash))
                    .filter(jobs::status.eq_any(ACTIVE_STATUSES))
                    .order((jobs::created_at.asc(), jobs::id.asc()))
                    .select(JobRow::as_select())
                    .first(conn)
                    .optional()?;
                if let Some(existing) = existing {
                    return Ok((false, existing));
                }

                diesel::insert_into(jobs::table).values(&row).execute(conn)?;
                let inserted = jobs::table
                    .find(&row.id)
                    .select(JobRow::as_select())
                    .first(conn)?;
                Ok((true, inserted))
            })
        });

        let job = Job::try_from(job_row)?;
        if created {
            info!(job_id = %job.id, app_id = %job.app_id, "Job enqueued");
            Ok(EnqueueOutcome::Created(job))
        } else {
            debug!(job_id = %job.id, "Duplicate enqueue matched an active job");
            Ok(EnqueueOutcome::Existing(job))
        }
    }

    /// Fetches a job by id.
    pub async fn get_job(&self, job_id: &str) -> Result<Job, StoreError> {
        let id = job_id.to_string();
        let row = with_connection!(self.dal.database, |conn| {
            Ok(jobs::table
                .find(&id)
                .select(JobRow::as_select())
                .first(conn)
                .optional()?)
        });
        row.ok_or_else(|| StoreError::job_not_found(job_id))
            .and_then(Job::try_from)
    }

    /// Jobs belonging to an application, newest first.
    pub async fn get_jobs_by_app(&self, app_id: &str, limit: i64) -> Result<Vec<Job>, StoreError> {
        let app_id = app_id.to_string();
        let rows = with_connection!(self.dal.database, |conn| {
            Ok(jobs::table
                .filter(jobs::app_id.eq(&app_id))
                .order((jobs::created_at.desc(), jobs::id.desc()))
                .limit(limit)
                .select(JobRow::as_select())
                .load(conn)?)
        });
        rows.into_iter().map(Job::try_from).collect()
    }

    /// The most recent pending or running job for an application, if any.
    ///
    /// Callers use this to refuse a second concurrent operation on the same
    /// application; "nothing active" is `Ok(None)`.
    pub async fn get_active_job_for_app(&self, app_id: &str) -> Result<Option<Job>, StoreError> {
        let app_id = app_id.to_string();
        let row = with_connection!(self.dal.database, |conn| {
            Ok(jobs::table
                .filter(jobs::app_id.eq(&app_id))
                .filter(jobs::status.eq_any(ACTIVE_STATUSES))
                .order((jobs::created_at.desc(), jobs::id.desc()))
                .select(JobRow::as_select())
                .first(conn)
                .optional()?)
        });
        row.map(Job::try_from).transpose()
    }

    /// Records progress on a non-terminal job.
    ///
    /// `progress` is clamped to 0..=100. Moving to `running` sets
    /// `started_at` only if it is still unset. Moving back to `pending`
    /// drops any claim. Terminal statuses must go through
    /// [`JobDAL::update_job_completed`].
    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: i32,
        message: Option<String>,
    ) -> Result<Job, StoreError> {
        let id = job_id.to_string();
        let progress = progress.clamp(0, 100);

        let row = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let current = current_status!(conn, &id);
                if current.is_terminal() || status.is_terminal() {
                    return Err(StoreError::InvalidTransition {
                        id: id.clone(),
                        status: current.to_string(),
                        requested: status.to_string(),
                    });
                }

                let now = now_naive();
                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&id))
                        .filter(jobs::status.eq_any(ACTIVE_STATUSES)),
                )
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::progress.eq(progress),
                    jobs::progress_message.eq(&message),
                    jobs::updated_at.eq(now),
                ))
                .execute(conn)?;

                match status {
                    JobStatus::Running => {
                        diesel::update(
                            jobs::table
                                .filter(jobs::id.eq(&id))
                                .filter(jobs::started_at.is_null()),
                        )
                        .set(jobs::started_at.eq(Some(now)))
                        .execute(conn)?;
                    }
                    JobStatus::Pending => {
                        diesel::update(jobs::table.filter(jobs::id.eq(&id)))
                            .set((
                                jobs::claimed_by.eq(None::<String>),
                                jobs::claimed_at.eq(None::<chrono::NaiveDateTime>),
                            ))
                            .execute(conn)?;
                    }
                    JobStatus::Completed | JobStatus::Failed => {}
                }

                Ok(jobs::table
                    .find(&id)
                    .select(JobRow::as_select())
                    .first(conn)?)
            })
        });

        debug!(job_id = %job_id, status = %status, progress, "Job progress updated");
        Job::try_from(row)
    }

    /// Moves a job to a terminal status.
    ///
    /// Sets `completed_at` and releases the claim. `result` is kept only for
    /// `completed` jobs and `error_message` only for `failed` ones. Progress
    /// becomes 100 on success and keeps its last value on failure.
    pub async fn update_job_completed(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> Result<Job, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: job_id.to_string(),
                status: "unknown".to_string(),
                requested: status.to_string(),
            });
        }

        let completed = status == JobStatus::Completed;
        let result_text = match result.filter(|_| completed) {
            Some(value) => Some(serde_json::to_string(&value)?),
            None => None,
        };
        let error_message = error_message.filter(|_| !completed);
        let id = job_id.to_string();

        let row = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let current = current_status!(conn, &id);
                if current.is_terminal() {
                    return Err(StoreError::InvalidTransition {
                        id: id.clone(),
                        status: current.to_string(),
                        requested: status.to_string(),
                    });
                }

                let now = now_naive();
                diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&id))
                        .filter(jobs::status.eq_any(ACTIVE_STATUSES)),
                )
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::job_result.eq(&result_text),
                    jobs::error_message.eq(&error_message),
                    jobs::completed_at.eq(Some(now)),
                    jobs::updated_at.eq(now),
                    jobs::claimed_by.eq(None::<String>),
                    jobs::claimed_at.eq(None::<chrono::NaiveDateTime>),
                ))
                .execute(conn)?;

                if completed {
                    diesel::update(jobs::table.filter(jobs::id.eq(&id)))
                        .set(jobs::progress.eq(100))
                        .execute(conn)?;
                }

                Ok(jobs::table
                    .find(&id)
                    .select(JobRow::as_select())
                    .first(conn)?)
            })
        });

        info!(job_id = %job_id, status = %status, "Job finished");
        Job::try_from(row)
    }

    /// Unclaimed pending jobs, oldest first.
    pub async fn get_pending_jobs(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = with_connection!(self.dal.database, |conn| {
            Ok(jobs::table
                .filter(jobs::status.eq(JobStatus::Pending.as_str()))
                .filter(jobs::claimed_by.is_null())
                .order((jobs::created_at.asc(), jobs::id.asc()))
                .limit(limit)
                .select(JobRow::as_select())
                .load(conn)?)
        });
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Newest-first listing with optional application and status filters.
    pub async fn list_jobs(&self, filter: JobFilter, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = with_connection!(self.dal.database, |conn| {
            let mut query = jobs::table.into_boxed();
            if let Some(app_id) = &filter.app_id {
                query = query.filter(jobs::app_id.eq(app_id.clone()));
            }
            if let Some(status) = filter.status {
                query = query.filter(jobs::status.eq(status.as_str()));
            }
            Ok(query
                .order((jobs::created_at.desc(), jobs::id.desc()))
                .limit(limit)
                .select(JobRow::as_select())
                .load(conn)?)
        });
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Flags a pending or running job as cancelled.
    ///
    /// Returns `false` when the job is already terminal or already
    /// cancelled. The executing worker decides when to stop.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, StoreError> {
        let id = job_id.to_string();
        let cancelled = with_connection!(self.dal.database, |conn| {
            conn.write_transaction::<_, StoreError, _>(|conn| {
                let now = now_naive();
                let updated = diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(&id))
                        .filter(jobs::status.eq_any(ACTIVE_STATUSES))
                        .filter(jobs::cancelled_at.is_null()),
                )
                .set((jobs::cancelled_at.eq(Some(now)), jobs::updated_at.eq(now)))
                .execute(conn)?;
                if updated == 0 {
                    // Distinguish "nothing to cancel" from "no such job"
                    current_status!(conn, &id);
                }
                Ok(updated > 0)
            })
        });

        if cancelled {
            info!(job_id = %job_id, "Job cancellation requested");
        }
        Ok(cancelled)
    }

    /// Whether cancellation has been requested for a job.
    pub async fn is_job_cancelled(&self, job_id: &str) -> Result<bool, StoreError> {
        let id = job_id.to_string();
        let cancelled_at = with_connection!(self.dal.database, |conn| {
            Ok(jobs::table
                .find(&id)
                .select(jobs::cancelled_at)
                .first::<Option<chrono::NaiveDateTime>>(conn)
                .optional()?)
        });
        match cancelled_at {
            Some(at) => Ok(at.is_some()),
            None => Err(StoreError::job_not_found(job_id)),
        }
    }
}

pub(crate) fn parse_status(id: &str, status: Option<String>) -> Result<JobStatus, StoreError> {
    let status = status.ok_or_else(|| StoreError::job_not_found(id))?;
    status.parse().map_err(|reason| StoreError::CorruptRow {
        entity: "job",
        id: id.to_string(),
        reason,
    })
}

/// Builds the insertable row for a job.
pub(crate) fn new_job_row(
    new_job: &NewJob,
    retry_count: i32,
    retry_after: Option<chrono::NaiveDateTime>,
) -> Result<NewJobRow, StoreError> {
    let (job_type, payload) = new_job.payload.to_columns()?;
    let now = now_naive();
    Ok(NewJobRow {
        id: Uuid::new_v4().to_string(),
        job_type,
        app_id: new_job.app_id.clone(),
        status: JobStatus::Pending.as_str().to_string(),
        payload,
        progress: 0,
        created_at: now,
        updated_at: now,
        retry_count,
        max_retries: new_job.max_retries,
        retry_after,
        timeout_seconds: new_job.timeout_seconds,
        job_hash: new_job.job_hash.clone(),
    })
}
