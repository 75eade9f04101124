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

//! Job store lifecycle: creation, progress, completion, cancellation,
//! deduplication, the stale sweep and retention.

use homefleet::dal::jobs::JobFilter;
use homefleet::models::{JobPayload, JobStatus, JobType};
use homefleet::{NewJob, StoreError};
use serde_json::json;
use std::time::Duration;

use crate::fixtures::{app_update, backdate_created_at, backdate_updated_at, minutes_ago, test_dal};

#[tokio::test]
async fn test_create_job_starts_pending() {
    let dal = test_dal().await;
    let job = dal
        .jobs()
        .create_job(NewJob::new(
            "app-1",
            JobPayload::AppCreate {
                name: "wiki".into(),
                compose: "services: {}".into(),
            },
        ))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.job_type(), Some(JobType::AppCreate));
    assert_eq!(job.progress, 0);
    assert!(job.claimed_by.is_none());
    assert!(job.started_at.is_none());
    assert_eq!(job.retry_count, 0);

    let fetched = dal.jobs().get_job(&job.id).await.unwrap();
    assert_eq!(fetched, job);
}

#[tokio::test]
async fn test_get_missing_job_is_not_found() {
    let dal = test_dal().await;
    let err = dal.jobs().get_job("does-not-exist").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_progress_updates_clamp_and_keep_started_at() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    let job = jobs.create_job(app_update("app-1")).await.unwrap();

    let first = jobs
        .update_job_status(&job.id, JobStatus::Running, 150, Some("pulling".into()))
        .await
        .unwrap();
    assert_eq!(first.status, JobStatus::Running);
    assert_eq!(first.progress, 100);
    assert_eq!(first.progress_message.as_deref(), Some("pulling"));
    let started = first.started_at.expect("started_at set on first running update");

    let second = jobs
        .update_job_status(&job.id, JobStatus::Running, -5, None)
        .await
        .unwrap();
    assert_eq!(second.progress, 0);
    assert_eq!(second.started_at, Some(started));
}

#[tokio::test]
async fn test_update_status_rejects_terminal() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    let job = jobs.create_job(app_update("app-1")).await.unwrap();

    let err = jobs
        .update_job_status(&job.id, JobStatus::Completed, 100, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    jobs.update_job_completed(&job.id, JobStatus::Completed, None, None)
        .await
        .unwrap();
    let err = jobs
        .update_job_status(&job.id, JobStatus::Running, 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_complete_stores_result_and_clears_claim() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    jobs.create_job(app_update("app-1")).await.unwrap();
    let claimed = jobs.claim_pending_job("worker-a").await.unwrap().unwrap();

    let done = jobs
        .update_job_completed(
            &claimed.id,
            JobStatus::Completed,
            Some(json!({"containers": 3})),
            Some("ignored".into()),
        )
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.result, Some(json!({"containers": 3})));
    assert!(done.error_message.is_none());
    assert!(done.completed_at.is_some());
    assert!(done.claimed_by.is_none());
    assert!(done.claimed_at.is_none());

    let again = jobs
        .update_job_completed(&claimed.id, JobStatus::Failed, None, Some("late".into()))
        .await
        .unwrap_err();
    assert!(matches!(again, StoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_fail_stores_error_only() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    let job = jobs.create_job(app_update("app-1")).await.unwrap();
    jobs.update_job_status(&job.id, JobStatus::Running, 40, None)
        .await
        .unwrap();

    let failed = jobs
        .update_job_completed(
            &job.id,
            JobStatus::Failed,
            Some(json!({"partial": true})),
            Some("docker pull failed".into()),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 40);
    assert!(failed.result.is_none());
    assert_eq!(failed.error_message.as_deref(), Some("docker pull failed"));
}

#[tokio::test]
async fn test_active_job_for_app() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    assert!(jobs.get_active_job_for_app("app-1").await.unwrap().is_none());

    let job = jobs.create_job(app_update("app-1")).await.unwrap();
    jobs.create_job(app_update("app-2")).await.unwrap();

    let active = jobs.get_active_job_for_app("app-1").await.unwrap().unwrap();
    assert_eq!(active.id, job.id);

    jobs.update_job_completed(&job.id, JobStatus::Failed, None, Some("boom".into()))
        .await
        .unwrap();
    assert!(jobs.get_active_job_for_app("app-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_sets_flag_once() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    let job = jobs.create_job(app_update("app-1")).await.unwrap();

    assert!(!jobs.is_job_cancelled(&job.id).await.unwrap());
    assert!(jobs.cancel_job(&job.id).await.unwrap());
    assert!(jobs.is_job_cancelled(&job.id).await.unwrap());
    assert!(!jobs.cancel_job(&job.id).await.unwrap());

    // Cancellation is a request; the status is unchanged until a worker acts
    let fetched = jobs.get_job(&job.id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Pending);
    assert!(fetched.is_cancelled());
}

#[tokio::test]
async fn test_cancel_terminal_and_missing() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    let job = jobs.create_job(app_update("app-1")).await.unwrap();
    jobs.update_job_completed(&job.id, JobStatus::Completed, None, None)
        .await
        .unwrap();

    assert!(!jobs.cancel_job(&job.id).await.unwrap());
    assert!(jobs.cancel_job("missing").await.unwrap_err().is_not_found());
    assert!(jobs.is_job_cancelled("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_enqueue_unique_deduplicates_active_jobs() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let first = jobs
        .enqueue_unique(app_update("app-1").with_hash("update:app-1"))
        .await
        .unwrap();
    assert!(first.was_created());

    let second = jobs
        .enqueue_unique(app_update("app-1").with_hash("update:app-1"))
        .await
        .unwrap();
    assert!(!second.was_created());
    assert_eq!(second.job().id, first.job().id);

    jobs.update_job_completed(&first.job().id, JobStatus::Completed, None, None)
        .await
        .unwrap();
    let third = jobs
        .enqueue_unique(app_update("app-1").with_hash("update:app-1"))
        .await
        .unwrap();
    assert!(third.was_created());
    assert_ne!(third.job().id, first.job().id);
}

#[tokio::test]
async fn test_list_jobs_filters_and_orders() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let old = jobs.create_job(app_update("app-1")).await.unwrap();
    let new = jobs.create_job(app_update("app-1")).await.unwrap();
    let other = jobs.create_job(app_update("app-2")).await.unwrap();
    backdate_created_at(&dal, &old.id, minutes_ago(10)).await;
    backdate_created_at(&dal, &new.id, minutes_ago(5)).await;
    jobs.update_job_completed(&other.id, JobStatus::Completed, None, None)
        .await
        .unwrap();

    let app1 = jobs
        .list_jobs(
            JobFilter {
                app_id: Some("app-1".into()),
                status: None,
            },
            10,
        )
        .await
        .unwrap();
    let ids: Vec<_> = app1.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![new.id.as_str(), old.id.as_str()]);

    let completed = jobs
        .list_jobs(
            JobFilter {
                app_id: None,
                status: Some(JobStatus::Completed),
            },
            10,
        )
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, other.id);

    let by_app = jobs.get_jobs_by_app("app-1", 1).await.unwrap();
    assert_eq!(by_app.len(), 1);
    assert_eq!(by_app[0].id, new.id);
}

#[tokio::test]
async fn test_stale_sweep_only_touches_quiet_running_jobs() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let quiet = jobs.create_job(app_update("app-1")).await.unwrap();
    let busy = jobs.create_job(app_update("app-2")).await.unwrap();
    let waiting = jobs.create_job(app_update("app-3")).await.unwrap();
    let done = jobs.create_job(app_update("app-4")).await.unwrap();
    let broken = jobs.create_job(app_update("app-5")).await.unwrap();

    let done = jobs
        .update_job_completed(&done.id, JobStatus::Completed, None, None)
        .await
        .unwrap();
    let broken = jobs
        .update_job_completed(
            &broken.id,
            JobStatus::Failed,
            None,
            Some("compose up exited with 1".into()),
        )
        .await
        .unwrap();
    jobs.update_job_status(&quiet.id, JobStatus::Running, 10, None)
        .await
        .unwrap();
    jobs.update_job_status(&busy.id, JobStatus::Running, 10, None)
        .await
        .unwrap();
    backdate_updated_at(&dal, &quiet.id, minutes_ago(45)).await;
    // Old but still pending: not the sweep's business
    backdate_updated_at(&dal, &waiting.id, minutes_ago(45)).await;
    // Finished long ago: already terminal
    backdate_updated_at(&dal, &done.id, minutes_ago(45)).await;
    backdate_updated_at(&dal, &broken.id, minutes_ago(45)).await;

    let failed = jobs
        .mark_stale_jobs_as_failed(Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(failed, 1);

    let quiet = jobs.get_job(&quiet.id).await.unwrap();
    assert_eq!(quiet.status, JobStatus::Failed);
    assert!(quiet.completed_at.is_some());
    let message = quiet.error_message.unwrap();
    assert!(message.contains("no progress"), "unexpected message: {}", message);
    assert!(message.contains("1800s"), "unexpected message: {}", message);

    assert_eq!(jobs.get_job(&busy.id).await.unwrap().status, JobStatus::Running);
    assert_eq!(jobs.get_job(&waiting.id).await.unwrap().status, JobStatus::Pending);

    let done_after = jobs.get_job(&done.id).await.unwrap();
    assert_eq!(done_after.status, JobStatus::Completed);
    assert_eq!(done_after.error_message, None);
    assert_eq!(done_after.completed_at, done.completed_at);

    let broken_after = jobs.get_job(&broken.id).await.unwrap();
    assert_eq!(broken_after.status, JobStatus::Failed);
    assert_eq!(
        broken_after.error_message.as_deref(),
        Some("compose up exited with 1")
    );
    assert_eq!(broken_after.completed_at, broken.completed_at);

    let again = jobs
        .mark_stale_jobs_as_failed(Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_cleanup_keeps_newest_terminal_jobs_per_app() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let mut app1 = Vec::new();
    for i in 0..20 {
        let job = jobs.create_job(app_update("app-1")).await.unwrap();
        jobs.update_job_completed(&job.id, JobStatus::Completed, None, None)
            .await
            .unwrap();
        backdate_created_at(&dal, &job.id, minutes_ago(100 - i)).await;
        app1.push(job.id);
    }
    let active = jobs.create_job(app_update("app-1")).await.unwrap();
    backdate_created_at(&dal, &active.id, minutes_ago(500)).await;

    let mut app2 = Vec::new();
    for i in 0..3 {
        let job = jobs.create_job(app_update("app-2")).await.unwrap();
        jobs.update_job_completed(&job.id, JobStatus::Failed, None, Some("x".into()))
            .await
            .unwrap();
        backdate_created_at(&dal, &job.id, minutes_ago(50 - i)).await;
        app2.push(job.id);
    }

    let deleted = jobs.cleanup_old_completed_jobs("app-1", 5).await.unwrap();
    assert_eq!(deleted, 15);

    let remaining = jobs.get_jobs_by_app("app-1", 100).await.unwrap();
    assert_eq!(remaining.len(), 6);
    for id in &app1[15..] {
        assert!(remaining.iter().any(|j| &j.id == id), "newest job {} was deleted", id);
    }
    assert!(remaining.iter().any(|j| j.id == active.id));

    let deleted = jobs.cleanup_all_old_completed_jobs(2).await.unwrap();
    // app-1 drops 3 more, app-2 drops 1
    assert_eq!(deleted, 4);
    let app2_left = jobs.get_jobs_by_app("app-2", 100).await.unwrap();
    let ids: Vec<_> = app2_left.iter().map(|j| j.id.clone()).collect();
    assert_eq!(ids, vec![app2[2].clone(), app2[1].clone()]);
}
