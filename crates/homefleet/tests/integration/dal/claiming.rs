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

//! Concurrency and eligibility tests for the job claim protocol.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use homefleet::models::{JobPayload, JobStatus};
use tokio::sync::Barrier;

use crate::fixtures::{
    app_update, backdate_created_at, file_dal, minutes_ago, raw_claim_state, rewrite_job_type,
    test_dal,
};

/// Several workers racing over the same queue must never share a job.
#[tokio::test]
async fn test_concurrent_claims_are_exclusive() {
    let dal = test_dal().await;

    const NUM_JOBS: usize = 20;
    const NUM_WORKERS: usize = 8;

    let mut created = HashSet::new();
    for i in 0..NUM_JOBS {
        let job = dal
            .jobs()
            .create_job(app_update(&format!("app-{}", i)))
            .await
            .expect("Failed to create job");
        created.insert(job.id);
    }

    let barrier = Arc::new(Barrier::new(NUM_WORKERS));
    let mut handles = Vec::new();
    for worker in 0..NUM_WORKERS {
        let dal = dal.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let worker_id = format!("worker-{}", worker);
            let mut claimed = Vec::new();
            while let Some(job) = dal.jobs().claim_pending_job(&worker_id).await.unwrap() {
                assert_eq!(job.claimed_by.as_deref(), Some(worker_id.as_str()));
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.await.expect("Worker task panicked"));
    }

    let unique: HashSet<_> = all_claimed.iter().cloned().collect();
    assert_eq!(
        all_claimed.len(),
        unique.len(),
        "A job was claimed by more than one worker"
    );
    assert_eq!(unique, created);
    assert!(dal.jobs().get_pending_jobs(100).await.unwrap().is_empty());
}

/// Separate processes each hold their own connection to the same file.
/// Losing a claim race there must read as "nothing to claim", never as a
/// locking error, and no job may be handed out twice.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claims_across_database_handles_are_exclusive() {
    const NUM_JOBS: usize = 60;
    const NUM_HANDLES: usize = 4;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("fleet.db");

    let mut dals = Vec::new();
    for _ in 0..NUM_HANDLES {
        dals.push(file_dal(&path).await);
    }

    let mut created = HashSet::new();
    for i in 0..NUM_JOBS {
        let job = dals[0]
            .jobs()
            .create_job(app_update(&format!("app-{}", i)))
            .await
            .expect("Failed to create job");
        created.insert(job.id);
    }

    let barrier = Arc::new(Barrier::new(NUM_HANDLES));
    let mut handles = Vec::new();
    for (node, dal) in dals.iter().cloned().enumerate() {
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let worker_id = format!("node-{}", node);
            let mut claimed = Vec::new();
            let mut errors = Vec::new();
            let mut idle_rounds = 0;
            // A lost race returns None while work remains, so stop only
            // after several empty rounds in a row.
            while idle_rounds < 5 {
                match dal.jobs().claim_pending_job(&worker_id).await {
                    Ok(Some(job)) => {
                        idle_rounds = 0;
                        claimed.push(job.id);
                    }
                    Ok(None) => {
                        idle_rounds += 1;
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Err(e) => errors.push(e.to_string()),
                }
            }
            (claimed, errors)
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        let (claimed, errors) = handle.await.expect("Worker task panicked");
        assert!(errors.is_empty(), "Claim failed: {:?}", errors);
        all_claimed.extend(claimed);
    }

    let unique: HashSet<_> = all_claimed.iter().cloned().collect();
    assert_eq!(
        all_claimed.len(),
        unique.len(),
        "A job was claimed through more than one handle"
    );
    assert_eq!(unique, created);
    assert!(dals[0].jobs().get_pending_jobs(100).await.unwrap().is_empty());
}

/// Rows whose kind this build does not recognise still flow through the
/// queue and never poison reads for their app.
#[tokio::test]
async fn test_unknown_job_type_is_claimed_and_readable() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let mut new_job = app_update("app-1");
    new_job.max_retries = 1;
    let job = jobs.create_job(new_job).await.unwrap();
    rewrite_job_type(&dal, &job.id, "compose-rollback", Some(r#"{"version":3}"#)).await;

    let claimed = jobs
        .claim_pending_job("worker-1")
        .await
        .unwrap()
        .expect("Job should be claimable");
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.type_tag(), "compose-rollback");
    assert_eq!(
        claimed.payload,
        JobPayload::Other {
            job_type: "compose-rollback".into(),
            payload: Some(r#"{"version":3}"#.into()),
        }
    );

    let by_app = jobs.get_jobs_by_app("app-1", 10).await.unwrap();
    assert_eq!(by_app.len(), 1);
    let active = jobs.get_active_job_for_app("app-1").await.unwrap();
    assert_eq!(active.map(|j| j.id), Some(job.id.clone()));

    let failed = jobs
        .update_job_completed(
            &job.id,
            JobStatus::Failed,
            None,
            Some("unsupported job type".into()),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.type_tag(), "compose-rollback");

    let retry = jobs
        .enqueue_retry(&job.id, Duration::ZERO)
        .await
        .unwrap()
        .expect("Retry should be scheduled");
    assert_eq!(retry.payload, failed.payload);
}

/// A row that fails to load must not be left claimed.
#[tokio::test]
async fn test_unloadable_row_is_not_left_claimed() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let job = jobs.create_job(app_update("app-1")).await.unwrap();
    rewrite_job_type(&dal, &job.id, "tunnel-delete", Some(r#"{"nope":1}"#)).await;

    assert!(jobs.claim_pending_job("worker-1").await.is_err());

    let (status, claimed_by) = raw_claim_state(&dal, &job.id).await;
    assert_eq!(status, "pending");
    assert_eq!(claimed_by, None);
}

#[tokio::test]
async fn test_claim_takes_oldest_first() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let newer = jobs.create_job(app_update("app-1")).await.unwrap();
    let older = jobs.create_job(app_update("app-2")).await.unwrap();
    backdate_created_at(&dal, &older.id, minutes_ago(10)).await;
    backdate_created_at(&dal, &newer.id, minutes_ago(5)).await;

    let first = jobs.claim_pending_job("w").await.unwrap().unwrap();
    assert_eq!(first.id, older.id);
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.claimed_at.is_some());
    assert!(first.started_at.is_some());

    let second = jobs.claim_pending_job("w").await.unwrap().unwrap();
    assert_eq!(second.id, newer.id);

    assert!(jobs.claim_pending_job("w").await.unwrap().is_none());
}

#[tokio::test]
async fn test_release_returns_job_to_queue() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    jobs.create_job(app_update("app-1")).await.unwrap();

    let claimed = jobs.claim_pending_job("worker-a").await.unwrap().unwrap();
    assert!(jobs.release_job_claim(&claimed.id).await.unwrap());

    let released = jobs.get_job(&claimed.id).await.unwrap();
    assert_eq!(released.status, JobStatus::Pending);
    assert!(released.claimed_by.is_none());
    assert!(released.claimed_at.is_none());

    let reclaimed = jobs.claim_pending_job("worker-b").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
    assert_eq!(reclaimed.claimed_by.as_deref(), Some("worker-b"));
    // The first start time survives the hand-over
    assert_eq!(reclaimed.started_at, claimed.started_at);

    assert!(!jobs.release_job_claim("missing").await.unwrap());
}

#[tokio::test]
async fn test_retry_waits_for_backoff() {
    let dal = test_dal().await;
    let jobs = dal.jobs();
    let job = jobs
        .create_job(app_update("app-1").with_max_retries(2))
        .await
        .unwrap();
    let claimed = jobs.claim_pending_job("w").await.unwrap().unwrap();
    jobs.update_job_completed(&claimed.id, JobStatus::Failed, None, Some("boom".into()))
        .await
        .unwrap();

    let retry = jobs
        .enqueue_retry(&job.id, Duration::from_secs(3600))
        .await
        .unwrap()
        .expect("retry should be scheduled");
    assert_ne!(retry.id, job.id);
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.status, JobStatus::Pending);
    assert!(retry.retry_after.is_some());
    assert_eq!(retry.payload, job.payload);

    assert!(jobs.claim_pending_job("w").await.unwrap().is_none());

    let immediate = jobs
        .enqueue_retry(&job.id, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    let claimed = jobs.claim_pending_job("w").await.unwrap().unwrap();
    assert_eq!(claimed.id, immediate.id);
}

#[tokio::test]
async fn test_retry_respects_limits() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let no_retries = jobs.create_job(app_update("app-1")).await.unwrap();
    jobs.update_job_completed(&no_retries.id, JobStatus::Failed, None, Some("x".into()))
        .await
        .unwrap();
    assert!(jobs
        .enqueue_retry(&no_retries.id, Duration::ZERO)
        .await
        .unwrap()
        .is_none());

    let succeeded = jobs
        .create_job(app_update("app-2").with_max_retries(3))
        .await
        .unwrap();
    jobs.update_job_completed(&succeeded.id, JobStatus::Completed, None, None)
        .await
        .unwrap();
    assert!(jobs
        .enqueue_retry(&succeeded.id, Duration::ZERO)
        .await
        .unwrap()
        .is_none());

    let cancelled = jobs
        .create_job(app_update("app-3").with_max_retries(3))
        .await
        .unwrap();
    jobs.cancel_job(&cancelled.id).await.unwrap();
    jobs.update_job_completed(&cancelled.id, JobStatus::Failed, None, Some("cancelled".into()))
        .await
        .unwrap();
    assert!(jobs
        .enqueue_retry(&cancelled.id, Duration::ZERO)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_retry_skipped_while_same_hash_is_active() {
    let dal = test_dal().await;
    let jobs = dal.jobs();

    let failed = jobs
        .create_job(app_update("app-1").with_max_retries(2).with_hash("update:app-1"))
        .await
        .unwrap();
    jobs.update_job_completed(&failed.id, JobStatus::Failed, None, Some("x".into()))
        .await
        .unwrap();
    let fresh = jobs
        .enqueue_unique(app_update("app-1").with_hash("update:app-1"))
        .await
        .unwrap();
    assert!(fresh.was_created());

    assert!(jobs
        .enqueue_retry(&failed.id, Duration::ZERO)
        .await
        .unwrap()
        .is_none());
}
