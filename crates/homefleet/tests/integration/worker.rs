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

//! Worker runtime: outcomes, retries, cancellation and timeouts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use homefleet::models::{Job, JobStatus};
use homefleet::worker::{JobContext, JobFailure, JobHandler, JobWorker};
use homefleet::{WorkerConfig, DAL};
use serde_json::{json, Value};

use crate::fixtures::{app_update, test_dal};

/// Behaviour is picked from the job's app id.
struct ScriptedHandler;

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn handle(&self, job: &Job, ctx: &JobContext) -> Result<Option<Value>, JobFailure> {
        match job.app_id.as_str() {
            "ok" => {
                ctx.report_progress(50, Some("halfway".into())).await?;
                Ok(Some(json!({"updated": true})))
            }
            "fail" => Err(JobFailure::failed("image pull failed")),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(None)
            }
            "watch" => loop {
                if ctx.is_cancelled().await? {
                    return Err(JobFailure::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            },
            other => Err(JobFailure::failed(format!("unexpected app {}", other))),
        }
    }
}

fn worker(dal: &DAL) -> JobWorker {
    JobWorker::new(
        dal.clone(),
        Arc::new(ScriptedHandler),
        WorkerConfig {
            worker_id: "worker-test".into(),
            poll_interval: Duration::from_millis(50),
            retry_base_delay: Duration::from_secs(10),
            ..WorkerConfig::default()
        },
    )
}

#[tokio::test]
async fn test_run_once_with_empty_queue() {
    let dal = test_dal().await;
    assert!(worker(&dal).run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn test_successful_job_completes() {
    let dal = test_dal().await;
    let job = dal.jobs().create_job(app_update("ok")).await.unwrap();

    let report = worker(&dal).run_once().await.unwrap().unwrap();
    assert_eq!(report.job_id, job.id);
    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.retry_job_id.is_none());

    let done = dal.jobs().get_job(&job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.progress_message.as_deref(), Some("halfway"));
    assert_eq!(done.result, Some(json!({"updated": true})));
    assert!(done.claimed_by.is_none());
}

#[tokio::test]
async fn test_failed_job_schedules_retry() {
    let dal = test_dal().await;
    let job = dal
        .jobs()
        .create_job(app_update("fail").with_max_retries(2))
        .await
        .unwrap();
    let worker = worker(&dal);

    let report = worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed);
    let retry_id = report.retry_job_id.expect("a retry should be scheduled");

    let failed = dal.jobs().get_job(&job.id).await.unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("image pull failed"));

    let retry = dal.jobs().get_job(&retry_id).await.unwrap();
    assert_eq!(retry.status, JobStatus::Pending);
    assert_eq!(retry.retry_count, 1);
    assert!(retry.retry_after.unwrap() > chrono::Utc::now());

    // Still backing off
    assert!(worker.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_job_without_retries_stays_failed() {
    let dal = test_dal().await;
    dal.jobs().create_job(app_update("fail")).await.unwrap();

    let report = worker(&dal).run_once().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.retry_job_id.is_none());
    assert!(dal.jobs().get_pending_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_job_cancelled_before_start_is_not_run() {
    let dal = test_dal().await;
    let job = dal
        .jobs()
        .create_job(app_update("ok").with_max_retries(3))
        .await
        .unwrap();
    dal.jobs().cancel_job(&job.id).await.unwrap();

    let report = worker(&dal).run_once().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.retry_job_id.is_none());

    let cancelled = dal.jobs().get_job(&job.id).await.unwrap();
    assert_eq!(cancelled.error_message.as_deref(), Some("job cancelled"));
    // The handler never reported progress
    assert!(cancelled.progress_message.is_none());
}

#[tokio::test]
async fn test_running_job_observes_cancellation() {
    let dal = test_dal().await;
    let job = dal
        .jobs()
        .create_job(app_update("watch").with_max_retries(3))
        .await
        .unwrap();

    let worker = Arc::new(worker(&dal));
    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run_once().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dal.jobs().cancel_job(&job.id).await.unwrap());

    let report = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("worker did not stop after cancellation")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.retry_job_id.is_none());
}

#[tokio::test]
async fn test_job_timeout_fails_job() {
    let dal = test_dal().await;
    let job = dal
        .jobs()
        .create_job(app_update("slow").with_timeout_seconds(1))
        .await
        .unwrap();

    let report = worker(&dal).run_once().await.unwrap().unwrap();
    assert_eq!(report.status, JobStatus::Failed);

    let timed_out = dal.jobs().get_job(&job.id).await.unwrap();
    assert_eq!(
        timed_out.error_message.as_deref(),
        Some("job exceeded its 1s timeout")
    );
}

#[tokio::test]
async fn test_run_loop_processes_and_stops() {
    let dal = test_dal().await;
    let worker = Arc::new(worker(&dal));
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(stop_rx).await })
    };

    let job = dal.jobs().create_job(app_update("ok")).await.unwrap();
    worker.notifier().notify_one();

    let mut status = JobStatus::Pending;
    for _ in 0..100 {
        status = dal.jobs().get_job(&job.id).await.unwrap().status;
        if status == JobStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, JobStatus::Completed);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not shut down")
        .unwrap();
}

#[tokio::test]
async fn test_maintenance_pass_reports_counts() {
    let dal = test_dal().await;
    let report = worker(&dal).run_maintenance().await.unwrap();
    assert_eq!(report.stale_failed, 0);
    assert_eq!(report.cleaned_up, 0);
}
