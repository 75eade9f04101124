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

//! Diesel row structs and their conversions into domain models.
//!
//! Timestamps are stored as naive UTC values so the same structs load from
//! both PostgreSQL `TIMESTAMP` and SQLite `TIMESTAMP` columns.

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::database::schema::{apps, jobs, nodes};
use crate::error::StoreError;
use crate::models::{Job, JobPayload, JobStatus, NewNode, Node, NodeStatus};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub app_id: String,
    pub status: String,
    pub payload: Option<String>,
    pub progress: i32,
    pub progress_message: Option<String>,
    pub job_result: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<NaiveDateTime>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub retry_after: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub timeout_seconds: Option<i32>,
    pub job_hash: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJobRow {
    pub id: String,
    pub job_type: String,
    pub app_id: String,
    pub status: String,
    pub payload: Option<String>,
    pub progress: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub retry_count: i32,
    pub max_retries: i32,
    pub retry_after: Option<NaiveDateTime>,
    pub timeout_seconds: Option<i32>,
    pub job_hash: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = nodes)]
pub struct NodeRow {
    pub id: String,
    pub name: String,
    pub api_endpoint: String,
    pub api_key: String,
    pub is_primary: bool,
    pub status: String,
    pub last_seen: Option<NaiveDateTime>,
    pub consecutive_failures: i32,
    pub last_health_check: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = nodes)]
pub struct NewNodeRow {
    pub id: String,
    pub name: String,
    pub api_endpoint: String,
    pub api_key: String,
    pub is_primary: bool,
    pub status: String,
    pub consecutive_failures: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = apps)]
pub struct AppRow {
    pub id: String,
    pub name: String,
    pub node_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Current time truncated to what both backends store.
pub(crate) fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// `now + delay`, saturating at the largest representable timestamp.
pub(crate) fn after(now: NaiveDateTime, delay: std::time::Duration) -> NaiveDateTime {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(NaiveDateTime::MAX)
}

/// `now - delay`, saturating at the smallest representable timestamp.
pub(crate) fn before(now: NaiveDateTime, delay: std::time::Duration) -> NaiveDateTime {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(NaiveDateTime::MIN)
}

fn utc(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            entity: "job",
            id: row.id.clone(),
            reason,
        };

        let status = row.status.parse::<JobStatus>().map_err(corrupt)?;
        let payload =
            JobPayload::from_columns(&row.job_type, row.payload.as_deref()).map_err(corrupt)?;
        let result = row
            .job_result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("result is not JSON: {}", e)))?;

        Ok(Job {
            id: row.id,
            app_id: row.app_id,
            payload,
            status,
            progress: row.progress,
            progress_message: row.progress_message,
            result,
            error_message: row.error_message,
            started_at: row.started_at.map(utc),
            completed_at: row.completed_at.map(utc),
            created_at: utc(row.created_at),
            updated_at: utc(row.updated_at),
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at.map(utc),
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            retry_after: row.retry_after.map(utc),
            cancelled_at: row.cancelled_at.map(utc),
            timeout_seconds: row.timeout_seconds,
            job_hash: row.job_hash,
        })
    }
}

impl TryFrom<NodeRow> for Node {
    type Error = StoreError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<NodeStatus>()
            .map_err(|reason| StoreError::CorruptRow {
                entity: "node",
                id: row.id.clone(),
                reason,
            })?;

        Ok(Node {
            id: row.id,
            name: row.name,
            api_endpoint: row.api_endpoint,
            api_key: row.api_key,
            is_primary: row.is_primary,
            status,
            last_seen: row.last_seen.map(utc),
            consecutive_failures: row.consecutive_failures,
            last_health_check: row.last_health_check.map(utc),
            created_at: utc(row.created_at),
            updated_at: utc(row.updated_at),
        })
    }
}

impl NewNodeRow {
    pub(crate) fn from_new(node: NewNode, now: NaiveDateTime) -> Self {
        NewNodeRow {
            id: node.id,
            name: node.name,
            api_endpoint: node.api_endpoint,
            api_key: node.api_key,
            is_primary: node.is_primary,
            status: NodeStatus::Unknown.as_str().to_string(),
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
