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

//! Shared helpers for integration tests.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use homefleet::dal::models::AppRow;
use homefleet::database::schema::{apps, jobs};
use homefleet::models::JobPayload;
use homefleet::{Database, NewJob, DAL};
use uuid::Uuid;

/// A freshly migrated, private in-memory database.
pub async fn test_dal() -> DAL {
    let url = format!("file:homefleet_{}?mode=memory&cache=shared", Uuid::new_v4().simple());
    let database = Database::new(&url, 1).expect("Failed to open test database");
    database
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    DAL::new(database)
}

pub fn app_update(app_id: &str) -> NewJob {
    NewJob::new(app_id, JobPayload::AppUpdate { pull_images: true })
}

pub fn minutes_ago(minutes: i64) -> NaiveDateTime {
    (Utc::now() - chrono::Duration::minutes(minutes)).naive_utc()
}

/// Overwrites a job's `updated_at`, simulating a worker that went quiet.
pub async fn backdate_updated_at(dal: &DAL, job_id: &str, at: NaiveDateTime) {
    let id = job_id.to_string();
    let conn = dal.database().get_sqlite_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::updated_at.eq(at))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}

/// Rewrites a job's `type` and `payload` columns, simulating a row written
/// by a node that knows job kinds this build does not.
pub async fn rewrite_job_type(dal: &DAL, job_id: &str, job_type: &str, payload: Option<&str>) {
    let id = job_id.to_string();
    let job_type = job_type.to_string();
    let payload = payload.map(str::to_string);
    let conn = dal.database().get_sqlite_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set((jobs::job_type.eq(job_type), jobs::payload.eq(payload)))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}

/// Reads a job's `status` and `claimed_by` columns without loading the row.
pub async fn raw_claim_state(dal: &DAL, job_id: &str) -> (String, Option<String>) {
    let id = job_id.to_string();
    let conn = dal.database().get_sqlite_connection().await.unwrap();
    conn.interact(move |conn| {
        jobs::table
            .find(id)
            .select((jobs::status, jobs::claimed_by))
            .first::<(String, Option<String>)>(conn)
    })
    .await
    .unwrap()
    .unwrap()
}

/// A migrated database handle on a file, opened the way each node process
/// opens its own.
pub async fn file_dal(path: &std::path::Path) -> DAL {
    let database = Database::new(&path.to_string_lossy(), 1).expect("Failed to open database file");
    database
        .run_migrations()
        .await
        .expect("Failed to run migrations");
    DAL::new(database)
}

pub async fn backdate_created_at(dal: &DAL, job_id: &str, at: NaiveDateTime) {
    let id = job_id.to_string();
    let conn = dal.database().get_sqlite_connection().await.unwrap();
    conn.interact(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::created_at.eq(at))
            .execute(conn)
    })
    .await
    .unwrap()
    .unwrap();
}

pub async fn insert_app(dal: &DAL, name: &str, node_id: Option<&str>) -> String {
    let now = Utc::now().naive_utc();
    let row = AppRow {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        node_id: node_id.map(str::to_string),
        created_at: now,
        updated_at: now,
    };
    let id = row.id.clone();
    let conn = dal.database().get_sqlite_connection().await.unwrap();
    conn.interact(move |conn| diesel::insert_into(apps::table).values(&row).execute(conn))
        .await
        .unwrap()
        .unwrap();
    id
}

pub async fn app_node(dal: &DAL, app_id: &str) -> Option<String> {
    let id = app_id.to_string();
    let conn = dal.database().get_sqlite_connection().await.unwrap();
    conn.interact(move |conn| {
        apps::table
            .find(id)
            .select(apps::node_id)
            .first::<Option<String>>(conn)
    })
    .await
    .unwrap()
    .unwrap()
}

/// Serves `router` on an ephemeral localhost port; returns its base URL.
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A peer row pointing at `endpoint`, not stored anywhere.
pub fn peer(id: &str, endpoint: &str) -> homefleet::Node {
    let now = Utc::now();
    homefleet::Node {
        id: id.to_string(),
        name: format!("{}-name", id),
        api_endpoint: endpoint.to_string(),
        api_key: "peer-secret".to_string(),
        is_primary: false,
        status: homefleet::NodeStatus::Unknown,
        last_seen: None,
        consecutive_failures: 0,
        last_health_check: None,
        created_at: now,
        updated_at: now,
    }
}
