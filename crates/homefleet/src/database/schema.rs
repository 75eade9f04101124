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

//! Diesel table definitions shared by both backends.
//!
//! Column types are limited to ones that map identically on PostgreSQL and
//! SQLite (`Text`, `Integer`, `Bool`, `Timestamp`), so a single schema serves
//! both connection types.

diesel::table! {
    jobs (id) {
        id -> Text,
        #[sql_name = "type"]
        job_type -> Text,
        app_id -> Text,
        status -> Text,
        payload -> Nullable<Text>,
        progress -> Integer,
        progress_message -> Nullable<Text>,
        #[sql_name = "result"]
        job_result -> Nullable<Text>,
        error_message -> Nullable<Text>,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        claimed_by -> Nullable<Text>,
        claimed_at -> Nullable<Timestamp>,
        retry_count -> Integer,
        max_retries -> Integer,
        retry_after -> Nullable<Timestamp>,
        cancelled_at -> Nullable<Timestamp>,
        timeout_seconds -> Nullable<Integer>,
        job_hash -> Nullable<Text>,
    }
}

diesel::table! {
    nodes (id) {
        id -> Text,
        name -> Text,
        api_endpoint -> Text,
        api_key -> Text,
        is_primary -> Bool,
        status -> Text,
        last_seen -> Nullable<Timestamp>,
        consecutive_failures -> Integer,
        last_health_check -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    apps (id) {
        id -> Text,
        name -> Text,
        node_id -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(jobs, nodes, apps);
