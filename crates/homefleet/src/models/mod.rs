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

//! Domain models for jobs and cluster nodes.
//!
//! These are the types handed to callers; the diesel row structs they are
//! built from live in [`crate::dal::models`].

pub mod job;
pub mod node;

pub use job::{EnqueueOutcome, Job, JobPayload, JobStatus, JobType, NewJob};
pub use node::{NewNode, Node, NodeStatus};
