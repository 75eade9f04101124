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

//! Inter-node RPC client.
//!
//! [`NodeClient`] talks to the internal API of peer nodes. Calls on the hot
//! path (health, apps, stats, tunnels, containers) are gated by the shared
//! [`crate::circuit::CircuitBreaker`]; an open circuit turns a call into an
//! immediate [`RemoteError::CircuitOpen`] without touching the network.

mod client;
mod error;
pub mod types;

pub use client::{NodeClient, API_KEY_HEADER, NODE_ID_HEADER};
pub use error::RemoteError;
