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

use reqwest::StatusCode;
use thiserror::Error;

use crate::circuit::CircuitOpenError;

/// Failure of an inter-node call.
///
/// Every variant except [`RemoteError::CircuitOpen`] names the peer so the
/// message is useful without further context.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The peer's circuit is open; no request was sent.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("node {node} has an unusable endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        node: String,
        endpoint: String,
        reason: String,
    },

    #[error("request to node {node} at {endpoint} failed: {source}")]
    Transport {
        node: String,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node {node} returned {status}: {body}")]
    Status {
        node: String,
        status: StatusCode,
        body: String,
    },

    #[error("node {node} sent a response that could not be decoded ({source}): {body}")]
    Decode {
        node: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RemoteError {
    /// True when the call was refused locally by the circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RemoteError::CircuitOpen(_))
    }

    /// HTTP status of a non-2xx response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
