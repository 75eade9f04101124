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

//! Per-peer circuit breaker.
//!
//! Each peer node gets an independent Closed/Open/Half-Open state machine,
//! created lazily on its first recorded failure. A peer with no entry is
//! treated as closed. State is process-local: it is never persisted, not
//! shared with other processes, and lost on restart.
//!
//! Every operation runs inside one critical section on the breaker's mutex,
//! including the lazy Open to Half-Open transition evaluated by
//! [`CircuitBreaker::is_open`], so concurrent checks cannot both observe an
//! expired timeout and apply the transition twice.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// Breaker state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Snapshot of one peer's circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub half_open_successes: u32,
    /// Time since the most recent failure, if any.
    #[serde(skip)]
    pub since_last_failure: Option<Duration>,
    /// Time spent in the current state.
    #[serde(skip)]
    pub in_state_for: Duration,
}

impl Default for CircuitStats {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            half_open_successes: 0,
            since_last_failure: None,
            in_state_for: Duration::ZERO,
        }
    }
}

/// Returned instead of performing a call while a peer's circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit open for node {node_id}: peer temporarily unavailable ({} failures)", .stats.failures)]
pub struct CircuitOpenError {
    pub node_id: String,
    pub stats: CircuitStats,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    half_open_successes: u32,
}

impl Circuit {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            last_state_change: now,
            half_open_successes: 0,
        }
    }

    fn transition(&mut self, state: CircuitState, now: Instant) {
        self.state = state;
        self.last_state_change = now;
    }

    fn stats(&self, now: Instant) -> CircuitStats {
        CircuitStats {
            state: self.state,
            failures: self.failures,
            successes: self.successes,
            half_open_successes: self.half_open_successes,
            since_last_failure: self.last_failure_time.map(|t| now.duration_since(t)),
            in_state_for: now.duration_since(self.last_state_change),
        }
    }
}

/// Process-wide registry of per-peer circuits.
///
/// Create one per process and share it behind an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether calls to `node_id` should fail fast.
    ///
    /// An open circuit whose timeout has elapsed since its last state change
    /// moves to half-open here and the call is allowed.
    pub fn is_open(&self, node_id: &str) -> bool {
        let mut circuits = self.circuits.lock();
        self.gate(&mut circuits, node_id, Instant::now()).is_some()
    }

    /// Gate for a call: `Err` with the current stats when the circuit is open.
    ///
    /// The decision and the stats come from the same lock acquisition.
    pub fn check(&self, node_id: &str) -> Result<(), CircuitOpenError> {
        let mut circuits = self.circuits.lock();
        match self.gate(&mut circuits, node_id, Instant::now()) {
            Some(stats) => Err(CircuitOpenError {
                node_id: node_id.to_string(),
                stats,
            }),
            None => Ok(()),
        }
    }

    /// Stats of a circuit that should fail fast, or `None` to let the call
    /// through. Caller holds the lock.
    fn gate(
        &self,
        circuits: &mut HashMap<String, Circuit>,
        node_id: &str,
        now: Instant,
    ) -> Option<CircuitStats> {
        let circuit = circuits.get_mut(node_id)?;

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => None,
            CircuitState::Open => {
                if now.duration_since(circuit.last_state_change) >= self.config.timeout {
                    circuit.transition(CircuitState::HalfOpen, now);
                    circuit.half_open_successes = 0;
                    info!(node_id = %node_id, "Circuit half-open, allowing probe");
                    None
                } else {
                    Some(circuit.stats(now))
                }
            }
        }
    }

    /// Records a successful call. A peer without an entry stays without one.
    pub fn record_success(&self, node_id: &str) {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(node_id) else {
            return;
        };

        circuit.successes = circuit.successes.saturating_add(1);
        match circuit.state {
            CircuitState::Closed => {
                circuit.failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.half_open_successes {
                    circuit.transition(CircuitState::Closed, now);
                    circuit.failures = 0;
                    circuit.successes = 0;
                    circuit.half_open_successes = 0;
                    info!(node_id = %node_id, "Circuit closed");
                }
            }
            // A call that started before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Records a failed call, creating the peer's circuit if needed.
    pub fn record_failure(&self, node_id: &str) {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .entry(node_id.to_string())
            .or_insert_with(|| Circuit::new(now));

        circuit.failures = circuit.failures.saturating_add(1);
        circuit.last_failure_time = Some(now);
        match circuit.state {
            CircuitState::Closed => {
                if circuit.failures >= self.config.failure_threshold {
                    circuit.transition(CircuitState::Open, now);
                    warn!(
                        node_id = %node_id,
                        failures = circuit.failures,
                        "Circuit opened"
                    );
                } else {
                    debug!(node_id = %node_id, failures = circuit.failures, "Peer call failed");
                }
            }
            CircuitState::HalfOpen => {
                circuit.transition(CircuitState::Open, now);
                circuit.half_open_successes = 0;
                warn!(node_id = %node_id, "Probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state; `Closed` for peers without an entry.
    pub fn get_state(&self, node_id: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(node_id)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn get_stats(&self, node_id: &str) -> CircuitStats {
        let now = Instant::now();
        self.circuits
            .lock()
            .get(node_id)
            .map(|c| c.stats(now))
            .unwrap_or_default()
    }

    /// Stats for every peer with an entry, sorted by node id.
    pub fn all_stats(&self) -> Vec<(String, CircuitStats)> {
        let now = Instant::now();
        let mut all: Vec<_> = self
            .circuits
            .lock()
            .iter()
            .map(|(id, c)| (id.clone(), c.stats(now)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Forgets a peer's circuit, returning it to the default closed state.
    pub fn reset(&self, node_id: &str) {
        if self.circuits.lock().remove(node_id).is_some() {
            info!(node_id = %node_id, "Circuit reset");
        }
    }
}
