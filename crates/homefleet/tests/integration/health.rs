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

//! Peer health monitor against live and dead peers.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use homefleet::health::{HealthMonitor, PeerHealth};
use homefleet::models::NodeStatus;
use homefleet::{
    CircuitBreaker, CircuitBreakerConfig, ClientConfig, HealthMonitorConfig, NewNode, NodeClient,
};
use serde_json::json;

use crate::fixtures::{spawn_server, test_dal};

fn node(id: &str, endpoint: &str, primary: bool) -> NewNode {
    NewNode {
        id: id.to_string(),
        name: id.to_string(),
        api_endpoint: endpoint.to_string(),
        api_key: "shared-secret".to_string(),
        is_primary: primary,
    }
}

#[tokio::test]
async fn test_check_all_updates_registry() {
    let dal = test_dal().await;
    let live = spawn_server(Router::new().route(
        "/api/internal/health",
        get(|| async { Json(json!({"status": "ok"})) }),
    ))
    .await;

    let nodes = dal.nodes();
    nodes.create_node(node("local", "http://127.0.0.1:1", true)).await.unwrap();
    nodes.create_node(node("live", &live, false)).await.unwrap();
    nodes.create_node(node("dead", "http://127.0.0.1:1", false)).await.unwrap();

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        timeout: Duration::from_secs(60),
        half_open_successes: 1,
    }));
    let client = NodeClient::new("local", breaker, &ClientConfig::default()).unwrap();
    let monitor = HealthMonitor::new(
        dal.clone(),
        client,
        "local",
        HealthMonitorConfig {
            interval: Duration::from_secs(30),
            offline_after: 1,
        },
    );

    let checks = monitor.check_all().await.unwrap();
    assert_eq!(checks.len(), 2, "the local node is never probed");
    for check in &checks {
        match check.node_id.as_str() {
            "live" => assert_eq!(check.health, PeerHealth::Healthy),
            "dead" => assert!(matches!(check.health, PeerHealth::Unhealthy { failures: 1, .. })),
            other => panic!("unexpected node {}", other),
        }
    }

    let live = nodes.get_node("live").await.unwrap().unwrap();
    assert_eq!(live.status, NodeStatus::Online);
    let dead = nodes.get_node("dead").await.unwrap().unwrap();
    assert_eq!(dead.status, NodeStatus::Offline);
    assert_eq!(dead.consecutive_failures, 1);

    // The dead peer's circuit is now open, so it is skipped without a new failure
    let checks = monitor.check_all().await.unwrap();
    let dead_check = checks.iter().find(|c| c.node_id == "dead").unwrap();
    assert!(matches!(dead_check.health, PeerHealth::CircuitOpen(_)));
    let dead = nodes.get_node("dead").await.unwrap().unwrap();
    assert_eq!(dead.consecutive_failures, 1);
}
