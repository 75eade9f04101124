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

use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::RemoteError;
use super::types::{
    AppStats, ComposeVersion, CreateAppRequest, DnsRecordRequest, HealthResponse, LogsResponse,
    QuickTunnel, RemoteApp, Settings, SystemStats, Tunnel, UpdateAppRequest,
    UpdateIngressRequest,
};
use crate::circuit::CircuitBreaker;
use crate::config::ClientConfig;
use crate::models::Node;

/// Header carrying the calling node's id.
pub const NODE_ID_HEADER: &str = "X-Node-ID";
/// Header carrying the shared inter-node secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Whether a call consults and feeds the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Breaker,
    Bypass,
}

/// Authenticated HTTP client for peers' internal APIs.
///
/// Breaker-gated calls fail fast with [`RemoteError::CircuitOpen`] while a
/// peer's circuit is open, and report every outcome back to the breaker.
/// Administrative calls (settings, compose versions) bypass the breaker.
#[derive(Clone)]
pub struct NodeClient {
    http: Client,
    breaker: Arc<CircuitBreaker>,
    local_node_id: String,
}

impl NodeClient {
    pub fn new(
        local_node_id: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        config: &ClientConfig,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::with_http_client(local_node_id, breaker, http))
    }

    pub fn with_http_client(
        local_node_id: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        http: Client,
    ) -> Self {
        Self {
            http,
            breaker,
            local_node_id: local_node_id.into(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    // Health and system

    pub async fn health_check(&self, node: &Node) -> Result<HealthResponse, RemoteError> {
        self.call_json(node, Method::GET, &["health"], None::<&()>, Gate::Breaker)
            .await
    }

    pub async fn system_stats(&self, node: &Node) -> Result<SystemStats, RemoteError> {
        self.call_json(node, Method::GET, &["system", "stats"], None::<&()>, Gate::Breaker)
            .await
    }

    // Applications

    pub async fn list_apps(&self, node: &Node) -> Result<Vec<RemoteApp>, RemoteError> {
        self.call_json(node, Method::GET, &["apps"], None::<&()>, Gate::Breaker)
            .await
    }

    pub async fn get_app(&self, node: &Node, app_id: &str) -> Result<RemoteApp, RemoteError> {
        self.call_json(node, Method::GET, &["apps", app_id], None::<&()>, Gate::Breaker)
            .await
    }

    pub async fn create_app(
        &self,
        node: &Node,
        request: &CreateAppRequest,
    ) -> Result<RemoteApp, RemoteError> {
        self.call_json(node, Method::POST, &["apps"], Some(request), Gate::Breaker)
            .await
    }

    pub async fn update_app(
        &self,
        node: &Node,
        app_id: &str,
        request: &UpdateAppRequest,
    ) -> Result<RemoteApp, RemoteError> {
        self.call_json(node, Method::PUT, &["apps", app_id], Some(request), Gate::Breaker)
            .await
    }

    pub async fn delete_app(&self, node: &Node, app_id: &str) -> Result<(), RemoteError> {
        self.call_unit(node, Method::DELETE, &["apps", app_id], None::<&()>, Gate::Breaker)
            .await
    }

    pub async fn start_app(&self, node: &Node, app_id: &str) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::POST,
            &["apps", app_id, "start"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    pub async fn stop_app(&self, node: &Node, app_id: &str) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::POST,
            &["apps", app_id, "stop"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    /// Pulls new images and recreates the application's containers.
    pub async fn update_containers(&self, node: &Node, app_id: &str) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::POST,
            &["apps", app_id, "update"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    /// Last `tail` lines of the application's logs.
    pub async fn app_logs(
        &self,
        node: &Node,
        app_id: &str,
        tail: u32,
    ) -> Result<String, RemoteError> {
        let mut url = self.endpoint(node, &["apps", app_id, "logs"])?;
        url.query_pairs_mut().append_pair("tail", &tail.to_string());
        let body = self
            .execute(node, self.request(node, Method::GET, url), Gate::Breaker)
            .await?;
        let logs: LogsResponse = self.decode(node, body, Gate::Breaker)?;
        Ok(logs.logs)
    }

    pub async fn app_stats(&self, node: &Node, app_id: &str) -> Result<AppStats, RemoteError> {
        self.call_json(
            node,
            Method::GET,
            &["apps", app_id, "stats"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    // Containers

    pub async fn restart_container(
        &self,
        node: &Node,
        app_id: &str,
        container: &str,
    ) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::POST,
            &["apps", app_id, "containers", container, "restart"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    pub async fn stop_container(
        &self,
        node: &Node,
        app_id: &str,
        container: &str,
    ) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::POST,
            &["apps", app_id, "containers", container, "stop"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    pub async fn delete_container(
        &self,
        node: &Node,
        app_id: &str,
        container: &str,
    ) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::DELETE,
            &["apps", app_id, "containers", container],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    // Tunnels

    pub async fn list_tunnels(&self, node: &Node) -> Result<Vec<Tunnel>, RemoteError> {
        self.call_json(node, Method::GET, &["tunnels"], None::<&()>, Gate::Breaker)
            .await
    }

    pub async fn get_tunnel_by_app(&self, node: &Node, app_id: &str) -> Result<Tunnel, RemoteError> {
        self.call_json(
            node,
            Method::GET,
            &["tunnels", "app", app_id],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    /// Refreshes a tunnel's status from the tunnel provider.
    pub async fn sync_tunnel(&self, node: &Node, tunnel_id: &str) -> Result<Tunnel, RemoteError> {
        self.call_json(
            node,
            Method::POST,
            &["tunnels", tunnel_id, "sync"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    pub async fn update_tunnel_ingress(
        &self,
        node: &Node,
        tunnel_id: &str,
        request: &UpdateIngressRequest,
    ) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::PUT,
            &["tunnels", tunnel_id, "ingress"],
            Some(request),
            Gate::Breaker,
        )
        .await
    }

    pub async fn create_dns_record(
        &self,
        node: &Node,
        tunnel_id: &str,
        request: &DnsRecordRequest,
    ) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::POST,
            &["tunnels", tunnel_id, "dns"],
            Some(request),
            Gate::Breaker,
        )
        .await
    }

    pub async fn delete_tunnel(&self, node: &Node, tunnel_id: &str) -> Result<(), RemoteError> {
        self.call_unit(
            node,
            Method::DELETE,
            &["tunnels", tunnel_id],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    pub async fn get_quick_tunnel(
        &self,
        node: &Node,
        app_id: &str,
    ) -> Result<QuickTunnel, RemoteError> {
        self.call_json(
            node,
            Method::GET,
            &["apps", app_id, "quick-tunnel"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    pub async fn create_quick_tunnel(
        &self,
        node: &Node,
        app_id: &str,
    ) -> Result<QuickTunnel, RemoteError> {
        self.call_json(
            node,
            Method::POST,
            &["apps", app_id, "quick-tunnel"],
            None::<&()>,
            Gate::Breaker,
        )
        .await
    }

    // Administrative calls, not breaker-gated

    pub async fn get_settings(&self, node: &Node) -> Result<Settings, RemoteError> {
        self.call_json(node, Method::GET, &["settings"], None::<&()>, Gate::Bypass)
            .await
    }

    pub async fn update_settings(&self, node: &Node, settings: &Settings) -> Result<(), RemoteError> {
        self.call_unit(node, Method::PUT, &["settings"], Some(settings), Gate::Bypass)
            .await
    }

    pub async fn list_compose_versions(
        &self,
        node: &Node,
        app_id: &str,
    ) -> Result<Vec<ComposeVersion>, RemoteError> {
        self.call_json(
            node,
            Method::GET,
            &["apps", app_id, "compose", "versions"],
            None::<&()>,
            Gate::Bypass,
        )
        .await
    }

    pub async fn get_compose_version(
        &self,
        node: &Node,
        app_id: &str,
        version: i64,
    ) -> Result<ComposeVersion, RemoteError> {
        let version = version.to_string();
        self.call_json(
            node,
            Method::GET,
            &["apps", app_id, "compose", "versions", version.as_str()],
            None::<&()>,
            Gate::Bypass,
        )
        .await
    }

    pub async fn rollback_compose(
        &self,
        node: &Node,
        app_id: &str,
        version: i64,
    ) -> Result<(), RemoteError> {
        let version = version.to_string();
        self.call_unit(
            node,
            Method::POST,
            &["apps", app_id, "compose", "versions", version.as_str(), "rollback"],
            None::<&()>,
            Gate::Bypass,
        )
        .await
    }

    // Plumbing

    /// `<api_endpoint>/api/internal/<segments...>`, each segment escaped.
    fn endpoint(&self, node: &Node, segments: &[&str]) -> Result<Url, RemoteError> {
        let invalid = |reason: String| RemoteError::InvalidEndpoint {
            node: node.name.clone(),
            endpoint: node.api_endpoint.clone(),
            reason,
        };

        let mut url = Url::parse(node.api_endpoint.trim_end_matches('/'))
            .map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .extend(["api", "internal"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, node: &Node, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(NODE_ID_HEADER, &self.local_node_id)
            .header(API_KEY_HEADER, &node.api_key)
    }

    async fn call_json<T, B>(
        &self,
        node: &Node,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        gate: Gate,
    ) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let text = self.call_raw(node, method, segments, body, gate).await?;
        self.decode(node, text, gate)
    }

    async fn call_unit<B>(
        &self,
        node: &Node,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        gate: Gate,
    ) -> Result<(), RemoteError>
    where
        B: Serialize + ?Sized,
    {
        self.call_raw(node, method, segments, body, gate).await?;
        if gate == Gate::Breaker {
            self.breaker.record_success(&node.id);
        }
        Ok(())
    }

    async fn call_raw<B>(
        &self,
        node: &Node,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        gate: Gate,
    ) -> Result<String, RemoteError>
    where
        B: Serialize + ?Sized,
    {
        let url = match self.endpoint(node, segments) {
            Ok(url) => url,
            Err(e) => {
                if gate == Gate::Breaker {
                    self.breaker.check(&node.id)?;
                    self.breaker.record_failure(&node.id);
                }
                return Err(e);
            }
        };
        let mut request = self.request(node, method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(node, request, gate).await
    }

    /// Sends a request and returns the body of a 2xx response. Failures are
    /// recorded against the peer; success is recorded by the caller once the
    /// body has been decoded.
    async fn execute(
        &self,
        node: &Node,
        request: RequestBuilder,
        gate: Gate,
    ) -> Result<String, RemoteError> {
        if gate == Gate::Breaker {
            self.breaker.check(&node.id)?;
        }
        let fail = |err: RemoteError| {
            if gate == Gate::Breaker {
                self.breaker.record_failure(&node.id);
            }
            err
        };
        let transport = |source: reqwest::Error| RemoteError::Transport {
            node: node.name.clone(),
            endpoint: node.api_endpoint.clone(),
            source,
        };

        let response = request.send().await.map_err(|e| fail(transport(e)))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| fail(transport(e)))?;

        if !status.is_success() {
            debug!(node = %node.name, %status, "Peer returned an error status");
            return Err(fail(RemoteError::Status {
                node: node.name.clone(),
                status,
                body,
            }));
        }
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        node: &Node,
        body: String,
        gate: Gate,
    ) -> Result<T, RemoteError> {
        match serde_json::from_str(&body) {
            Ok(value) => {
                if gate == Gate::Breaker {
                    self.breaker.record_success(&node.id);
                }
                Ok(value)
            }
            Err(source) => {
                if gate == Gate::Breaker {
                    self.breaker.record_failure(&node.id);
                }
                Err(RemoteError::Decode {
                    node: node.name.clone(),
                    body,
                    source,
                })
            }
        }
    }
}
