//! Cluster inventory client.
//!
//! This module defines the [`ClusterInventory`] trait consumed by the
//! discovery core and the [`ProxmoxClient`] that implements it against the
//! Proxmox VE REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;

use crate::error::{InventoryError, Result};
use crate::types::{AgentNetworkResponse, ApiResponse, GuestInterface, VmConfig, VmResource};

/// Port of the Proxmox VE API when the configured host names none.
pub const DEFAULT_API_PORT: u16 = 8006;

/// Read access to the cluster inventory.
///
/// Every call is an independent remote query and may fail on its own.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// List cluster resources of the VM kind (QEMU guests and containers).
    async fn list_vms(&self) -> Result<Vec<VmResource>>;

    /// Fetch the detailed configuration of one QEMU guest.
    ///
    /// # Arguments
    /// * `node` - Node hosting the guest.
    /// * `vmid` - Guest identifier.
    async fn vm_config(&self, node: &str, vmid: u64) -> Result<VmConfig>;

    /// Query the guest agent for the guest's network interfaces.
    ///
    /// Fails when the agent is not installed, not running or not enabled.
    async fn agent_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<GuestInterface>>;
}

/// Connection settings for [`ProxmoxClient`].
#[derive(Debug, Clone)]
pub struct ProxmoxClientConfig {
    /// API host, optionally with `:port`.
    pub host: String,
    /// User owning the API token, e.g. `root@pam`.
    pub user: String,
    /// Token identifier.
    pub token_name: String,
    /// Token secret.
    pub token_value: String,
    /// Verify the server certificate.
    pub verify_ssl: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ProxmoxClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "root@pam".to_string(),
            token_name: String::new(),
            token_value: String::new(),
            verify_ssl: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ProxmoxClientConfig {
    /// Value of the `Authorization` header for API-token authentication.
    pub fn auth_header(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user, self.token_name, self.token_value
        )
    }

    /// Base URL of the JSON API, `https://host:port/api2/json`.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host);

        if has_port(host) {
            format!("https://{}/api2/json", host)
        } else {
            format!("https://{}:{}/api2/json", host, DEFAULT_API_PORT)
        }
    }
}

fn has_port(host: &str) -> bool {
    match host.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// [`ClusterInventory`] backed by the Proxmox VE REST API.
///
/// The underlying connection pool is shared by all calls; the client itself
/// holds no mutable state.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    auth: String,
    timeout: Duration,
}

impl ProxmoxClient {
    /// Creates a client for the configured host.
    pub fn new(config: &ProxmoxClientConfig) -> Result<Self> {
        Self::with_base_url(config, config.base_url())
    }

    /// Creates a client that talks to an explicit API base URL.
    pub fn with_base_url(config: &ProxmoxClientConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| InventoryError::ClientBuild {
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            auth: config.auth_header(),
            timeout: config.timeout,
        })
    }

    /// API base URL this client sends requests to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::trace!(%url, "querying cluster API");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header(AUTHORIZATION, self.auth.as_str())
            .send()
            .await
            .map_err(|e| self.request_error(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InventoryError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| self.request_error(path, e))?;
        Ok(body.data)
    }

    fn request_error(&self, path: &str, err: reqwest::Error) -> InventoryError {
        if err.is_timeout() {
            InventoryError::Timeout {
                path: path.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            InventoryError::Decode {
                path: path.to_string(),
                reason: err.to_string(),
            }
        } else {
            InventoryError::Transport {
                path: path.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ClusterInventory for ProxmoxClient {
    async fn list_vms(&self) -> Result<Vec<VmResource>> {
        self.get("/cluster/resources", &[("type", "vm")]).await
    }

    async fn vm_config(&self, node: &str, vmid: u64) -> Result<VmConfig> {
        let path = format!("/nodes/{}/qemu/{}/config", node, vmid);
        self.get(&path, &[]).await
    }

    async fn agent_interfaces(&self, node: &str, vmid: u64) -> Result<Vec<GuestInterface>> {
        let path = format!("/nodes/{}/qemu/{}/agent/network-get-interfaces", node, vmid);
        let response: AgentNetworkResponse = self.get(&path, &[]).await?;
        Ok(response.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    fn test_config() -> ProxmoxClientConfig {
        ProxmoxClientConfig {
            host: "pve.example.com".to_string(),
            user: "monitor@pve".to_string(),
            token_name: "sd".to_string(),
            token_value: "0000-1111".to_string(),
            verify_ssl: true,
            timeout: Duration::from_secs(5),
        }
    }

    async fn spawn_api(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api2/json", addr)
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "PVEAPIToken=monitor@pve!sd=0000-1111")
            .unwrap_or(false)
    }

    #[test]
    fn test_auth_header_format() {
        assert_eq!(
            test_config().auth_header(),
            "PVEAPIToken=monitor@pve!sd=0000-1111"
        );
    }

    #[test]
    fn test_base_url_appends_default_port() {
        let config = test_config();
        assert_eq!(config.base_url(), "https://pve.example.com:8006/api2/json");
    }

    #[test]
    fn test_base_url_keeps_explicit_port() {
        let config = ProxmoxClientConfig {
            host: "10.0.0.2:443".to_string(),
            ..test_config()
        };
        assert_eq!(config.base_url(), "https://10.0.0.2:443/api2/json");
    }

    #[test]
    fn test_base_url_strips_scheme() {
        let config = ProxmoxClientConfig {
            host: "https://pve.example.com/".to_string(),
            ..test_config()
        };
        assert_eq!(config.base_url(), "https://pve.example.com:8006/api2/json");
    }

    #[test]
    fn test_base_url_bracketed_ipv6_without_port() {
        let config = ProxmoxClientConfig {
            host: "[fd00::2]".to_string(),
            ..test_config()
        };
        assert_eq!(config.base_url(), "https://[fd00::2]:8006/api2/json");
    }

    #[tokio::test]
    async fn test_list_vms_sends_token_and_filter() {
        let router = Router::new().route(
            "/api2/json/cluster/resources",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    if !authorized(&headers) {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    assert_eq!(q.get("type").map(String::as_str), Some("vm"));
                    Ok(Json(serde_json::json!({
                        "data": [
                            {"type": "qemu", "node": "pve1", "vmid": 100, "name": "win01", "status": "running"}
                        ]
                    })))
                },
            ),
        );
        let base = spawn_api(router).await;
        let client = ProxmoxClient::with_base_url(&test_config(), base).unwrap();

        let vms = client.list_vms().await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].vmid, 100);
        assert_eq!(vms[0].node, "pve1");
    }

    #[tokio::test]
    async fn test_vm_config_and_agent_paths() {
        let router = Router::new()
            .route(
                "/api2/json/nodes/:node/qemu/:vmid/config",
                get(|Path((node, vmid)): Path<(String, u64)>| async move {
                    assert_eq!(node, "pve1");
                    assert_eq!(vmid, 100);
                    Json(serde_json::json!({"data": {"cores": 2, "sockets": 1}}))
                }),
            )
            .route(
                "/api2/json/nodes/:node/qemu/:vmid/agent/network-get-interfaces",
                get(|| async {
                    Json(serde_json::json!({
                        "data": {"result": [
                            {"name": "Ethernet", "ip-addresses": [
                                {"ip-address-type": "ipv4", "ip-address": "10.0.0.5", "prefix": 24}
                            ]}
                        ]}
                    }))
                }),
            );
        let base = spawn_api(router).await;
        let client = ProxmoxClient::with_base_url(&test_config(), base).unwrap();

        let config = client.vm_config("pve1", 100).await.unwrap();
        assert_eq!(config.len(), 2);

        let ifaces = client.agent_interfaces("pve1", 100).await.unwrap();
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].name, "Ethernet");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let router = Router::new().route(
            "/api2/json/nodes/:node/qemu/:vmid/agent/network-get-interfaces",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "QEMU guest agent is not running") }),
        );
        let base = spawn_api(router).await;
        let client = ProxmoxClient::with_base_url(&test_config(), base).unwrap();

        let err = client.agent_interfaces("pve1", 100).await.unwrap_err();
        match err {
            InventoryError::Status { status, path } => {
                assert_eq!(status, 500);
                assert!(path.ends_with("network-get-interfaces"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_body_is_decode_error() {
        let router = Router::new().route(
            "/api2/json/cluster/resources",
            get(|| async { Json(serde_json::json!({"data": "nope"})) }),
        );
        let base = spawn_api(router).await;
        let client = ProxmoxClient::with_base_url(&test_config(), base).unwrap();

        let err = client.list_vms().await.unwrap_err();
        assert!(matches!(err, InventoryError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout_error() {
        let router = Router::new().route(
            "/api2/json/nodes/:node/qemu/:vmid/config",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(serde_json::json!({"data": {}}))
            }),
        );
        let base = spawn_api(router).await;
        let config = ProxmoxClientConfig {
            timeout: Duration::from_millis(200),
            ..test_config()
        };
        let client = ProxmoxClient::with_base_url(&config, base).unwrap();

        let err = client.vm_config("pve1", 100).await.unwrap_err();
        match err {
            InventoryError::Timeout { path, timeout_ms } => {
                assert_eq!(path, "/nodes/pve1/qemu/100/config");
                assert_eq!(timeout_ms, 200);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ProxmoxClient::with_base_url(&test_config(), format!("http://{}/api2/json", addr))
                .unwrap();
        let err = client.list_vms().await.unwrap_err();
        assert!(matches!(err, InventoryError::Transport { .. }));
    }
}
