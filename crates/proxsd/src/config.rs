use proxsd_inventory::ProxmoxClientConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxmoxSettings {
    pub host: String,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
}

impl Default for ProxmoxSettings {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            user: String::from("root@pam"),
            token_name: String::new(),
            token_value: String::new(),
            verify_ssl: false,
            timeout_secs: 30,
        }
    }
}

impl ProxmoxSettings {
    pub fn client_config(&self) -> ProxmoxClientConfig {
        ProxmoxClientConfig {
            host: self.host.clone(),
            user: self.user.clone(),
            token_name: self.token_name.clone(),
            token_value: self.token_value.clone(),
            verify_ssl: self.verify_ssl,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub proxmox: ProxmoxSettings,
    pub cache_ttl_secs: u64,
    /// Port of the exporter running inside each VM.
    pub target_port: u16,
    /// Empty means every node.
    pub target_nodes: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            proxmox: ProxmoxSettings::default(),
            cache_ttl_secs: 60,
            target_port: 9182,
            target_nodes: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ServiceConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ServiceConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Splits a comma-separated node list, dropping blanks.
pub fn parse_node_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect()
}

/// Only the literal `true` (any case) enables verification.
pub fn parse_verify_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
