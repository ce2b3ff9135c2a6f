use crate::api::{DiscoveryApi, HealthStatus};
use crate::cache::TargetCache;
use crate::config::{parse_node_list, parse_verify_flag, ServiceConfig};
use crate::discovery::Discovery;
use crate::metrics::DiscoveryMetrics;
use crate::resolver::{TargetGroup, TargetResolver};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use proxsd_inventory::ProxmoxClient;
use reqwest::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "proxsd")]
#[command(about = "Proxmox VM discovery for Prometheus HTTP service discovery", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the discovery service.
    Serve(ServeArgs),
    /// Print the targets served by a running instance.
    Targets {
        #[arg(short, long, default_value = "http://localhost:8000")]
        server: String,
    },
    /// Print the health document of a running instance.
    Status {
        #[arg(short, long, default_value = "http://localhost:8000")]
        server: String,
    },
}

/// Flags and environment override the config file, which overrides defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    #[arg(short, long, env = "PROXSD_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,

    #[arg(long, env = "PROXMOX_HOST")]
    pub proxmox_host: Option<String>,

    #[arg(long, env = "PROXMOX_USER")]
    pub proxmox_user: Option<String>,

    #[arg(long, env = "PROXMOX_TOKEN_NAME")]
    pub token_name: Option<String>,

    #[arg(long, env = "PROXMOX_TOKEN_VALUE", hide_env_values = true)]
    pub token_value: Option<String>,

    #[arg(long, env = "PROXMOX_VERIFY_SSL")]
    pub verify_ssl: Option<String>,

    #[arg(long, env = "CACHE_TTL_SECONDS")]
    pub cache_ttl_secs: Option<u64>,

    #[arg(long, env = "WINDOWS_EXPORTER_PORT")]
    pub target_port: Option<u16>,

    /// Comma-separated node names; empty means all nodes.
    #[arg(long, env = "TARGET_NODES")]
    pub target_nodes: Option<String>,
}

impl ServeArgs {
    pub fn load(&self) -> Result<ServiceConfig> {
        let base = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        Ok(self.apply(base))
    }

    pub fn apply(&self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(host) = &self.proxmox_host {
            config.proxmox.host = host.clone();
        }
        if let Some(user) = &self.proxmox_user {
            config.proxmox.user = user.clone();
        }
        if let Some(name) = &self.token_name {
            config.proxmox.token_name = name.clone();
        }
        if let Some(value) = &self.token_value {
            config.proxmox.token_value = value.clone();
        }
        if let Some(flag) = &self.verify_ssl {
            config.proxmox.verify_ssl = parse_verify_flag(flag);
        }
        if let Some(ttl) = self.cache_ttl_secs {
            config.cache_ttl_secs = ttl;
        }
        if let Some(port) = self.target_port {
            config.target_port = port;
        }
        if let Some(nodes) = &self.target_nodes {
            config.target_nodes = parse_node_list(nodes);
        }
        config
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve(ref args) => serve(args.load()?).await,
            Command::Targets { ref server } => print_targets(server).await,
            Command::Status { ref server } => print_status(server).await,
        }
    }
}

pub async fn serve(config: ServiceConfig) -> Result<()> {
    tracing::info!(
        "Starting discovery service for Proxmox host: {}",
        config.proxmox.host
    );
    tracing::info!(
        "Cache TTL: {}s, target port: {}",
        config.cache_ttl_secs,
        config.target_port
    );
    if !config.target_nodes.is_empty() {
        tracing::info!("Restricting discovery to nodes: {}", config.target_nodes.join(", "));
    }

    let client = ProxmoxClient::new(&config.proxmox.client_config())?;
    let metrics = Arc::new(DiscoveryMetrics::new());
    let resolver = TargetResolver::new(config.target_port, config.target_nodes.clone());
    let discovery = Discovery::new(Arc::new(client), resolver, metrics.clone());
    let cache = Arc::new(TargetCache::new(discovery, metrics.clone(), config.cache_ttl()));

    let prewarm_cache = cache.clone();
    tokio::spawn(async move {
        if let Err(e) = prewarm_cache.prewarm().await {
            tracing::warn!("Failed to pre-warm cache: {}", e);
        }
    });

    let api = DiscoveryApi::new(cache, metrics, Arc::new(config));
    api.serve().await
}

async fn print_targets(server: &str) -> Result<()> {
    let url = format!("{}/targets", server.trim_end_matches('/'));
    let response = Client::new().get(&url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("Request failed: {}", response.status());
    }

    let groups: Vec<TargetGroup> = response.json().await?;
    println!("{:<22} {:<8} {:<24} {:<10}", "TARGET", "VMID", "NAME", "NODE");
    for group in &groups {
        let label = |name: &str| group.labels.get(name).map(String::as_str).unwrap_or("-");
        for target in &group.targets {
            println!(
                "{:<22} {:<8} {:<24} {:<10}",
                target,
                label(crate::resolver::LABEL_VM_ID),
                label(crate::resolver::LABEL_VM_NAME),
                label(crate::resolver::LABEL_NODE)
            );
        }
    }
    println!("{} targets", groups.len());

    Ok(())
}

async fn print_status(server: &str) -> Result<()> {
    let url = format!("{}/health", server.trim_end_matches('/'));
    let response = Client::new().get(&url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("Request failed: {}", response.status());
    }

    let health: HealthStatus = response.json().await?;
    println!("Status: {}", health.status);
    println!("Proxmox host: {}", health.proxmox_host);
    match health.cache_age_seconds {
        Some(age) => println!("Cache age: {}s", age),
        None => println!("Cache age: never updated"),
    }
    println!("Cached targets: {}", health.cached_targets);

    Ok(())
}
