//! proxsd: Proxmox VM discovery for Prometheus HTTP service discovery.
//!
//! Cluster inventory flows through [`resolver`] (one VM to one target) and
//! [`discovery`] (one full pass) into the TTL [`cache`], which the [`api`]
//! serves over HTTP.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod metrics;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use api::DiscoveryApi;
pub use cache::{CacheError, TargetCache};
pub use config::ServiceConfig;
pub use discovery::Discovery;
pub use metrics::{CacheStatus, DiscoveryMetrics};
pub use resolver::{Resolution, SkipReason, TargetGroup, TargetResolver};
