#![warn(missing_docs)]

//! proxsd inventory subsystem: typed access to the Proxmox VE cluster API.
//!
//! The [`ClusterInventory`] trait is the only surface the discovery core
//! depends on. [`ProxmoxClient`] implements it over HTTPS with API-token
//! authentication; tests substitute their own implementations.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClusterInventory, ProxmoxClient, ProxmoxClientConfig, DEFAULT_API_PORT};
pub use error::{InventoryError, Result};
pub use types::{GuestInterface, GuestIpAddress, VmConfig, VmResource};
