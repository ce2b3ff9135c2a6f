//! In-memory inventory used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use proxsd_inventory::{
    ClusterInventory, GuestInterface, GuestIpAddress, InventoryError, VmConfig, VmResource,
};
use serde_json::Value as JsonValue;

pub fn running_vm(vmid: u64, node: &str, name: &str) -> VmResource {
    VmResource {
        kind: "qemu".to_string(),
        node: node.to_string(),
        vmid,
        name: Some(name.to_string()),
        status: "running".to_string(),
        tags: None,
    }
}

pub fn config(entries: &[(&str, JsonValue)]) -> VmConfig {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn agent_iface(name: &str, ipv4: &[&str]) -> GuestInterface {
    GuestInterface {
        name: name.to_string(),
        ip_addresses: ipv4
            .iter()
            .map(|ip| GuestIpAddress {
                ip_address_type: "ipv4".to_string(),
                ip_address: ip.to_string(),
                prefix: Some(24),
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct FakeInventory {
    vms: Mutex<Vec<VmResource>>,
    configs: Mutex<HashMap<u64, VmConfig>>,
    agents: Mutex<HashMap<u64, Vec<GuestInterface>>>,
    fail_listing: AtomicBool,
    list_delay: Option<Duration>,
    list_calls: AtomicUsize,
    config_calls: AtomicUsize,
    agent_calls: AtomicUsize,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing sleeps for `delay` (tokio time) before answering.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn add_vm(&self, vm: VmResource, config: Option<VmConfig>, agent: Option<Vec<GuestInterface>>) {
        if let Some(config) = config {
            self.configs.lock().unwrap().insert(vm.vmid, config);
        }
        if let Some(agent) = agent {
            self.agents.lock().unwrap().insert(vm.vmid, agent);
        }
        self.vms.lock().unwrap().push(vm);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn config_calls(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }

    pub fn agent_calls(&self) -> usize {
        self.agent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterInventory for FakeInventory {
    async fn list_vms(&self) -> proxsd_inventory::Result<Vec<VmResource>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(InventoryError::Transport {
                path: "/cluster/resources".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.vms.lock().unwrap().clone())
    }

    async fn vm_config(&self, node: &str, vmid: u64) -> proxsd_inventory::Result<VmConfig> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        self.configs
            .lock()
            .unwrap()
            .get(&vmid)
            .cloned()
            .ok_or_else(|| InventoryError::Status {
                path: format!("/nodes/{}/qemu/{}/config", node, vmid),
                status: 500,
            })
    }

    async fn agent_interfaces(&self, node: &str, vmid: u64) -> proxsd_inventory::Result<Vec<GuestInterface>> {
        self.agent_calls.fetch_add(1, Ordering::SeqCst);
        self.agents
            .lock()
            .unwrap()
            .get(&vmid)
            .cloned()
            .ok_or_else(|| InventoryError::Status {
                path: format!("/nodes/{}/qemu/{}/agent/network-get-interfaces", node, vmid),
                status: 500,
            })
    }
}
