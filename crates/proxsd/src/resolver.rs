//! Turns one VM's inventory record and configuration into a scrape target.
//!
//! Resolution never fails: missing data is expected and every outcome that
//! does not produce a target is reported as a [`SkipReason`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

use proxsd_inventory::{GuestInterface, VmConfig, VmResource};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const LABEL_VM_ID: &str = "__meta_vm_id";
pub const LABEL_VM_NAME: &str = "__meta_vm_name";
pub const LABEL_NODE: &str = "__meta_node";
pub const LABEL_VCPUS: &str = "__meta_vcpus";
pub const LABEL_MEMORY_GB: &str = "__meta_memory_gb";
pub const LABEL_DISK_TYPE: &str = "__meta_disk_type";
pub const LABEL_TAGS: &str = "__meta_tags";

const IPCONFIG_PREFIX: &str = "ipconfig";
const DISK_CONTROLLERS: [&str; 4] = ["virtio", "scsi", "ide", "sata"];
const UNKNOWN_DISK_TYPE: &str = "unknown";

/// One entry of a Prometheus HTTP SD response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Containers and other non-QEMU resources.
    NotVirtualMachine { kind: String },
    NodeExcluded { node: String },
    NotRunning { status: String },
    NoAddress,
    /// A numeric configuration key held something that is not a usable number.
    InvalidConfig { key: String, value: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotVirtualMachine { kind } => write!(f, "resource type {} is not a VM", kind),
            SkipReason::NodeExcluded { node } => write!(f, "node {} is not in the target node list", node),
            SkipReason::NotRunning { status } => write!(f, "status is {}", status),
            SkipReason::NoAddress => f.write_str("no IP address found"),
            SkipReason::InvalidConfig { key, value } => {
                write!(f, "config key {} has invalid value {}", key, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Target(TargetGroup),
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct TargetResolver {
    target_port: u16,
    node_filter: HashSet<String>,
}

impl TargetResolver {
    /// An empty node list admits every node.
    pub fn new<I, S>(target_port: u16, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_port,
            node_filter: nodes.into_iter().map(Into::into).collect(),
        }
    }

    /// Inventory-only checks, run before any per-VM remote lookup.
    pub fn screen(&self, vm: &VmResource) -> Result<(), SkipReason> {
        if !vm.is_qemu() {
            return Err(SkipReason::NotVirtualMachine {
                kind: vm.kind.clone(),
            });
        }
        if !self.node_filter.is_empty() && !self.node_filter.contains(&vm.node) {
            return Err(SkipReason::NodeExcluded {
                node: vm.node.clone(),
            });
        }
        if !vm.is_running() {
            return Err(SkipReason::NotRunning {
                status: vm.status.clone(),
            });
        }
        Ok(())
    }

    pub fn resolve(
        &self,
        vm: &VmResource,
        config: &VmConfig,
        agent: Option<&[GuestInterface]>,
    ) -> Resolution {
        if let Err(reason) = self.screen(vm) {
            return Resolution::Skipped(reason);
        }

        let address = match agent
            .and_then(address_from_agent)
            .or_else(|| address_from_config(config))
        {
            Some(address) => address,
            None => return Resolution::Skipped(SkipReason::NoAddress),
        };

        let labels = match self.labels(vm, config) {
            Ok(labels) => labels,
            Err(reason) => return Resolution::Skipped(reason),
        };

        Resolution::Target(TargetGroup {
            targets: vec![format!("{}:{}", address, self.target_port)],
            labels,
        })
    }

    fn labels(&self, vm: &VmResource, config: &VmConfig) -> Result<BTreeMap<String, String>, SkipReason> {
        let cores = config_int(config, "cores", 1)?;
        let sockets = config_int(config, "sockets", 1)?;
        let memory_mb = config_int(config, "memory", 0)?;
        let vcpus = cores
            .checked_mul(sockets)
            .ok_or_else(|| SkipReason::InvalidConfig {
                key: "sockets".to_string(),
                value: format!("{} (with {} cores)", sockets, cores),
            })?;

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_VM_ID.to_string(), vm.vmid.to_string());
        labels.insert(LABEL_VM_NAME.to_string(), vm.display_name());
        labels.insert(LABEL_NODE.to_string(), vm.node.clone());
        labels.insert(LABEL_VCPUS.to_string(), vcpus.to_string());
        labels.insert(LABEL_MEMORY_GB.to_string(), memory_gb(memory_mb));
        labels.insert(LABEL_DISK_TYPE.to_string(), disk_type(config).to_string());
        labels.insert(LABEL_TAGS.to_string(), vm.tags.clone().unwrap_or_default());
        Ok(labels)
    }
}

/// First IPv4 address on any non-loopback interface, in reported order.
pub fn address_from_agent(interfaces: &[GuestInterface]) -> Option<Ipv4Addr> {
    interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(GuestInterface::first_ipv4)
}

/// First static address from the cloud-init `ipconfigN` keys.
pub fn address_from_config(config: &VmConfig) -> Option<Ipv4Addr> {
    config
        .iter()
        .filter(|(key, _)| key.starts_with(IPCONFIG_PREFIX))
        .filter_map(|(_, value)| value.as_str())
        .find_map(parse_ipconfig)
}

/// Parses `ip=192.168.1.50/24,gw=192.168.1.1`. `ip=dhcp` yields nothing.
fn parse_ipconfig(value: &str) -> Option<Ipv4Addr> {
    let (_, ip) = value
        .split(',')
        .filter_map(|fragment| fragment.split_once('='))
        .find(|(key, _)| key.trim() == "ip")?;
    let address = ip.split('/').next()?;
    address.trim().parse().ok()
}

fn config_int(config: &VmConfig, key: &str, default: u64) -> Result<u64, SkipReason> {
    let invalid = |value: &JsonValue| SkipReason::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    };

    let Some(value) = config.get(key) else {
        return Ok(default);
    };
    match value {
        JsonValue::Null => Ok(default),
        JsonValue::Number(n) => n.as_u64().ok_or_else(|| invalid(value)),
        JsonValue::String(s) => s.trim().parse().map_err(|_| invalid(value)),
        _ => Err(invalid(value)),
    }
}

fn memory_gb(memory_mb: u64) -> String {
    if memory_mb == 0 {
        return "0".to_string();
    }
    format!("{:.1}", memory_mb as f64 / 1024.0)
}

fn disk_type(config: &VmConfig) -> &'static str {
    config
        .keys()
        .find_map(controller_family)
        .unwrap_or(UNKNOWN_DISK_TYPE)
}

/// `scsi0` -> `scsi`; `scsihw` and `virtiofs0` match nothing.
fn controller_family(key: &str) -> Option<&'static str> {
    DISK_CONTROLLERS.iter().copied().find(|prefix| {
        key.strip_prefix(prefix)
            .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    })
}
