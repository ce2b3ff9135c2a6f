//! Wire types for the Proxmox VE REST API.
//!
//! Only the fields the discovery core reads are modelled; everything else
//! in the upstream payloads is ignored during deserialization.

use std::fmt;
use std::net::Ipv4Addr;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Resource type of a full QEMU virtual machine.
pub const KIND_QEMU: &str = "qemu";

/// Status reported for a VM that is currently running.
pub const STATUS_RUNNING: &str = "running";

/// Interface name of the guest loopback device.
pub const LOOPBACK_INTERFACE: &str = "lo";

/// One entry of `/cluster/resources?type=vm`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VmResource {
    /// Resource type (`qemu` or `lxc`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Node currently hosting the guest.
    #[serde(default)]
    pub node: String,
    /// Numeric guest identifier.
    pub vmid: u64,
    /// Guest name, absent for unnamed guests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Runtime status (`running`, `stopped`, ...).
    #[serde(default)]
    pub status: String,
    /// Raw tag string as stored upstream (`;` or `,` separated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl VmResource {
    /// Returns true for full virtual machines, false for containers.
    pub fn is_qemu(&self) -> bool {
        self.kind == KIND_QEMU
    }

    /// Returns true if the guest is running.
    pub fn is_running(&self) -> bool {
        self.status == STATUS_RUNNING
    }

    /// Guest name, or `vm-<vmid>` when the guest has none.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("vm-{}", self.vmid),
        }
    }
}

/// Detailed configuration of one VM, from `/nodes/{node}/qemu/{vmid}/config`.
///
/// Keys keep the order in which the API returned them. Values are kept as
/// raw JSON because the API mixes numbers and strings for the same key
/// across versions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmConfig {
    entries: Vec<(String, JsonValue)>,
}

impl VmConfig {
    /// Looks up a configuration key.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Iterates over entries in upstream order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over keys in upstream order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of configuration keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no keys are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, JsonValue)> for VmConfig {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'de> Deserialize<'de> for VmConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ConfigVisitor;

        impl<'de> Visitor<'de> for ConfigVisitor {
            type Value = VmConfig;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of VM configuration keys")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<VmConfig, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, JsonValue>()? {
                    entries.push((key, value));
                }
                Ok(VmConfig { entries })
            }
        }

        deserializer.deserialize_map(ConfigVisitor)
    }
}

/// One network interface reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GuestInterface {
    /// Interface name inside the guest.
    pub name: String,
    /// Addresses bound to the interface.
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<GuestIpAddress>,
}

impl GuestInterface {
    /// Returns true for the guest loopback device.
    pub fn is_loopback(&self) -> bool {
        self.name == LOOPBACK_INTERFACE
    }

    /// First IPv4-typed address bound to this interface.
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.ip_addresses.iter().find_map(GuestIpAddress::ipv4)
    }
}

/// One address entry of a guest interface.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GuestIpAddress {
    /// `ipv4` or `ipv6`.
    #[serde(rename = "ip-address-type")]
    pub ip_address_type: String,
    /// Textual address.
    #[serde(rename = "ip-address")]
    pub ip_address: String,
    /// Prefix length, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<u8>,
}

impl GuestIpAddress {
    /// Parsed address if this entry is typed `ipv4` and well formed.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        if self.ip_address_type != "ipv4" {
            return None;
        }
        self.ip_address.parse().ok()
    }
}

/// Payload of `agent/network-get-interfaces`.
#[derive(Debug, Deserialize)]
pub(crate) struct AgentNetworkResponse {
    #[serde(default)]
    pub result: Vec<GuestInterface>,
}

/// Envelope wrapped around every API response body.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub data: T,
}
