use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── VM types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpus {
    pub number: u32,
    pub max: u32,
}

/// Memory as sent to `vm.create`: a static `[min, max]` range in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpec {
    #[serde(rename = "static")]
    pub static_range: [u64; 2],
}

impl MemorySpec {
    pub fn from_mib(mib: u64) -> Self {
        Self {
            static_range: [0, mib.saturating_mul(1024 * 1024)],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VifSpec {
    pub network: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateVmRequest {
    pub name_label: String,
    pub name_description: String,
    pub template: String,
    #[serde(rename = "CPUs")]
    pub cpus: Cpus,
    pub memory: MemorySpec,
    #[serde(rename = "cloudConfig", skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<String>,
    #[serde(rename = "VIFs", skip_serializing_if = "Vec::is_empty")]
    pub vifs: Vec<VifSpec>,
    #[serde(rename = "bootAfterCreate")]
    pub boot_after_create: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmMemory {
    #[serde(rename = "static", default)]
    pub static_range: Option<[u64; 2]>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// VM object as returned by `xo.getAllObjects`.
#[derive(Debug, Clone, Deserialize)]
pub struct Vm {
    pub id: String,
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub name_description: String,
    #[serde(default)]
    pub power_state: String,
    /// Interface key (`"0/ipv4/0"`, `"0/ipv6/0"`, ...) to address.
    #[serde(default)]
    pub addresses: BTreeMap<String, String>,
    #[serde(rename = "CPUs", default)]
    pub cpus: Option<Cpus>,
    #[serde(default)]
    pub memory: Option<VmMemory>,
}

impl Vm {
    /// Reported addresses in interface-key order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.addresses.values().map(String::as_str)
    }
}

// ── Network types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name_label: String,
}
