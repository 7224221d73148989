use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_CPUS: u32 = 2;
pub const DEFAULT_MEMORY_MIB: u64 = 2048;
pub const DEFAULT_SSH_USER: &str = "docker";
pub const DEFAULT_SSH_PORT: u16 = 22;

const SSH_KEY_FILE: &str = "id_rsa";

// ── Flags ────────────────────────────────────────────────────────────

pub const FLAG_URL: &str = "xo-url";
pub const FLAG_USERNAME: &str = "xo-username";
pub const FLAG_PASSWORD: &str = "xo-password";
pub const FLAG_INSECURE: &str = "xo-insecure";
pub const FLAG_TEMPLATE: &str = "xo-template";
pub const FLAG_CPUS: &str = "xo-vm-cpus";
pub const FLAG_MEMORY: &str = "xo-vm-mem";
pub const FLAG_CLOUD_CONFIG: &str = "xo-cloud-config";
pub const FLAG_NETWORK: &str = "xo-vm-network";
pub const FLAG_SSH_USER: &str = "xo-ssh-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    String,
    Int { default: i64 },
    Bool,
}

/// A create-time option, settable by name or by its environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flag {
    pub name: &'static str,
    pub usage: &'static str,
    pub env_var: &'static str,
    pub kind: FlagKind,
}

static CREATE_FLAGS: [Flag; 10] = [
    Flag {
        name: FLAG_URL,
        usage: "Xen Orchestra URL (e.g. https://xo.example.com)",
        env_var: "XO_URL",
        kind: FlagKind::String,
    },
    Flag {
        name: FLAG_USERNAME,
        usage: "Xen Orchestra username",
        env_var: "XO_USERNAME",
        kind: FlagKind::String,
    },
    Flag {
        name: FLAG_PASSWORD,
        usage: "Xen Orchestra password",
        env_var: "XO_PASSWORD",
        kind: FlagKind::String,
    },
    Flag {
        name: FLAG_INSECURE,
        usage: "Skip TLS certificate verification",
        env_var: "XO_INSECURE",
        kind: FlagKind::Bool,
    },
    Flag {
        name: FLAG_TEMPLATE,
        usage: "Template to clone",
        env_var: "XO_TEMPLATE",
        kind: FlagKind::String,
    },
    Flag {
        name: FLAG_CPUS,
        usage: "Number of CPUs",
        env_var: "XO_VM_CPUS",
        kind: FlagKind::Int {
            default: DEFAULT_CPUS as i64,
        },
    },
    Flag {
        name: FLAG_MEMORY,
        usage: "Memory in MiB",
        env_var: "XO_VM_MEM",
        kind: FlagKind::Int {
            default: DEFAULT_MEMORY_MIB as i64,
        },
    },
    Flag {
        name: FLAG_CLOUD_CONFIG,
        usage: "Cloud-init configuration (user-data)",
        env_var: "XO_CLOUD_CONFIG",
        kind: FlagKind::String,
    },
    Flag {
        name: FLAG_NETWORK,
        usage: "Network to attach to (name or UUID)",
        env_var: "XO_VM_NETWORK",
        kind: FlagKind::String,
    },
    Flag {
        name: FLAG_SSH_USER,
        usage: "SSH user the generated key is authorized for",
        env_var: "XO_SSH_USER",
        kind: FlagKind::String,
    },
];

/// All options accepted when declaring a machine.
pub fn create_flags() -> &'static [Flag] {
    &CREATE_FLAGS
}

/// Read access to raw option values, keyed by flag name.
///
/// Implementations return `None` for options that were not given at all.
pub trait DriverOptions {
    fn string(&self, name: &str) -> Option<String>;

    fn flag(&self, name: &str) -> bool;
}

impl DriverOptions for HashMap<String, String> {
    fn string(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

// ── Machine config ───────────────────────────────────────────────────

/// Everything the driver knows about one machine.
///
/// Connection and VM-spec fields are fixed after validation. The VM id and
/// address are filled in by the lifecycle operations; the host persists the
/// whole record between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub machine_name: String,
    pub store_path: PathBuf,

    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub insecure: bool,

    pub template: String,
    pub cpus: u32,
    pub memory_mib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default)]
    vm_id: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// `<store>/machines/<name>`, the directory holding a machine's record and keys.
pub fn machine_dir(store_path: &Path, machine_name: &str) -> PathBuf {
    store_path.join("machines").join(machine_name)
}

impl MachineConfig {
    /// Validate raw options into a config. Purely local.
    pub fn from_options(
        machine_name: impl Into<String>,
        store_path: impl Into<PathBuf>,
        opts: &impl DriverOptions,
    ) -> Result<Self> {
        let machine_name = machine_name.into();
        if machine_name.trim().is_empty() {
            return Err(Error::Configuration {
                field: "machine-name",
                reason: "required".into(),
            });
        }

        let url = required(opts, FLAG_URL)?;
        let username = required(opts, FLAG_USERNAME)?;
        let password = required(opts, FLAG_PASSWORD)?;
        let template = required(opts, FLAG_TEMPLATE)?;

        let cpus = positive(opts, FLAG_CPUS, DEFAULT_CPUS as u64)?;
        let cpus = u32::try_from(cpus).map_err(|_| Error::Configuration {
            field: FLAG_CPUS,
            reason: format!("{cpus} is out of range"),
        })?;
        let memory_mib = positive(opts, FLAG_MEMORY, DEFAULT_MEMORY_MIB)?;
        check_memory(memory_mib)?;

        Ok(Self {
            machine_name,
            store_path: store_path.into(),
            url,
            username,
            password,
            insecure: opts.flag(FLAG_INSECURE),
            template,
            cpus,
            memory_mib,
            cloud_config: opts.string(FLAG_CLOUD_CONFIG),
            network: opts.string(FLAG_NETWORK),
            ssh_user: opts.string(FLAG_SSH_USER).unwrap_or_else(default_ssh_user),
            ssh_port: DEFAULT_SSH_PORT,
            vm_id: None,
            ip_address: None,
        })
    }

    pub fn client_config(&self) -> xo_api::ClientConfig {
        xo_api::ClientConfig {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            insecure: self.insecure,
        }
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_mib.saturating_mul(1024 * 1024)
    }

    /// Re-check the VM sizes of a record that was read back from disk
    /// rather than built by `from_options`.
    pub(crate) fn validate_sizes(&self) -> Result<()> {
        if self.cpus == 0 {
            return Err(Error::Configuration {
                field: FLAG_CPUS,
                reason: "must be at least 1".into(),
            });
        }
        check_memory(self.memory_mib)
    }

    pub fn machine_dir(&self) -> PathBuf {
        machine_dir(&self.store_path, &self.machine_name)
    }

    pub fn ssh_key_path(&self) -> PathBuf {
        self.machine_dir().join(SSH_KEY_FILE)
    }

    pub fn vm_id(&self) -> Option<&str> {
        self.vm_id.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Record the id of the VM created for this machine. An id is never
    /// replaced once set.
    pub(crate) fn assign_vm_id(&mut self, id: impl Into<String>) {
        if self.vm_id.is_none() {
            self.vm_id = Some(id.into());
        }
    }

    pub(crate) fn set_ip_address(&mut self, ip: impl Into<String>) {
        self.ip_address = Some(ip.into());
    }

    /// Forget the remote VM after it has been deleted.
    pub(crate) fn clear_vm(&mut self) {
        self.vm_id = None;
        self.ip_address = None;
    }
}

fn check_memory(memory_mib: u64) -> Result<()> {
    match memory_mib.checked_mul(1024 * 1024) {
        Some(bytes) if bytes > 0 => Ok(()),
        _ => Err(Error::Configuration {
            field: FLAG_MEMORY,
            reason: format!("{memory_mib} MiB is out of range"),
        }),
    }
}

/// Blank values count as missing; anything else is kept verbatim.
fn required(opts: &impl DriverOptions, field: &'static str) -> Result<String> {
    opts.string(field)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Configuration {
            field,
            reason: "required".into(),
        })
}

fn positive(opts: &impl DriverOptions, field: &'static str, default: u64) -> Result<u64> {
    let Some(raw) = opts.string(field) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(Error::Configuration {
            field,
            reason: "must be at least 1".into(),
        }),
        Ok(value) => Ok(value),
        Err(_) => Err(Error::Configuration {
            field,
            reason: format!("{raw:?} is not a positive integer"),
        }),
    }
}
