//! Machine driver for Xen Orchestra.
//!
//! Turns a validated [`MachineConfig`] into a running, network-reachable VM
//! and drives it through its lifecycle (start, stop, kill, restart, remove).
//! Every operation opens its own short-lived session through a
//! [`Connector`]; nothing is pooled between calls.

pub mod config;
pub mod driver;
pub mod ip;
pub mod session;
pub mod ssh;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

pub use config::{DriverOptions, Flag, FlagKind, MachineConfig, create_flags};
pub use driver::Driver;
pub use ip::PollPolicy;
pub use session::{Connector, RemoteSession, XoConnector};
pub use state::{MachineState, StateQueryFailure};
pub use store::MachineStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration for {field}: {reason}")]
    Configuration { field: &'static str, reason: String },

    #[error("connecting to xen orchestra failed: {0}")]
    Connection(#[source] xo_api::Error),

    #[error("creating vm failed: {0}")]
    RemoteCreate(#[source] xo_api::Error),

    #[error("starting vm failed: {0}")]
    RemoteStart(#[source] xo_api::Error),

    #[error("querying vm failed: {0}")]
    RemoteQuery(#[source] xo_api::Error),

    #[error(transparent)]
    Remote(#[from] xo_api::Error),

    #[error("network {network} not found by name or id: {source}")]
    NetworkNotFound {
        network: String,
        #[source]
        source: xo_api::Error,
    },

    #[error("timed out waiting for an ipv4 address on vm {vm_id} after {attempts} polls")]
    IpTimeout { vm_id: String, attempts: u32 },

    #[error("generating ssh key at {} failed: {source}", path.display())]
    KeyGeneration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading public key {} failed: {source}", path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("machine {machine} already owns vm {vm_id}")]
    AlreadyCreated { machine: String, vm_id: String },

    #[error("machine {0} has no vm")]
    NotCreated(String),

    #[error("machine {0} has no ip address")]
    NoAddress(String),

    #[error("machine store {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("machine record decode failed: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
