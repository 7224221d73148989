use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Driver-side view of a VM's power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    Running,
    Stopped,
    Paused,
    Unknown,
    /// The state could not be observed (connection or lookup failure).
    Error,
}

impl MachineState {
    /// Translate a Xen Orchestra `power_state`. Total: anything unrecognised
    /// is `Unknown`.
    pub fn from_power_state(power_state: &str) -> Self {
        match power_state {
            "Running" => Self::Running,
            "Halted" => Self::Stopped,
            "Paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed state query. `state` is always [`MachineState::Error`].
#[derive(Debug, thiserror::Error)]
#[error("machine state is {state}: {error}")]
pub struct StateQueryFailure {
    pub state: MachineState,
    #[source]
    pub error: Error,
}

impl From<Error> for StateQueryFailure {
    fn from(error: Error) -> Self {
        Self {
            state: MachineState::Error,
            error,
        }
    }
}
