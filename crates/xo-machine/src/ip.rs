use std::time::Duration;

use tracing::{debug, info};

use crate::session::RemoteSession;
use crate::{Error, Result};

pub const IP_POLL_ATTEMPTS: u32 = 60;
pub const IP_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Fixed-budget, fixed-interval polling. The worst case is
/// `attempts × interval`; there is no other way to stop waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: IP_POLL_ATTEMPTS,
            interval: IP_POLL_INTERVAL,
        }
    }
}

/// Dotted-decimal looking, and not IPv6.
pub fn is_ipv4_like(addr: &str) -> bool {
    addr.contains('.') && !addr.contains(':')
}

pub fn first_ipv4<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    addresses.into_iter().find(|addr| is_ipv4_like(addr))
}

/// Poll `vm_id` until it reports an IPv4 address.
///
/// A failed lookup aborts immediately; only the absence of an address is
/// retried.
pub async fn acquire_ip(
    session: &mut dyn RemoteSession,
    vm_id: &str,
    policy: PollPolicy,
) -> Result<String> {
    for attempt in 1..=policy.attempts {
        let vm = session.get_vm(vm_id).await.map_err(Error::RemoteQuery)?;

        if let Some(addr) = first_ipv4(vm.addresses()) {
            info!(vm_id, ip = addr, attempt, "vm reported ipv4 address");
            return Ok(addr.to_string());
        }

        debug!(vm_id, attempt, "no ipv4 address yet");
        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::IpTimeout {
        vm_id: vm_id.to_string(),
        attempts: policy.attempts,
    })
}
