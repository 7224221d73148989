use std::time::Duration;

use async_trait::async_trait;
use xo_api::{CreateVmRequest, Network, Vm, XoClient};

use crate::config::MachineConfig;

/// The remote operations the lifecycle controller issues, one typed method
/// per operation.
#[async_trait]
pub trait RemoteSession: Send {
    /// Returns the new VM's id.
    async fn create_vm(
        &mut self,
        req: &CreateVmRequest,
        timeout: Duration,
    ) -> xo_api::Result<String>;

    async fn get_vm(&mut self, id: &str) -> xo_api::Result<Vm>;

    async fn get_network_by_name(&mut self, name: &str) -> xo_api::Result<Network>;

    async fn get_network_by_id(&mut self, id: &str) -> xo_api::Result<Network>;

    async fn start_vm(&mut self, id: &str) -> xo_api::Result<()>;

    /// Graceful guest shutdown.
    async fn halt_vm(&mut self, id: &str) -> xo_api::Result<()>;

    /// Immediate power-off.
    async fn force_stop_vm(&mut self, id: &str) -> xo_api::Result<()>;

    async fn delete_vm(&mut self, id: &str) -> xo_api::Result<()>;

    async fn restart_vm(&mut self, id: &str) -> xo_api::Result<()>;
}

/// Opens a fresh authenticated session for a single driver operation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &MachineConfig) -> xo_api::Result<Box<dyn RemoteSession>>;
}

/// Connects to the real Xen Orchestra server named in the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct XoConnector;

#[async_trait]
impl Connector for XoConnector {
    async fn connect(&self, config: &MachineConfig) -> xo_api::Result<Box<dyn RemoteSession>> {
        let client = XoClient::connect(&config.client_config()).await?;
        Ok(Box::new(client))
    }
}

#[async_trait]
impl RemoteSession for XoClient {
    async fn create_vm(
        &mut self,
        req: &CreateVmRequest,
        timeout: Duration,
    ) -> xo_api::Result<String> {
        XoClient::create_vm(self, req, timeout).await
    }

    async fn get_vm(&mut self, id: &str) -> xo_api::Result<Vm> {
        XoClient::get_vm(self, id).await
    }

    async fn get_network_by_name(&mut self, name: &str) -> xo_api::Result<Network> {
        XoClient::get_network_by_name(self, name).await
    }

    async fn get_network_by_id(&mut self, id: &str) -> xo_api::Result<Network> {
        XoClient::get_network_by_id(self, id).await
    }

    async fn start_vm(&mut self, id: &str) -> xo_api::Result<()> {
        XoClient::start_vm(self, id).await
    }

    async fn halt_vm(&mut self, id: &str) -> xo_api::Result<()> {
        XoClient::halt_vm(self, id).await
    }

    async fn force_stop_vm(&mut self, id: &str) -> xo_api::Result<()> {
        XoClient::force_stop_vm(self, id).await
    }

    async fn delete_vm(&mut self, id: &str) -> xo_api::Result<()> {
        XoClient::delete_vm(self, id).await
    }

    async fn restart_vm(&mut self, id: &str) -> xo_api::Result<()> {
        XoClient::restart_vm(self, id).await
    }
}
