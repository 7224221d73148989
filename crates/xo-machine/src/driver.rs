use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use xo_api::{CreateVmRequest, Network, VifSpec, Vm};

use crate::config::MachineConfig;
use crate::ip::{self, PollPolicy};
use crate::session::{Connector, RemoteSession, XoConnector};
use crate::ssh::{self, KeyGenerator, SshKeygen};
use crate::state::{MachineState, StateQueryFailure};
use crate::{Error, Result};

pub const DRIVER_NAME: &str = "Xen Orchestra";
/// Port the Docker engine listens on inside the VM.
pub const ENGINE_PORT: u16 = 2376;
/// Upper bound for `vm.create`, enforced by the client.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Retry budget for finding a VM right after `vm.create` returned its id.
pub const CREATED_VM_LOOKUP: PollPolicy = PollPolicy {
    attempts: 5,
    interval: Duration::from_secs(2),
};

const VM_DESCRIPTION: &str = "Created by xo-machine driver";

/// Minimal user-data that authorizes `public_key` for SSH.
pub fn default_cloud_config(public_key: &str) -> String {
    format!("#cloud-config\nssh_authorized_keys:\n  - {public_key}\n")
}

/// Lifecycle controller for a single machine.
///
/// Operations are expected to be called one at a time; each opens its own
/// session through the connector.
pub struct Driver<C = XoConnector> {
    config: MachineConfig,
    connector: C,
    keys: Box<dyn KeyGenerator>,
    poll: PollPolicy,
}

impl Driver<XoConnector> {
    pub fn new(config: MachineConfig) -> Self {
        Self::with_parts(config, XoConnector, Box::new(SshKeygen))
    }
}

impl<C: Connector> Driver<C> {
    pub fn with_parts(config: MachineConfig, connector: C, keys: Box<dyn KeyGenerator>) -> Self {
        Self {
            config,
            connector,
            keys,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn into_config(self) -> MachineConfig {
        self.config
    }

    pub fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    async fn session(&self) -> Result<Box<dyn RemoteSession>> {
        self.connector
            .connect(&self.config)
            .await
            .map_err(Error::Connection)
    }

    fn vm_id(&self) -> Result<&str> {
        self.config
            .vm_id()
            .ok_or_else(|| Error::NotCreated(self.config.machine_name.clone()))
    }

    /// Provision the VM: key pair, request composition, optional network
    /// attachment, creation, boot and IP acquisition.
    ///
    /// A VM that was created is left in place if booting or address
    /// acquisition fails afterwards; its id stays recorded.
    pub async fn create(&mut self) -> Result<()> {
        if let Some(vm_id) = self.config.vm_id() {
            return Err(Error::AlreadyCreated {
                machine: self.config.machine_name.clone(),
                vm_id: vm_id.to_string(),
            });
        }

        info!(
            machine = %self.config.machine_name,
            template = %self.config.template,
            "creating vm from template"
        );

        let key_path = self.config.ssh_key_path();
        self.keys
            .generate(&key_path)
            .await
            .map_err(|source| Error::KeyGeneration {
                path: key_path.clone(),
                source,
            })?;

        let mut session = self.session().await?;

        let mut req = self.compose_request(&key_path).await?;

        if let Some(network) = &self.config.network {
            let resolved = resolve_network(session.as_mut(), network).await?;
            debug!(network = %network, network_id = %resolved.id, "attaching network");
            req.vifs.push(VifSpec {
                network: resolved.id,
            });
        }

        let vm_id = session
            .create_vm(&req, CREATE_TIMEOUT)
            .await
            .map_err(Error::RemoteCreate)?;
        self.config.assign_vm_id(vm_id.clone());
        info!(vm_id = %vm_id, "vm created");

        let booted = self.boot_and_wait(session.as_mut(), &vm_id).await;
        if let Err(e) = &booted {
            warn!(vm_id = %vm_id, error = %e, "create failed after the vm was created; vm left in place");
        }
        booted
    }

    async fn compose_request(&self, key_path: &Path) -> Result<CreateVmRequest> {
        let cloud_config = match &self.config.cloud_config {
            Some(user_data) => user_data.clone(),
            None => {
                let public_key = ssh::read_public_key(key_path).await.map_err(|source| {
                    Error::KeyRead {
                        path: ssh::public_key_path(key_path),
                        source,
                    }
                })?;
                default_cloud_config(&public_key)
            }
        };

        Ok(CreateVmRequest {
            name_label: self.config.machine_name.clone(),
            name_description: VM_DESCRIPTION.to_string(),
            template: self.config.template.clone(),
            cpus: xo_api::Cpus {
                number: self.config.cpus,
                max: self.config.cpus,
            },
            memory: xo_api::MemorySpec::from_mib(self.config.memory_mib),
            cloud_config: Some(cloud_config),
            vifs: Vec::new(),
            boot_after_create: false,
        })
    }

    async fn boot_and_wait(&mut self, session: &mut dyn RemoteSession, vm_id: &str) -> Result<()> {
        let vm = lookup_created_vm(session, vm_id, CREATED_VM_LOOKUP).await?;
        debug!(vm_id, power_state = %vm.power_state, "created vm visible");

        if MachineState::from_power_state(&vm.power_state) != MachineState::Running {
            info!(vm_id, "starting vm");
            session.start_vm(vm_id).await.map_err(Error::RemoteStart)?;
        }

        info!(vm_id, "waiting for ip address");
        let ip = ip::acquire_ip(session, vm_id, self.poll).await?;
        self.config.set_ip_address(ip);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        let id = self.vm_id()?;
        self.session().await?.start_vm(id).await?;
        info!(vm_id = id, "vm started");
        Ok(())
    }

    /// Clean shutdown through the guest.
    pub async fn stop(&self) -> Result<()> {
        let id = self.vm_id()?;
        self.session().await?.halt_vm(id).await?;
        info!(vm_id = id, "vm stopped");
        Ok(())
    }

    /// Forced power-off.
    pub async fn kill(&self) -> Result<()> {
        let id = self.vm_id()?;
        self.session().await?.force_stop_vm(id).await?;
        info!(vm_id = id, "vm killed");
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        let id = self.vm_id()?;
        self.session().await?.restart_vm(id).await?;
        info!(vm_id = id, "vm restarted");
        Ok(())
    }

    /// Delete the remote VM and forget its id and address.
    pub async fn remove(&mut self) -> Result<()> {
        let id = self.vm_id()?.to_string();
        self.session().await?.delete_vm(&id).await?;
        self.config.clear_vm();
        info!(vm_id = %id, "vm removed");
        Ok(())
    }

    pub async fn state(&self) -> std::result::Result<MachineState, StateQueryFailure> {
        let id = self.vm_id()?;
        let vm = self
            .session()
            .await?
            .get_vm(id)
            .await
            .map_err(Error::RemoteQuery)?;
        Ok(MachineState::from_power_state(&vm.power_state))
    }

    pub fn ip(&self) -> Result<&str> {
        self.config
            .ip_address()
            .ok_or_else(|| Error::NoAddress(self.config.machine_name.clone()))
    }

    /// Docker engine endpoint, `tcp://<ip>:2376`.
    pub fn url(&self) -> Result<String> {
        let ip = self.ip()?;
        let host_port = match ip.parse::<IpAddr>() {
            Ok(addr) => SocketAddr::new(addr, ENGINE_PORT).to_string(),
            Err(_) => format!("{ip}:{ENGINE_PORT}"),
        };
        Ok(format!("tcp://{host_port}"))
    }

    pub fn ssh_hostname(&self) -> Result<&str> {
        self.ip()
    }

    pub fn ssh_username(&self) -> &str {
        &self.config.ssh_user
    }

    pub fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    pub fn ssh_key_path(&self) -> PathBuf {
        self.config.ssh_key_path()
    }
}

/// Fetch a VM that `vm.create` just returned. The server's object cache can
/// lag behind the create, so `NotFound` is retried within `policy`.
async fn lookup_created_vm(
    session: &mut dyn RemoteSession,
    vm_id: &str,
    policy: PollPolicy,
) -> Result<Vm> {
    let mut attempt = 1;
    loop {
        match session.get_vm(vm_id).await {
            Ok(vm) => return Ok(vm),
            Err(xo_api::Error::NotFound { .. }) if attempt < policy.attempts => {
                debug!(vm_id, attempt, "created vm not visible yet");
                attempt += 1;
                tokio::time::sleep(policy.interval).await;
            }
            Err(e) => return Err(Error::RemoteQuery(e)),
        }
    }
}

/// Look the network up by display name first, then by id.
async fn resolve_network(session: &mut dyn RemoteSession, network: &str) -> Result<Network> {
    match session.get_network_by_name(network).await {
        Ok(found) => return Ok(found),
        Err(e) => debug!(network, error = %e, "network not found by name, trying id"),
    }

    session
        .get_network_by_id(network)
        .await
        .map_err(|source| Error::NetworkNotFound {
            network: network.to_string(),
            source,
        })
}
