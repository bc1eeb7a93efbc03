//! Topology manager for a per-tenant network-virtualization control plane:
//! physical interface classification, crash-recovery reconciliation, a
//! concurrent reserve-then-realize subnet lifecycle engine, and best-effort
//! shutdown. See `Concentrator` for the public surface.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipnet::Ipv4Net;

mod alias;
mod classifier;
mod dns;
mod error;
mod gate;
mod lifecycle;
mod netlink;
mod reconciler;
mod subnet;
mod sysctl;
#[cfg(test)]
mod testsupport;
mod topology;

pub use error::{Error, Result};
pub use subnet::Subnet;

use classifier::Qualified;
use dns::{DhcpSupervisor, DnsmasqSupervisor};
use netlink::{LinkDriver, ShellLinkDriver};
use topology::Topology;

/// Time a caller will block in `add_remote_subnet`/`del_remote_subnet`/
/// `shutdown` waiting for another thread's kernel call to finish, before
/// giving up with `Error::DeviceNotReady`. spec.md §4.7: "Sets default API
/// timeout (six seconds)".
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(6);

/// Externally supplied network classification input: which CIDRs count as
/// management or compute, and the addresses this host advertises publicly.
/// An absent CIDR list means auto-detect from the single qualifying physical
/// link (see `classifier::classify`).
pub struct NetworkConfig {
    pub management_cidrs: Option<Vec<Ipv4Net>>,
    pub compute_cidrs: Option<Vec<Ipv4Net>>,
    pub public_ips: Vec<Ipv4Addr>,
}

impl NetworkConfig {
    pub fn new() -> Self {
        NetworkConfig {
            management_cidrs: None,
            compute_cidrs: None,
            public_ips: Vec::new(),
        }
    }

    pub fn with_management_cidrs(mut self, cidrs: Vec<Ipv4Net>) -> Self {
        self.management_cidrs = Some(cidrs);
        self
    }

    pub fn with_compute_cidrs(mut self, cidrs: Vec<Ipv4Net>) -> Self {
        self.compute_cidrs = Some(cidrs);
        self
    }

    pub fn with_public_ips(mut self, ips: Vec<Ipv4Addr>) -> Self {
        self.public_ips = ips;
        self
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig::new()
    }
}

/// Builder for a `Concentrator`. Mirrors the teacher's `Config`/`Env` split:
/// a plain builder struct consumed by the thing it configures, no config
/// file format.
pub struct Config {
    tenant_id: String,
    concentrator_id: String,
    api_timeout: Duration,
    network: Option<NetworkConfig>,
    link_driver: Arc<dyn LinkDriver>,
    dhcp: Arc<dyn DhcpSupervisor>,
}

impl Config {
    pub fn new(tenant_id: impl Into<String>, concentrator_id: impl Into<String>) -> Self {
        Config {
            tenant_id: tenant_id.into(),
            concentrator_id: concentrator_id.into(),
            api_timeout: DEFAULT_API_TIMEOUT,
            network: None,
            link_driver: Arc::new(ShellLinkDriver::new()),
            dhcp: Arc::new(DnsmasqSupervisor::new()),
        }
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_link_driver(mut self, driver: Arc<dyn LinkDriver>) -> Self {
        self.link_driver = driver;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_dhcp(mut self, dhcp: Arc<dyn DhcpSupervisor>) -> Self {
        self.dhcp = dhcp;
        self
    }
}

/// A single tenant's concentrator: owns the topology store and the kernel
/// and DHCP collaborators, and exposes the lifecycle operations spec.md §4
/// and §6 define. Every method but `init` requires `init` to have succeeded
/// first, or returns `Error::Uninitialized`.
pub struct Concentrator {
    cfg: Config,
    management: Vec<Qualified>,
    compute: Vec<Qualified>,
    topology: Mutex<Topology>,
    initialized: AtomicBool,
}

impl Concentrator {
    pub fn new(cfg: Config) -> Self {
        Concentrator {
            cfg,
            management: Vec::new(),
            compute: Vec::new(),
            topology: Mutex::new(Topology::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.cfg.tenant_id
    }

    pub fn concentrator_id(&self) -> &str {
        &self.cfg.concentrator_id
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Uninitialized)
        }
    }

    /// Classifies the host's physical links, enables IPv4 forwarding and the
    /// bridged-traffic sysctls, and rebuilds the topology store from
    /// whatever the kernel already holds (crash recovery). Fails
    /// `Uninitialized` if no network config was ever supplied.
    pub fn init(&mut self) -> Result<()> {
        let network = self.cfg.network.as_ref().ok_or(Error::Uninitialized)?;

        sysctl::disable_bridge_nf_call_iptables().map_err(Error::Kernel)?;
        sysctl::enable_ipv4_forwarding().map_err(Error::Kernel)?;

        let classified = classifier::classify(
            self.cfg.link_driver.as_ref(),
            network.management_cidrs.as_deref(),
            network.compute_cidrs.as_deref(),
        )?;
        self.management = classified.management;
        self.compute = classified.compute;

        {
            let mut topology = self.topology.lock().unwrap();
            reconciler::rebuild(
                &mut topology,
                self.cfg.link_driver.as_ref(),
                self.cfg.dhcp.as_ref(),
            )?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Re-derives the topology store from kernel state without touching
    /// classification. Used to recover after a crash without a full restart.
    pub fn rebuild_topology(&self) -> Result<()> {
        self.require_initialized()?;
        let mut topology = self.topology.lock().unwrap();
        reconciler::rebuild(
            &mut topology,
            self.cfg.link_driver.as_ref(),
            self.cfg.dhcp.as_ref(),
        )
    }

    /// Ensures a bridge for `subnet` and a GRE tunnel to `remote` exist,
    /// attaching the tunnel to the bridge. Returns the bridge's kernel name
    /// if this call created it, or an empty string if the work was already
    /// done (by this call or a concurrent one).
    pub fn add_remote_subnet(
        &self,
        subnet: Subnet,
        subnet_key: i64,
        remote: Ipv4Addr,
    ) -> Result<String> {
        self.require_initialized()?;
        lifecycle::add_remote_subnet(
            &self.topology,
            self.cfg.link_driver.as_ref(),
            self.cfg.dhcp.as_ref(),
            self.cfg.api_timeout,
            subnet,
            subnet_key,
            remote,
        )
    }

    /// Destroys the GRE tunnel to `remote` for `subnet`, if it exists.
    /// Idempotent: a second call for the same pair is a no-op. The bridge
    /// and its DHCP daemon are retained until `shutdown`.
    pub fn del_remote_subnet(
        &self,
        subnet: Subnet,
        subnet_key: i64,
        remote: Ipv4Addr,
    ) -> Result<()> {
        self.require_initialized()?;
        lifecycle::del_remote_subnet(
            &self.topology,
            self.cfg.link_driver.as_ref(),
            self.cfg.api_timeout,
            subnet,
            subnet_key,
            remote,
        )
    }

    /// Best-effort teardown of every bridge, DHCP daemon and tunnel this
    /// concentrator knows about. Continues past individual failures and
    /// returns the last one encountered, if any.
    pub fn shutdown(&self) -> Result<()> {
        lifecycle::shutdown(&self.topology, self.cfg.link_driver.as_ref(), self.cfg.api_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{FakeDhcpSupervisor, FakeLinkDriver};
    use netlink::{HostLink, LinkKind};

    fn physical(name: &str, addr: &str) -> HostLink {
        HostLink {
            name: name.to_string(),
            index: 0,
            alias: None,
            kind: LinkKind::Physical,
            up: true,
            addrs: vec![addr.parse().unwrap()],
        }
    }

    fn test_concentrator(driver: FakeLinkDriver) -> Concentrator {
        let cfg = Config::new("tenant-a", "concentrator-1")
            .with_network(NetworkConfig::new())
            .with_link_driver(Arc::new(driver))
            .with_dhcp(Arc::new(FakeDhcpSupervisor::new()));
        Concentrator::new(cfg)
    }

    #[test]
    fn uninitialized_operations_are_rejected() {
        let cfg = Config::new("tenant-a", "concentrator-1")
            .with_link_driver(Arc::new(FakeLinkDriver::new(vec![])))
            .with_dhcp(Arc::new(FakeDhcpSupervisor::new()));
        let c = Concentrator::new(cfg);
        let err = c
            .add_remote_subnet(
                Subnet::new("10.3.0.0/24".parse().unwrap()),
                1,
                "192.0.2.5".parse().unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Uninitialized));
    }

    #[test]
    fn init_without_network_config_fails_uninitialized() {
        let cfg = Config::new("tenant-a", "concentrator-1")
            .with_link_driver(Arc::new(FakeLinkDriver::new(vec![physical("eth0", "10.1.0.5")])))
            .with_dhcp(Arc::new(FakeDhcpSupervisor::new()));
        let mut c = Concentrator::new(cfg);
        assert!(matches!(c.init().unwrap_err(), Error::Uninitialized));
    }

    #[test]
    fn init_classifies_and_rebuilds_then_allows_add() {
        let driver = FakeLinkDriver::new(vec![physical("eth0", "10.1.0.5")]);
        let mut c = test_concentrator(driver);
        c.init().unwrap();
        assert_eq!(c.management.len(), 1);
        assert_eq!(c.compute.len(), 1);

        let name = c
            .add_remote_subnet(
                Subnet::new("10.3.0.0/24".parse().unwrap()),
                1,
                "192.0.2.5".parse().unwrap(),
            )
            .unwrap();
        assert!(!name.is_empty());
    }

    #[test]
    fn shutdown_is_callable_without_init() {
        let cfg = Config::new("tenant-a", "concentrator-1")
            .with_link_driver(Arc::new(FakeLinkDriver::new(vec![])))
            .with_dhcp(Arc::new(FakeDhcpSupervisor::new()));
        let c = Concentrator::new(cfg);
        c.shutdown().unwrap();
    }
}
