use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;

use anyhow::{Context, Result};

use crate::subnet::Subnet;

/// Per-bridge DHCP daemon: `attach`/`restart`/`stop`, out of scope per
/// spec.md §1 ("the DHCP-daemon process supervisor") but implemented here
/// the way `supervisor.rs` launches and supervises tenant command
/// processes, so the crate is runnable standalone.
pub(crate) trait DhcpSupervisor: Send + Sync {
    fn attach(&self, bridge_name: &str, subnet: &Subnet) -> Result<Box<dyn DhcpHandle>>;
}

pub(crate) trait DhcpHandle: Send + Sync {
    fn restart(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Spawns `dnsmasq` bound to the bridge, the same launch-and-log-lines
/// pattern `supervisor.rs::launch_one` uses for tenant commands.
pub(crate) struct DnsmasqSupervisor;

impl DnsmasqSupervisor {
    pub(crate) fn new() -> Self {
        DnsmasqSupervisor
    }
}

impl DhcpSupervisor for DnsmasqSupervisor {
    fn attach(&self, bridge_name: &str, subnet: &Subnet) -> Result<Box<dyn DhcpHandle>> {
        let handle = ProcessDhcp::spawn(bridge_name, subnet)?;
        Ok(Box::new(handle))
    }
}

struct ProcessDhcp {
    bridge_name: String,
    subnet: Subnet,
    child: Option<Child>,
}

impl ProcessDhcp {
    fn spawn(bridge_name: &str, subnet: &Subnet) -> Result<Self> {
        let net = subnet.net();
        let mut hosts = net.hosts();
        let range_start = hosts.next().context("subnet has no host addresses")?;
        let range_end = hosts.last().unwrap_or(range_start);
        let cmd = format!(
            "dnsmasq --no-daemon --interface={iface} --bind-interfaces \
             --dhcp-range={start},{end},{mask} --except-interface=lo",
            iface = bridge_name,
            start = range_start,
            end = range_end,
            mask = net.netmask(),
        );
        tracing::debug!("starting dhcp daemon: {}", cmd);
        let mut parts = cmd.split_whitespace();
        let program = parts.next().context("empty dnsmasq command")?;
        let mut child = Command::new(program)
            .args(parts)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn dhcp daemon for {}", bridge_name))?;

        let name = bridge_name.to_string();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines().flatten() {
                    tracing::info!("[dhcp:{}]: {}", name, line);
                }
            });
        }
        let name = bridge_name.to_string();
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().flatten() {
                    tracing::warn!("[dhcp:{}]: {}", name, line);
                }
            });
        }

        Ok(ProcessDhcp {
            bridge_name: bridge_name.to_string(),
            subnet: *subnet,
            child: Some(child),
        })
    }
}

impl DhcpHandle for ProcessDhcp {
    fn restart(&mut self) -> Result<()> {
        self.stop()?;
        let restarted = ProcessDhcp::spawn(&self.bridge_name, &self.subnet)?;
        self.child = restarted.child;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill().context("kill dhcp daemon")?;
            let _ = child.wait();
        }
        Ok(())
    }
}

impl Drop for ProcessDhcp {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
