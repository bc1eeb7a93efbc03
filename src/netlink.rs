use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use serde_json::Value;

/// Discriminates the kernel link types the reconciler cares about.
/// Only `Bridge` and `Gretap` participate in reconciliation; everything
/// else is either a physical NIC candidate or irrelevant kernel furniture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    Bridge,
    Gretap,
    Loopback,
    Physical,
    Other,
}

#[derive(Debug, Clone)]
pub(crate) struct HostLink {
    pub(crate) name: String,
    pub(crate) index: u32,
    pub(crate) alias: Option<String>,
    pub(crate) kind: LinkKind,
    pub(crate) up: bool,
    pub(crate) addrs: Vec<Ipv4Addr>,
}

/// The `bridge` / `gre-tunnel` / `vnic` kernel-link wrappers spec.md treats
/// as external collaborators, plus host-link enumeration for the classifier
/// and reconciler. Implementations must be `Send + Sync`: realize runs
/// outside the topology lock and may be called from any reserving thread.
pub(crate) trait LinkDriver: Send + Sync {
    fn list_links(&self) -> Result<Vec<HostLink>>;
    fn create_bridge(&self, name: &str, alias: &str) -> Result<()>;
    fn create_gretap(&self, name: &str, alias: &str, remote: Ipv4Addr) -> Result<()>;
    fn enable(&self, name: &str) -> Result<u32>;
    fn attach(&self, child: &str, parent_bridge: &str) -> Result<()>;
    fn get_device(&self, name: &str) -> Result<u32>;
    fn destroy(&self, name: &str) -> Result<()>;
}

/// Names the teacher's host would have found with `ip link show` and
/// skipped: loopback, our own bridges/tunnels while tearing them down,
/// the usual virtual-device families that are never candidates for
/// management/compute classification.
fn classify_name(name: &str, info_kind: Option<&str>) -> LinkKind {
    if name == "lo" {
        return LinkKind::Loopback;
    }
    match info_kind {
        Some("bridge") => LinkKind::Bridge,
        Some("gretap") => LinkKind::Gretap,
        Some(_virtual_kind) => LinkKind::Other,
        None => LinkKind::Physical,
    }
}

/// Drives kernel link mutation through `ip`, the same way the teacher's
/// `shell.rs`/`network.rs` do for bridges, veths and vxlans: shell out,
/// parse `ip -json ...` with `serde_json::Value` rather than a netlink
/// socket crate.
pub(crate) struct ShellLinkDriver;

impl ShellLinkDriver {
    pub(crate) fn new() -> Self {
        ShellLinkDriver
    }
}

fn execute(cmd: &str) -> Result<Vec<u8>> {
    tracing::debug!("running: {}", cmd);
    let mut parts = cmd.split_whitespace();
    let command = parts.next().context("empty command")?.to_string();
    let args: Vec<_> = parts.map(|s| s.to_string()).collect();

    let child = Command::new(command)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn: {}", cmd))?;
    let output = child.wait_with_output().with_context(|| format!("wait: {}", cmd))?;
    if !output.status.success() {
        anyhow::bail!(
            "{}. stderr: {}",
            cmd,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(output.stdout)
}

fn link_index(name: &str) -> Result<u32> {
    let output = execute(&format!("ip -json link show dev {}", name))?;
    let links: Vec<HashMap<String, Value>> =
        serde_json::from_slice(&output).context("decode ip link show")?;
    let link = links
        .first()
        .ok_or_else(|| anyhow::anyhow!("no such link: {}", name))?;
    link["ifindex"]
        .as_u64()
        .map(|v| v as u32)
        .ok_or_else(|| anyhow::anyhow!("missing ifindex for {}", name))
}

impl LinkDriver for ShellLinkDriver {
    fn list_links(&self) -> Result<Vec<HostLink>> {
        let link_output = execute("ip -json link show")?;
        let links: Vec<HashMap<String, Value>> =
            serde_json::from_slice(&link_output).context("decode ip link show")?;
        let addr_output = execute("ip -json -4 addr show")?;
        let addr_entries: Vec<HashMap<String, Value>> =
            serde_json::from_slice(&addr_output).context("decode ip addr show")?;
        let mut addrs_by_name: HashMap<String, Vec<Ipv4Addr>> = HashMap::new();
        for entry in addr_entries {
            let Some(Value::String(name)) = entry.get("ifname") else {
                continue;
            };
            let mut addrs = vec![];
            if let Some(Value::Array(infos)) = entry.get("addr_info") {
                for info in infos {
                    if let Some(Value::String(local)) = info.get("local") {
                        if let Ok(addr) = local.parse() {
                            addrs.push(addr);
                        }
                    }
                }
            }
            addrs_by_name.entry(name.clone()).or_default().extend(addrs);
        }

        let mut out = vec![];
        for link in links {
            let name = match link.get("ifname") {
                Some(Value::String(name)) => name.clone(),
                _ => continue,
            };
            let index = link["ifindex"].as_u64().unwrap_or(0) as u32;
            let alias = match link.get("ifalias") {
                Some(Value::String(alias)) => Some(alias.clone()),
                _ => None,
            };
            let info_kind = link
                .get("linkinfo")
                .and_then(|v| v.get("info_kind"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let up = match link.get("flags") {
                Some(Value::Array(flags)) => flags
                    .iter()
                    .any(|f| f.as_str() == Some("UP")),
                _ => false,
            };
            let kind = classify_name(&name, info_kind.as_deref());
            out.push(HostLink {
                addrs: addrs_by_name.remove(&name).unwrap_or_default(),
                name,
                index,
                alias,
                kind,
                up,
            });
        }
        Ok(out)
    }

    fn create_bridge(&self, name: &str, alias: &str) -> Result<()> {
        execute(&format!("ip link add {} type bridge", name))?;
        execute(&format!("ip link set {} alias {}", name, alias))?;
        Ok(())
    }

    fn create_gretap(&self, name: &str, alias: &str, remote: Ipv4Addr) -> Result<()> {
        execute(&format!(
            "ip link add {} type gretap remote {}",
            name, remote
        ))?;
        execute(&format!("ip link set {} alias {}", name, alias))?;
        Ok(())
    }

    fn enable(&self, name: &str) -> Result<u32> {
        execute(&format!("ip link set {} up", name))?;
        link_index(name)
    }

    fn attach(&self, child: &str, parent_bridge: &str) -> Result<()> {
        execute(&format!("ip link set {} master {}", child, parent_bridge))?;
        Ok(())
    }

    fn get_device(&self, name: &str) -> Result<u32> {
        link_index(name)
    }

    fn destroy(&self, name: &str) -> Result<()> {
        execute(&format!("ip link del {}", name))?;
        Ok(())
    }
}
