use std::sync::Arc;

use crate::dns::DhcpSupervisor;
use crate::error::Error;
use crate::netlink::{LinkDriver, LinkKind};
use crate::subnet::{Subnet, BRIDGE_PREFIX, GRE_PREFIX};
use crate::topology::{BridgeInfo, LinkInfo, Topology};

/// Rebuilds the topology store from kernel state: aliases are the
/// persistent map from logical identity to kernel object, so the
/// reconciler is the inverse of the lifecycle engine's naming. Runs under
/// the caller's topology lock; on any failure the store is left empty
/// (spec.md: "reconciler errors abort the rebuild... callers must retry").
pub(crate) fn rebuild(
    topology: &mut Topology,
    driver: &dyn LinkDriver,
    dhcp: &dyn DhcpSupervisor,
) -> Result<(), Error> {
    topology.reinitialize();
    if let Err(err) = rebuild_inner(topology, driver, dhcp) {
        topology.reinitialize();
        return Err(err);
    }
    Ok(())
}

fn rebuild_inner(
    topology: &mut Topology,
    driver: &dyn LinkDriver,
    dhcp: &dyn DhcpSupervisor,
) -> Result<(), Error> {
    let links = driver.list_links().map_err(Error::Kernel)?;

    for link in &links {
        topology.names_in_use.insert(link.name.clone());
        if let Some(alias) = &link.alias {
            topology.links.insert(
                alias.clone(),
                Arc::new(LinkInfo::already_ready(link.name.clone(), link.index)),
            );
        }
    }

    for link in links.iter().filter(|l| l.kind == LinkKind::Bridge) {
        let Some(alias) = &link.alias else { continue };
        if !alias.starts_with(BRIDGE_PREFIX) {
            continue;
        }
        driver.get_device(&link.name).map_err(Error::Kernel)?;
        let subnet = Subnet::bridge_alias_from(alias)?;
        let dns = dhcp.attach(&link.name, &subnet).map_err(Error::Kernel)?;
        topology.bridges.insert(
            alias.clone(),
            BridgeInfo {
                tunnels: 0,
                dns: Some(dns),
            },
        );
    }

    for link in links.iter().filter(|l| l.kind == LinkKind::Gretap) {
        let Some(alias) = &link.alias else { continue };
        if !alias.starts_with(GRE_PREFIX) {
            continue;
        }
        let (subnet, _remote) = Subnet::parse_gre_alias(alias)?;
        let bridge_alias = subnet.bridge_alias();
        let bridge = topology.bridges.get_mut(&bridge_alias);
        match (topology.links.contains_key(&bridge_alias), bridge) {
            (true, Some(bridge)) => bridge.tunnels += 1,
            _ => {
                return Err(Error::DanglingTunnel {
                    alias: alias.clone(),
                })
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::netlink::HostLink;
    use crate::testsupport::{FakeDhcpSupervisor, FakeLinkDriver};

    fn bridge_link(subnet: &str) -> HostLink {
        let subnet = Subnet::new(subnet.parse().unwrap());
        HostLink {
            name: "tcbr00000001".to_string(),
            index: 10,
            alias: Some(subnet.bridge_alias()),
            kind: LinkKind::Bridge,
            up: true,
            addrs: vec![],
        }
    }

    fn gre_link(subnet: &str, remote: &str) -> HostLink {
        let subnet = Subnet::new(subnet.parse().unwrap());
        let remote: Ipv4Addr = remote.parse().unwrap();
        HostLink {
            name: "tcgre0000001".to_string(),
            index: 11,
            alias: Some(subnet.gre_alias(remote)),
            kind: LinkKind::Gretap,
            up: true,
            addrs: vec![],
        }
    }

    #[test]
    fn rebuild_registers_bridge_and_counts_tunnels() {
        let driver = FakeLinkDriver::new(vec![
            bridge_link("10.3.0.0/24"),
            gre_link("10.3.0.0/24", "192.0.2.5"),
            gre_link("10.3.0.0/24", "192.0.2.6"),
        ]);
        let dhcp = FakeDhcpSupervisor::new();
        let mut topology = Topology::new();
        rebuild(&mut topology, &driver, &dhcp).unwrap();

        let subnet = Subnet::new("10.3.0.0/24".parse().unwrap());
        let bridge_alias = subnet.bridge_alias();
        assert_eq!(topology.bridges.get(&bridge_alias).unwrap().tunnels, 2);
        assert_eq!(dhcp.attach_count(), 1);
        assert_eq!(topology.names_in_use.len(), 3);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let driver = FakeLinkDriver::new(vec![
            bridge_link("10.3.0.0/24"),
            gre_link("10.3.0.0/24", "192.0.2.5"),
        ]);
        let dhcp = FakeDhcpSupervisor::new();
        let mut topology = Topology::new();
        rebuild(&mut topology, &driver, &dhcp).unwrap();
        let first_names = topology.names_in_use.clone();
        let first_tunnels = topology
            .bridges
            .get(&Subnet::new("10.3.0.0/24".parse().unwrap()).bridge_alias())
            .unwrap()
            .tunnels;

        rebuild(&mut topology, &driver, &dhcp).unwrap();
        assert_eq!(topology.names_in_use, first_names);
        assert_eq!(
            topology
                .bridges
                .get(&Subnet::new("10.3.0.0/24".parse().unwrap()).bridge_alias())
                .unwrap()
                .tunnels,
            first_tunnels
        );
    }

    #[test]
    fn dangling_tunnel_aborts_and_empties_the_store() {
        let driver = FakeLinkDriver::new(vec![gre_link("10.9.0.0/24", "192.0.2.9")]);
        let dhcp = FakeDhcpSupervisor::new();
        let mut topology = Topology::new();
        let err = rebuild(&mut topology, &driver, &dhcp).unwrap_err();
        assert!(matches!(err, Error::DanglingTunnel { .. }));
        assert!(topology.links.is_empty());
        assert!(topology.bridges.is_empty());
        assert!(topology.names_in_use.is_empty());
    }

    #[test]
    fn unrelated_links_are_ignored() {
        let mut eth0 = bridge_link("10.3.0.0/24");
        eth0.kind = LinkKind::Physical;
        eth0.alias = None;
        eth0.name = "eth0".to_string();
        let driver = FakeLinkDriver::new(vec![eth0]);
        let dhcp = FakeDhcpSupervisor::new();
        let mut topology = Topology::new();
        rebuild(&mut topology, &driver, &dhcp).unwrap();
        assert!(topology.bridges.is_empty());
        assert_eq!(topology.names_in_use.len(), 1);
    }
}
