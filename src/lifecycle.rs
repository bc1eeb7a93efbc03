use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alias::gen_link_name;
use crate::dns::DhcpSupervisor;
use crate::error::Error;
use crate::netlink::{LinkDriver, LinkKind};
use crate::subnet::Subnet;
use crate::topology::{BridgeInfo, LinkInfo, Topology};

fn validate_args(subnet_key: i64, remote: Ipv4Addr) -> Result<(), Error> {
    if subnet_key == 0 {
        return Err(Error::InvalidArgument(
            "subnet_key must be non-zero".to_string(),
        ));
    }
    if remote.is_unspecified() {
        return Err(Error::InvalidArgument(
            "remote_compute_ip must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn wait_gate(link: &LinkInfo, alias: &str, timeout: Duration) -> Result<u32, Error> {
    link.gate.wait(timeout).map_err(|err| match err {
        Error::DeviceNotReady { timeout, .. } => Error::DeviceNotReady {
            alias: alias.to_string(),
            timeout,
        },
        other => other,
    })
}

enum Reservation {
    /// Both the bridge and the GRE tunnel already existed: nothing to do.
    Idempotent,
    Proceed {
        bridge_link: Arc<LinkInfo>,
        gre_link: Arc<LinkInfo>,
        bridge_is_new: bool,
        gre_is_new: bool,
    },
}

/// Phase 1 of spec.md §4.6: the sole critical section. Publishes a
/// placeholder `link-info` for any alias this call is the first to see, so
/// that parallel callers for the same alias converge on one creator.
fn reserve(topo: &mut Topology, bridge_alias: &str, gre_alias: &str) -> Result<Reservation, Error> {
    let bridge_exists = topo.links.contains_key(bridge_alias);
    let gre_exists = topo.links.contains_key(gre_alias);
    if bridge_exists && gre_exists {
        return Ok(Reservation::Idempotent);
    }

    let bridge_link = if bridge_exists {
        if !topo.bridges.contains_key(bridge_alias) {
            return Err(Error::InternalError(format!(
                "link {} reserved without a matching bridge-info",
                bridge_alias
            )));
        }
        topo.links.get(bridge_alias).unwrap().clone()
    } else {
        let name = gen_link_name(LinkKind::Bridge, &mut topo.names_in_use)?;
        let link = Arc::new(LinkInfo::new(name));
        topo.links.insert(bridge_alias.to_string(), link.clone());
        topo.bridges.insert(
            bridge_alias.to_string(),
            BridgeInfo {
                tunnels: 0,
                dns: None,
            },
        );
        link
    };

    let gre_link = if gre_exists {
        topo.links.get(gre_alias).unwrap().clone()
    } else {
        let name = gen_link_name(LinkKind::Gretap, &mut topo.names_in_use)?;
        let link = Arc::new(LinkInfo::new(name));
        topo.links.insert(gre_alias.to_string(), link.clone());
        topo.bridges.get_mut(bridge_alias).unwrap().tunnels += 1;
        link
    };

    Ok(Reservation::Proceed {
        bridge_link,
        gre_link,
        bridge_is_new: !bridge_exists,
        gre_is_new: !gre_exists,
    })
}

/// `AddRemoteSubnet`: reserve under the lock, realize outside it. See
/// spec.md §4.6 and §9 for the rationale behind the two phases and for why
/// a realize failure leaves the reservation in place rather than rolling
/// it back.
pub(crate) fn add_remote_subnet(
    topology: &Mutex<Topology>,
    driver: &dyn LinkDriver,
    dhcp: &dyn DhcpSupervisor,
    api_timeout: Duration,
    subnet: Subnet,
    subnet_key: i64,
    remote: Ipv4Addr,
) -> Result<String, Error> {
    validate_args(subnet_key, remote)?;

    let bridge_alias = subnet.bridge_alias();
    let gre_alias = subnet.gre_alias(remote);

    let (bridge_link, gre_link, bridge_is_new, gre_is_new) = {
        let mut topo = topology.lock().unwrap();
        match reserve(&mut topo, &bridge_alias, &gre_alias)? {
            Reservation::Idempotent => return Ok(String::new()),
            Reservation::Proceed {
                bridge_link,
                gre_link,
                bridge_is_new,
                gre_is_new,
            } => (bridge_link, gre_link, bridge_is_new, gre_is_new),
        }
    };

    if bridge_is_new {
        let result: Result<(), Error> = (|| {
            driver
                .create_bridge(&bridge_link.name, &bridge_alias)
                .map_err(Error::Kernel)?;
            let index = driver.enable(&bridge_link.name).map_err(Error::Kernel)?;
            bridge_link.gate.close(index);
            let dns = dhcp
                .attach(&bridge_link.name, &subnet)
                .map_err(Error::Kernel)?;
            let mut topo = topology.lock().unwrap();
            if let Some(info) = topo.bridges.get_mut(&bridge_alias) {
                info.dns = Some(dns);
            }
            Ok(())
        })();
        if let Err(err) = result {
            // The bridge's gate must close even on failure so no peer
            // deadlocks; if create itself failed before enable ran, publish
            // index 0 (see spec.md §9's documented open question).
            bridge_link.gate.close(0);
            if gre_is_new {
                gre_link.gate.close(0);
            }
            return Err(err);
        }
    }

    if gre_is_new {
        let result: Result<u32, Error> = (|| {
            driver
                .create_gretap(&gre_link.name, &gre_alias, remote)
                .map_err(Error::Kernel)?;
            driver.enable(&gre_link.name).map_err(Error::Kernel)
        })();
        match result {
            Ok(index) => gre_link.gate.close(index),
            Err(err) => {
                gre_link.gate.close(0);
                return Err(err);
            }
        }
    }

    wait_gate(&bridge_link, &bridge_alias, api_timeout)?;
    wait_gate(&gre_link, &gre_alias, api_timeout)?;

    driver
        .attach(&gre_link.name, &bridge_link.name)
        .map_err(Error::Kernel)?;

    if bridge_is_new {
        Ok(bridge_link.name.clone())
    } else {
        Ok(String::new())
    }
}

/// `DelRemoteSubnet`: idempotent on an absent tunnel, decrements the
/// bridge's refcount, and reaps only the GRE endpoint — the bridge and its
/// DHCP daemon are intentionally retained until shutdown.
pub(crate) fn del_remote_subnet(
    topology: &Mutex<Topology>,
    driver: &dyn LinkDriver,
    api_timeout: Duration,
    subnet: Subnet,
    subnet_key: i64,
    remote: Ipv4Addr,
) -> Result<(), Error> {
    validate_args(subnet_key, remote)?;

    let bridge_alias = subnet.bridge_alias();
    let gre_alias = subnet.gre_alias(remote);

    let gre_link = {
        let mut topo = topology.lock().unwrap();
        let Some(gre_link) = topo.links.get(&gre_alias).cloned() else {
            return Ok(());
        };
        match topo.bridges.get_mut(&bridge_alias) {
            Some(info) => info.tunnels = info.tunnels.saturating_sub(1),
            None => tracing::error!(
                "del_remote_subnet: gre {} has no matching bridge-info {}",
                gre_alias,
                bridge_alias
            ),
        }
        topo.links.remove(&gre_alias);
        topo.names_in_use.remove(&gre_link.name);
        gre_link
    };

    wait_gate(&gre_link, &gre_alias, api_timeout)?;
    driver.destroy(&gre_link.name).map_err(Error::Kernel)?;
    Ok(())
}

/// Best-effort teardown: stops every DHCP daemon, then destroys every
/// remaining kernel link. Errors are logged and the last one is returned;
/// cleanup always continues.
pub(crate) fn shutdown(
    topology: &Mutex<Topology>,
    driver: &dyn LinkDriver,
    api_timeout: Duration,
) -> Result<(), Error> {
    let mut last_error = None;

    let mut topo = topology.lock().unwrap();
    for (alias, mut info) in topo.bridges.drain() {
        if let Some(mut dns) = info.dns.take() {
            if let Err(err) = dns.stop() {
                tracing::error!("shutdown: stop dhcp daemon for {}: {:?}", alias, err);
                last_error = Some(Error::Kernel(err));
            }
        }
    }

    for (alias, link) in topo.links.drain() {
        topo.names_in_use.remove(&link.name);
        match wait_gate(&link, &alias, api_timeout) {
            Ok(_) => {
                if let Err(err) = driver.destroy(&link.name) {
                    tracing::error!("shutdown: destroy {} ({}): {:?}", alias, link.name, err);
                    last_error = Some(Error::Kernel(err));
                }
            }
            Err(err) => {
                tracing::error!("shutdown: wait for {}: {:?}", alias, err);
                last_error = Some(err);
            }
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
