use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::Error;
use crate::netlink::{HostLink, LinkDriver, LinkKind};

/// An address/link pair qualifying for one side of the classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Qualified {
    pub(crate) addr: Ipv4Addr,
    pub(crate) link: String,
}

#[derive(Debug, Default)]
pub(crate) struct Classified {
    pub(crate) management: Vec<Qualified>,
    pub(crate) compute: Vec<Qualified>,
}

/// A physical link is a candidate for management/compute classification
/// only if the host-link predicate accepts it: not loopback, not one of
/// our own (or anyone else's) virtual devices, and administratively up.
fn is_valid_physical(link: &HostLink) -> bool {
    link.kind == LinkKind::Physical && link.up
}

fn contains_any(cidrs: &[Ipv4Net], addr: Ipv4Addr) -> bool {
    cidrs.iter().any(|cidr| cidr.contains(&addr))
}

/// Scans host links, partitioning their IPv4 addresses into management and
/// compute sets based on the configured CIDR lists. An absent list means
/// auto-detect: every qualifying address is added unconditionally, but then
/// exactly one physical link must have been seen, or the result is
/// ambiguous. The same link/address may end up in both sets.
pub(crate) fn classify(
    driver: &dyn LinkDriver,
    management_cidrs: Option<&[Ipv4Net]>,
    compute_cidrs: Option<&[Ipv4Net]>,
) -> Result<Classified, Error> {
    let links = driver.list_links().map_err(Error::Kernel)?;
    let mut out = Classified::default();
    let mut physical_seen = 0usize;

    for link in links.iter().filter(|l| is_valid_physical(l)) {
        if link.addrs.is_empty() {
            continue;
        }
        physical_seen += 1;
        for &addr in &link.addrs {
            let in_management = match management_cidrs {
                Some(cidrs) => contains_any(cidrs, addr),
                None => true,
            };
            if in_management {
                out.management.push(Qualified {
                    addr,
                    link: link.name.clone(),
                });
            }
            let in_compute = match compute_cidrs {
                Some(cidrs) => contains_any(cidrs, addr),
                None => true,
            };
            if in_compute {
                out.compute.push(Qualified {
                    addr,
                    link: link.name.clone(),
                });
            }
        }
    }

    if out.management.is_empty() {
        return Err(Error::NoManagementAddress);
    }
    if out.compute.is_empty() {
        return Err(Error::NoComputeAddress);
    }
    if (management_cidrs.is_none() || compute_cidrs.is_none()) && physical_seen > 1 {
        return Err(Error::AmbiguousAutoConfig);
    }
    Ok(out)
}
