use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::dns::DhcpHandle;
use crate::gate::ReadyGate;

/// Describes a kernel link the concentrator has created or discovered.
/// Inserted before the kernel create completes so concurrent callers can
/// wait on `gate`; `gate` publishes the kernel index once create returns.
pub(crate) struct LinkInfo {
    pub(crate) name: String,
    pub(crate) gate: Arc<ReadyGate>,
}

impl LinkInfo {
    pub(crate) fn new(name: String) -> Self {
        LinkInfo {
            name,
            gate: Arc::new(ReadyGate::new()),
        }
    }

    pub(crate) fn already_ready(name: String, index: u32) -> Self {
        LinkInfo {
            name,
            gate: Arc::new(ReadyGate::closed(index)),
        }
    }
}

/// Owns the bridge's DHCP daemon and counts the GRE tunnels attached to it.
/// Created on the first remote-subnet add referencing this subnet;
/// destroyed only on shutdown.
pub(crate) struct BridgeInfo {
    pub(crate) tunnels: u32,
    /// `None` between reservation and the realize phase publishing the
    /// attached daemon; always `Some` once realize (or the reconciler) has
    /// run to completion for this bridge.
    pub(crate) dns: Option<Box<dyn DhcpHandle>>,
}

/// The single source of truth about what the concentrator believes exists
/// in the kernel: link records keyed by alias, the set of kernel names ever
/// generated and not yet reaped, and bridge records keyed by bridge alias.
/// Every operation that reads then writes any of the three tables must hold
/// the concentrator's topology lock for the whole critical section; this
/// type itself does no locking.
#[derive(Default)]
pub(crate) struct Topology {
    pub(crate) links: HashMap<String, Arc<LinkInfo>>,
    pub(crate) names_in_use: HashSet<String>,
    pub(crate) bridges: HashMap<String, BridgeInfo>,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Topology::default()
    }

    /// Replaces all three tables with empty ones, dropping existing records
    /// and their gates. Only the reconciler calls this, under the lock.
    pub(crate) fn reinitialize(&mut self) {
        self.links.clear();
        self.names_in_use.clear();
        self.bridges.clear();
    }
}
