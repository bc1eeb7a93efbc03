//! In-memory stand-ins for the kernel-link and DHCP collaborators, used by
//! every module's test suite so that lifecycle/reconciler/classifier tests
//! can exercise real concurrency without a Linux network namespace.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::dns::{DhcpHandle, DhcpSupervisor};
use crate::netlink::{HostLink, LinkDriver};
use crate::subnet::Subnet;

#[derive(Default)]
struct FakeState {
    enabled: HashMap<String, u32>,
    attached: Vec<(String, String)>,
    destroyed: Vec<String>,
}

pub(crate) struct FakeLinkDriver {
    seed_links: Vec<HostLink>,
    state: Mutex<FakeState>,
    bridge_creates: AtomicU32,
    gretap_creates: AtomicU32,
    next_index: AtomicU32,
    delay: Duration,
    fail_bridge_create: bool,
}

impl FakeLinkDriver {
    pub(crate) fn new(seed_links: Vec<HostLink>) -> Self {
        FakeLinkDriver {
            seed_links,
            state: Mutex::new(FakeState::default()),
            bridge_creates: AtomicU32::new(0),
            gretap_creates: AtomicU32::new(0),
            next_index: AtomicU32::new(1),
            delay: Duration::ZERO,
            fail_bridge_create: false,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_failing_bridge_create(mut self) -> Self {
        self.fail_bridge_create = true;
        self
    }

    pub(crate) fn bridge_create_count(&self) -> u32 {
        self.bridge_creates.load(Ordering::SeqCst)
    }

    pub(crate) fn gretap_create_count(&self) -> u32 {
        self.gretap_creates.load(Ordering::SeqCst)
    }

    pub(crate) fn attached_pairs(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().attached.clone()
    }

    pub(crate) fn destroyed_names(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }
}

impl LinkDriver for FakeLinkDriver {
    fn list_links(&self) -> Result<Vec<HostLink>> {
        Ok(self.seed_links.clone())
    }

    fn create_bridge(&self, name: &str, _alias: &str) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.bridge_creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_bridge_create {
            anyhow::bail!("simulated bridge create failure for {}", name);
        }
        Ok(())
    }

    fn create_gretap(&self, _name: &str, _alias: &str, _remote: Ipv4Addr) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.gretap_creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enable(&self, name: &str) -> Result<u32> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().enabled.insert(name.to_string(), index);
        Ok(index)
    }

    fn attach(&self, child: &str, parent_bridge: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .attached
            .push((child.to_string(), parent_bridge.to_string()));
        Ok(())
    }

    fn get_device(&self, name: &str) -> Result<u32> {
        if let Some(index) = self.state.lock().unwrap().enabled.get(name).copied() {
            return Ok(index);
        }
        self.seed_links
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.index)
            .ok_or_else(|| anyhow::anyhow!("no such device: {}", name))
    }

    fn destroy(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.enabled.remove(name);
        state.destroyed.push(name.to_string());
        Ok(())
    }
}

pub(crate) struct FakeDhcpSupervisor {
    pub(crate) attach_count: AtomicU32,
}

impl FakeDhcpSupervisor {
    pub(crate) fn new() -> Self {
        FakeDhcpSupervisor {
            attach_count: AtomicU32::new(0),
        }
    }

    pub(crate) fn attach_count(&self) -> u32 {
        self.attach_count.load(Ordering::SeqCst)
    }
}

impl DhcpSupervisor for FakeDhcpSupervisor {
    fn attach(&self, _bridge_name: &str, _subnet: &Subnet) -> Result<Box<dyn DhcpHandle>> {
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDhcpHandle {
            restarts: 0,
            stopped: false,
        }))
    }
}

pub(crate) struct FakeDhcpHandle {
    pub(crate) restarts: u32,
    pub(crate) stopped: bool,
}

impl DhcpHandle for FakeDhcpHandle {
    fn restart(&mut self) -> Result<()> {
        self.restarts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stopped = true;
        Ok(())
    }
}
