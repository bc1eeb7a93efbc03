use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Error;

/// One-shot "this kernel object's creation attempt has concluded" signal.
///
/// A gate is opened when a `link-info` is reserved under the topology lock,
/// and closed exactly once, by the caller that performed the (possibly
/// failing) kernel create, after the create call has returned. Parallel
/// callers that lost the reservation race wait on the same gate and observe
/// whatever index the winner published, success or not. The gate never
/// reopens.
#[derive(Debug)]
pub(crate) struct ReadyGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Debug, Clone, Copy)]
struct GateState {
    closed: bool,
    index: u32,
}

impl ReadyGate {
    pub(crate) fn new() -> Self {
        ReadyGate {
            state: Mutex::new(GateState {
                closed: false,
                index: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// A gate that is already closed, carrying a known index. Used by the
    /// reconciler, which discovers links that already exist in the kernel.
    pub(crate) fn closed(index: u32) -> Self {
        ReadyGate {
            state: Mutex::new(GateState {
                closed: true,
                index,
            }),
            cond: Condvar::new(),
        }
    }

    /// Closes the gate, publishing `index` to any waiters. A no-op if the
    /// gate is already closed: the invariant is "closed exactly once", and a
    /// caller that races to close twice should not overwrite the first
    /// result.
    pub(crate) fn close(&self, index: u32) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.index = index;
        self.cond.notify_all();
    }

    /// Blocks until the gate closes or `timeout` elapses, returning the
    /// published index.
    pub(crate) fn wait(&self, timeout: Duration) -> Result<u32, Error> {
        let mut state = self.state.lock();
        let deadline = Instant::now() + timeout;
        while !state.closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::DeviceNotReady {
                    alias: String::new(),
                    timeout,
                });
            }
            let result = self.cond.wait_for(&mut state, remaining);
            if result.timed_out() && !state.closed {
                return Err(Error::DeviceNotReady {
                    alias: String::new(),
                    timeout,
                });
            }
        }
        Ok(state.index)
    }
}
