// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint base: the state shared between an endpoint machine on the
//! reactor thread and the user-facing handle.
//!
//! The base holds the address string, the options (read-only after
//! creation), the statistic counters, the last-error cell, and the
//! stopped signal. The machine borrows it for option reads and stat
//! updates during handlers; the handle reads it from any thread.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::options::Options;
use crate::reactor::event::{Event, MachineId, Source};
use crate::reactor::ReactorHandle;
use crate::stats::{EndpointStats, StatKind, StatsSnapshot};

pub(crate) struct BaseShared {
    address: String,
    options: Options,
    stats: EndpointStats,
    last_error: AtomicI32,
    stopped: Mutex<bool>,
    stopped_cond: Condvar,
}

/// Machine-side view of the shared base.
pub(crate) struct EndpointBase {
    shared: Arc<BaseShared>,
}

impl EndpointBase {
    /// Create the base; returns the machine-side view and the shared
    /// state for the user handle.
    pub fn new(address: String, options: Options) -> (Self, Arc<BaseShared>) {
        let shared = Arc::new(BaseShared {
            address,
            options,
            stats: EndpointStats::new(),
            last_error: AtomicI32::new(0),
            stopped: Mutex::new(false),
            stopped_cond: Condvar::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            shared,
        )
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    pub fn stat_increment(&self, kind: StatKind, delta: i64) {
        self.shared.stats.increment(kind, delta);
    }

    /// Record the errno of the most recent failure.
    pub fn set_error(&self, errno: i32) {
        self.shared.last_error.store(errno, Ordering::Relaxed);
    }

    /// Clear the last-error cell (on successful establishment).
    pub fn clear_error(&self) {
        self.shared.last_error.store(0, Ordering::Relaxed);
    }

    /// Signal that the endpoint has fully quiesced.
    pub fn signal_stopped(&self) {
        let mut stopped = self.shared.stopped.lock();
        *stopped = true;
        self.shared.stopped_cond.notify_all();
    }
}

// ============================================================================
// User-facing handle
// ============================================================================

/// User-facing handle to a bound or connected endpoint.
///
/// After creation nothing fails outward: connection health is observed
/// through [`stats`](EndpointHandle::stats) and
/// [`last_error`](EndpointHandle::last_error). Call
/// [`stop`](EndpointHandle::stop) to initiate asynchronous shutdown and
/// [`wait_stopped`](EndpointHandle::wait_stopped) to await quiescence;
/// drop the handle only once it has stopped.
pub struct EndpointHandle {
    shared: Arc<BaseShared>,
    reactor: ReactorHandle,
    mid: MachineId,
}

impl EndpointHandle {
    pub(crate) fn new(shared: Arc<BaseShared>, reactor: ReactorHandle, mid: MachineId) -> Self {
        Self {
            shared,
            reactor,
            mid,
        }
    }

    /// The endpoint address as given to `create`.
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Snapshot of the endpoint statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Read a single statistic counter.
    pub fn stat(&self, kind: StatKind) -> i64 {
        self.shared.stats.get(kind)
    }

    /// OS error number of the most recent connection failure, if any.
    pub fn last_error(&self) -> Option<i32> {
        match self.shared.last_error.load(Ordering::Relaxed) {
            0 => None,
            errno => Some(errno),
        }
    }

    /// Initiate asynchronous shutdown. One call suffices; the endpoint
    /// tears down its sub-machines and then signals stopped.
    pub fn stop(&self) {
        self.reactor.post(self.mid, Source::Action, Event::Stop);
    }

    /// Wait until the endpoint has fully quiesced. Returns `false` on
    /// timeout.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.shared.stopped.lock();
        while !*stopped {
            if self
                .shared
                .stopped_cond
                .wait_until(&mut stopped, deadline)
                .timed_out()
            {
                return *stopped;
            }
        }
        true
    }
}

impl Drop for EndpointHandle {
    fn drop(&mut self) {
        self.reactor.remove(self.mid);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_shares_stats() {
        let (base, shared) = EndpointBase::new("*:5555".to_string(), Options::default());
        base.stat_increment(StatKind::EstablishedConnections, 1);
        assert_eq!(shared.stats.get(StatKind::EstablishedConnections), 1);
    }

    #[test]
    fn test_last_error_cell() {
        let (base, shared) = EndpointBase::new("*:5555".to_string(), Options::default());
        assert_eq!(shared.last_error.load(Ordering::Relaxed), 0);

        base.set_error(111);
        assert_eq!(shared.last_error.load(Ordering::Relaxed), 111);

        base.clear_error();
        assert_eq!(shared.last_error.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stopped_signal() {
        let (base, shared) = EndpointBase::new("*:5555".to_string(), Options::default());
        assert!(!*shared.stopped.lock());

        base.signal_stopped();
        assert!(*shared.stopped.lock());
    }
}
