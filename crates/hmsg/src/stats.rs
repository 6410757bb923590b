// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint statistics.
//!
//! Statistics are the primary user-visible telemetry of an endpoint: after
//! `create` succeeds nothing fails outward, so connection health is
//! observed through these counters (and the last-error cell).

use std::sync::atomic::{AtomicI64, Ordering};

/// Statistic kinds recorded by the endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatKind {
    /// Outbound connection attempts currently in flight.
    InprogressConnections,

    /// Connections successfully established (accepted or connected).
    EstablishedConnections,

    /// Established connections that subsequently failed.
    BrokenConnections,

    /// Outbound connection attempts that failed.
    ConnectErrors,

    /// Connections dropped by a user-initiated stop.
    DroppedConnections,
}

/// Atomic counters for one endpoint.
///
/// Incremented from the reactor thread, read from any thread.
#[derive(Debug, Default)]
pub struct EndpointStats {
    inprogress_connections: AtomicI64,
    established_connections: AtomicI64,
    broken_connections: AtomicI64,
    connect_errors: AtomicI64,
    dropped_connections: AtomicI64,
}

impl EndpointStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the counter of the given kind.
    pub fn increment(&self, kind: StatKind, delta: i64) {
        self.cell(kind).fetch_add(delta, Ordering::Relaxed);
    }

    /// Read a single counter.
    pub fn get(&self, kind: StatKind) -> i64 {
        self.cell(kind).load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inprogress_connections: self.get(StatKind::InprogressConnections),
            established_connections: self.get(StatKind::EstablishedConnections),
            broken_connections: self.get(StatKind::BrokenConnections),
            connect_errors: self.get(StatKind::ConnectErrors),
            dropped_connections: self.get(StatKind::DroppedConnections),
        }
    }

    fn cell(&self, kind: StatKind) -> &AtomicI64 {
        match kind {
            StatKind::InprogressConnections => &self.inprogress_connections,
            StatKind::EstablishedConnections => &self.established_connections,
            StatKind::BrokenConnections => &self.broken_connections,
            StatKind::ConnectErrors => &self.connect_errors,
            StatKind::DroppedConnections => &self.dropped_connections,
        }
    }
}

/// Point-in-time copy of an endpoint's statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Outbound attempts currently in flight.
    pub inprogress_connections: i64,

    /// Connections successfully established.
    pub established_connections: i64,

    /// Established connections that later failed.
    pub broken_connections: i64,

    /// Failed connection attempts.
    pub connect_errors: i64,

    /// Connections dropped by stop().
    pub dropped_connections: i64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let stats = EndpointStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_increment_and_get() {
        let stats = EndpointStats::new();

        stats.increment(StatKind::InprogressConnections, 1);
        assert_eq!(stats.get(StatKind::InprogressConnections), 1);

        // Matching decrement returns to the pre-attempt level
        stats.increment(StatKind::InprogressConnections, -1);
        assert_eq!(stats.get(StatKind::InprogressConnections), 0);

        stats.increment(StatKind::EstablishedConnections, 1);
        stats.increment(StatKind::EstablishedConnections, 1);
        assert_eq!(stats.get(StatKind::EstablishedConnections), 2);
    }

    #[test]
    fn test_snapshot() {
        let stats = EndpointStats::new();
        stats.increment(StatKind::EstablishedConnections, 1);
        stats.increment(StatKind::BrokenConnections, 1);
        stats.increment(StatKind::ConnectErrors, 3);
        stats.increment(StatKind::DroppedConnections, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.inprogress_connections, 0);
        assert_eq!(snap.established_connections, 1);
        assert_eq!(snap.broken_connections, 1);
        assert_eq!(snap.connect_errors, 3);
        assert_eq!(snap.dropped_connections, 1);
    }
}
