// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint options.
//!
//! Options are read at endpoint creation and during reconnection attempts;
//! they are never re-read for a live connection.

use std::time::Duration;

/// Options applied to a bound or connected endpoint.
#[derive(Clone, Debug)]
pub struct Options {
    /// Restrict resolution and socket families to IPv4.
    pub ipv4only: bool,

    /// Initial delay before a reconnection (or re-bind) attempt.
    pub reconnect_ivl: Duration,

    /// Upper bound for the exponential reconnect backoff.
    /// Zero means "equal to `reconnect_ivl`" (no growth).
    pub reconnect_ivl_max: Duration,

    /// SO_SNDBUF for the connecting socket (0 = OS default).
    pub sndbuf: usize,

    /// SO_RCVBUF for the connecting socket (0 = OS default).
    pub rcvbuf: usize,

    /// Maximum accepted frame size on a session (anti-OOM protection).
    pub max_frame_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ipv4only: true,
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::ZERO,
            sndbuf: 128 * 1024,
            rcvbuf: 128 * 1024,
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl Options {
    /// Effective backoff cap: `reconnect_ivl_max`, or `reconnect_ivl`
    /// when the cap is zero.
    pub fn effective_reconnect_ivl_max(&self) -> Duration {
        if self.reconnect_ivl_max.is_zero() {
            self.reconnect_ivl
        } else {
            self.reconnect_ivl_max
        }
    }

    /// Builder: allow IPv6.
    pub fn with_ipv6(mut self) -> Self {
        self.ipv4only = false;
        self
    }

    /// Builder: set the initial reconnect interval.
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Builder: set the reconnect interval cap.
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Builder: set socket buffer sizes.
    pub fn with_buffers(mut self, sndbuf: usize, rcvbuf: usize) -> Self {
        self.sndbuf = sndbuf;
        self.rcvbuf = rcvbuf;
        self
    }

    /// Builder: set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Validate the options, returning a message for the first problem.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.reconnect_ivl.is_zero() {
            return Err("reconnect_ivl must be > 0");
        }
        if !self.reconnect_ivl_max.is_zero() && self.reconnect_ivl_max < self.reconnect_ivl {
            return Err("reconnect_ivl_max must be >= reconnect_ivl");
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert!(opts.ipv4only);
        assert_eq!(opts.reconnect_ivl, Duration::from_millis(100));
        assert_eq!(opts.reconnect_ivl_max, Duration::ZERO);
        assert_eq!(opts.sndbuf, 128 * 1024);
        assert_eq!(opts.rcvbuf, 128 * 1024);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_effective_max_zero_means_ivl() {
        let opts = Options::default().with_reconnect_ivl(Duration::from_millis(10));
        assert_eq!(opts.effective_reconnect_ivl_max(), Duration::from_millis(10));

        let opts = opts.with_reconnect_ivl_max(Duration::from_millis(40));
        assert_eq!(opts.effective_reconnect_ivl_max(), Duration::from_millis(40));
    }

    #[test]
    fn test_builders() {
        let opts = Options::default()
            .with_ipv6()
            .with_reconnect_ivl(Duration::from_millis(10))
            .with_reconnect_ivl_max(Duration::from_millis(40))
            .with_buffers(1024, 2048)
            .with_max_frame_size(4096);

        assert!(!opts.ipv4only);
        assert_eq!(opts.reconnect_ivl, Duration::from_millis(10));
        assert_eq!(opts.reconnect_ivl_max, Duration::from_millis(40));
        assert_eq!(opts.sndbuf, 1024);
        assert_eq!(opts.rcvbuf, 2048);
        assert_eq!(opts.max_frame_size, 4096);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let opts = Options::default().with_reconnect_ivl(Duration::ZERO);
        assert!(opts.validate().is_err());

        let opts = Options::default()
            .with_reconnect_ivl(Duration::from_millis(100))
            .with_reconnect_ivl_max(Duration::from_millis(50));
        assert!(opts.validate().is_err());

        let opts = Options::default().with_max_frame_size(0);
        assert!(opts.validate().is_err());
    }
}
