// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for endpoint integration tests.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use hmsg::Options;

/// Grab a loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Options with short reconnect intervals so tests cycle quickly.
pub fn fast_options() -> Options {
    Options::default()
        .with_reconnect_ivl(Duration::from_millis(20))
        .with_reconnect_ivl_max(Duration::from_millis(80))
}
