// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Integration tests for the bound (listening) endpoint, against real
//! loopback sockets.

mod common;

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use hmsg::{EndpointError, Options, Reactor, PROTOCOL_HEADER};

use common::{fast_options, free_port, wait_until};

#[test]
fn create_rejects_bad_addresses() {
    let reactor = Reactor::spawn().unwrap();
    let handle = reactor.handle();

    assert!(matches!(
        handle.bind("nocolon", Options::default()),
        Err(EndpointError::InvalidAddress(_))
    ));
    assert!(matches!(
        handle.bind("*:0", Options::default()),
        Err(EndpointError::InvalidAddress(_))
    ));
    assert!(matches!(
        handle.bind("*:99999", Options::default()),
        Err(EndpointError::InvalidAddress(_))
    ));
    assert!(matches!(
        handle.bind("*:http", Options::default()),
        Err(EndpointError::InvalidAddress(_))
    ));
    // Named OS interfaces are not enumerated
    assert!(matches!(
        handle.bind("eth0:5555", Options::default()),
        Err(EndpointError::NoDevice(_))
    ));
}

#[test]
fn immediate_stop_reaches_idle() {
    let reactor = Reactor::spawn().unwrap();
    let port = free_port();
    let ep = reactor
        .handle()
        .bind(&format!("127.0.0.1:{}", port), Options::default())
        .unwrap();

    ep.stop();
    assert!(ep.wait_stopped(Duration::from_secs(2)));

    let stats = ep.stats();
    assert_eq!(stats.established_connections, 0);
    assert_eq!(stats.broken_connections, 0);
}

#[test]
fn accept_counts_established_and_broken() {
    let reactor = Reactor::spawn().unwrap();
    let port = free_port();
    let ep = reactor
        .handle()
        .bind(&format!("127.0.0.1:{}", port), fast_options())
        .unwrap();

    // Connect once the listener is up; then hang up straight away.
    let mut stream = None;
    assert!(wait_until(Duration::from_secs(2), || {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(s) => {
                stream = Some(s);
                true
            }
            Err(_) => false,
        }
    }));
    drop(stream);

    assert!(wait_until(Duration::from_secs(2), || {
        let stats = ep.stats();
        stats.established_connections == 1 && stats.broken_connections == 1
    }));

    ep.stop();
    assert!(ep.wait_stopped(Duration::from_secs(2)));
}

#[test]
fn bind_retry_recovers_after_conflict_released() {
    let port = free_port();
    let conflict = TcpListener::bind(("127.0.0.1", port)).unwrap();

    let reactor = Reactor::spawn().unwrap();
    let ep = reactor
        .handle()
        .bind(&format!("127.0.0.1:{}", port), fast_options())
        .unwrap();

    // While the conflicting listener holds the port, the endpoint cycles
    // through its re-bind backoff without accepting anything.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(ep.stats().established_connections, 0);

    drop(conflict);

    let mut stream = None;
    assert!(wait_until(Duration::from_secs(3), || {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(s) => {
                stream = Some(s);
                true
            }
            Err(_) => false,
        }
    }));

    assert!(wait_until(Duration::from_secs(2), || {
        ep.stats().established_connections == 1
    }));

    drop(stream);
    ep.stop();
    assert!(ep.wait_stopped(Duration::from_secs(2)));
}

#[test]
fn children_accumulate_and_shut_down() {
    let reactor = Reactor::spawn().unwrap();
    let port = free_port();
    let ep = reactor
        .handle()
        .bind(&format!("127.0.0.1:{}", port), fast_options())
        .unwrap();

    let mut first = None;
    assert!(wait_until(Duration::from_secs(2), || {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(s) => {
                first = Some(s);
                true
            }
            Err(_) => false,
        }
    }));
    let mut first = first.unwrap();
    first.write_all(&PROTOCOL_HEADER).unwrap();

    let mut second = TcpStream::connect(("127.0.0.1", port)).unwrap();
    second.write_all(&PROTOCOL_HEADER).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        ep.stats().established_connections == 2
    }));
    assert_eq!(ep.stats().broken_connections, 0);

    // Stop with both children still connected: the shutdown sequences the
    // pending accept, the listener, then every child.
    ep.stop();
    assert!(ep.wait_stopped(Duration::from_secs(2)));

    drop(first);
    drop(second);
}
