// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Asynchronous DNS resolver machine.
//!
//! Literal hosts complete immediately (the uniform event path is kept: the
//! owner still sees `Done` then drives a stop). Hostnames resolve on a
//! short-lived worker thread using the system resolver; the outcome is
//! posted back through the reactor handle. A generation counter discards
//! results of lookups abandoned by `stop`.

use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::thread;

use crate::addr;
use crate::reactor::event::{DnsEvent, Event, Source};
use crate::reactor::Ctx;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResolverState {
    /// No lookup in progress.
    Idle,

    /// Worker thread running (or literal completion queued).
    Resolving,

    /// `Done` raised; waiting for the owner to stop us.
    Done,

    /// Stop commanded; terminal event not yet observed by the owner.
    Stopping,
}

/// DNS resolution machine.
pub(crate) struct Resolver {
    tag: Source,
    state: ResolverState,
    generation: u64,
    result: Option<io::Result<IpAddr>>,
}

impl Resolver {
    pub fn new(tag: Source) -> Self {
        Self {
            tag,
            state: ResolverState::Idle,
            generation: 0,
            result: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == ResolverState::Idle
    }

    /// Begin resolving `host`. `ipv4only` restricts candidate families.
    pub fn start(&mut self, ctx: &mut Ctx<'_>, host: &str, ipv4only: bool) {
        debug_assert_eq!(self.state, ResolverState::Idle);
        self.generation += 1;
        self.result = None;
        self.state = ResolverState::Resolving;

        // Literal shortcut: no lookup thread, but the same event path.
        if let Some(ip) = addr::parse_literal(host, ipv4only) {
            self.result = Some(Ok(ip));
            self.state = ResolverState::Done;
            ctx.raise(self.tag, Event::Dns(DnsEvent::Done));
            return;
        }

        let generation = self.generation;
        let handle = ctx.handle();
        let mid = ctx.machine_id();
        let tag = self.tag;
        let host = host.to_string();

        let spawned = thread::Builder::new()
            .name("hmsg-dns".to_string())
            .spawn(move || {
                let outcome = lookup(&host, ipv4only);
                handle.post(mid, tag, Event::ResolverDone(generation, outcome));
            });

        if let Err(e) = spawned {
            log::warn!("failed to spawn resolver thread: {}", e);
            self.result = Some(Err(e));
            self.state = ResolverState::Done;
            ctx.raise(self.tag, Event::Dns(DnsEvent::Done));
        }
    }

    /// A lookup thread posted its outcome.
    pub fn on_result(&mut self, ctx: &mut Ctx<'_>, generation: u64, outcome: io::Result<IpAddr>) {
        if self.state != ResolverState::Resolving || generation != self.generation {
            log::trace!("stale resolver result dropped");
            return;
        }
        if let Err(e) = &outcome {
            log::warn!("name resolution failed: {}", e);
        }
        self.result = Some(outcome);
        self.state = ResolverState::Done;
        ctx.raise(self.tag, Event::Dns(DnsEvent::Done));
    }

    /// Collect the stored outcome after `Stopped`.
    pub fn take_result(&mut self) -> io::Result<IpAddr> {
        self.result
            .take()
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotFound, "no resolution result")))
    }

    /// Stop the resolver; an in-flight lookup is abandoned and its late
    /// result discarded by generation check.
    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            ResolverState::Idle | ResolverState::Stopping => {}
            ResolverState::Resolving | ResolverState::Done => {
                self.state = ResolverState::Stopping;
                ctx.raise(self.tag, Event::Dns(DnsEvent::Stopped));
            }
        }
    }

    /// The owner observed the terminal `Stopped` event.
    pub fn confirm_stopped(&mut self) {
        debug_assert_eq!(self.state, ResolverState::Stopping);
        self.state = ResolverState::Idle;
    }
}

/// Blocking lookup via the system resolver, family-filtered.
fn lookup(host: &str, ipv4only: bool) -> io::Result<IpAddr> {
    let addrs = (host, 0u16).to_socket_addrs()?;
    addrs
        .map(|sa| sa.ip())
        .find(|ip| !ipv4only || ip.is_ipv4())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no suitable address for {}", host),
            )
        })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_localhost() {
        // "localhost" resolves everywhere; under ipv4only the answer
        // must be a v4 address.
        let ip = lookup("localhost", true).unwrap();
        assert!(ip.is_ipv4());
    }

    #[test]
    fn test_lookup_failure() {
        assert!(lookup("invalid.example.invalid", true).is_err());
    }

    #[test]
    fn test_take_result_without_lookup() {
        let mut r = Resolver::new(Source::Dns);
        assert!(r.take_result().is_err());
        assert!(r.is_idle());
    }
}
