// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connected (dialing) endpoint state machine.
//!
//! Owns a single outbound socket, one session (endpoint-lifetime), a DNS
//! resolver, and a backoff timer, and drives the
//! resolve -> connect -> active -> recover loop:
//!
//! ```text
//!   IDLE --start--> RESOLVING --done--> STOPPING_DNS --ok--> CONNECTING
//!                        ^                   |  \                |
//!                        |              dns fail \          connected
//!                        |                        v              v
//!   STOPPING_BACKOFF <-- WAITING <-- STOPPING_SOCKET <-errors- ACTIVE
//! ```
//!
//! Every failure after creation funnels into WAITING and a backoff-timed
//! retry; nothing fails outward. Statistics and the last-error cell are
//! the user-visible signal.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::addr;
use crate::backoff::Backoff;
use crate::error::{EndpointError, Result};
use crate::options::Options;
use crate::reactor::event::{
    BackoffEvent, DnsEvent, Event, Machine, SessionEvent, SessionKey, SockEvent, Source,
};
use crate::reactor::{Ctx, ReactorHandle};
use crate::resolver::Resolver;
use crate::session::Session;
use crate::sock::StreamSock;
use crate::stats::StatKind;

use super::base::{EndpointBase, EndpointHandle};

/// The connected endpoint has exactly one session.
const SESSION_KEY: SessionKey = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Resolving,
    StoppingDns,
    Connecting,
    Active,
    StoppingSession,
    StoppingSocket,
    Waiting,
    StoppingBackoff,
    StoppingSessionFinal,
    Stopping,
}

/// The connected endpoint machine.
pub(crate) struct ConnectedEndpoint {
    state: State,
    stopping: bool,
    base: EndpointBase,
    socket: StreamSock,
    session: Session,
    dns: Resolver,
    dns_result: Option<IpAddr>,
    retry: Backoff,
}

impl ConnectedEndpoint {
    /// Validate the address and install the endpoint on the reactor.
    ///
    /// The address has the form `[<local-iface>;]<host>:<port>`: the local
    /// interface is taken from before the first `;`, the port from after
    /// the rightmost `:`.
    pub(crate) fn create(
        handle: &ReactorHandle,
        address: &str,
        options: Options,
    ) -> Result<EndpointHandle> {
        if !handle.is_running() {
            return Err(EndpointError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "reactor is not running",
            )));
        }

        let semi = address.find(';');
        let host_start = semi.map(|i| i + 1).unwrap_or(0);
        let colon = address
            .rfind(':')
            .ok_or_else(|| EndpointError::InvalidAddress(address.to_string()))?;
        if colon < host_start {
            return Err(EndpointError::InvalidAddress(address.to_string()));
        }
        addr::parse_port(&address[colon + 1..])?;

        // The host must be either a literal or at least syntactically a
        // hostname; whether it resolves is decided at runtime.
        let host = &address[host_start..colon];
        if addr::parse_literal(host, options.ipv4only).is_none() && !addr::is_valid_hostname(host) {
            return Err(EndpointError::InvalidAddress(address.to_string()));
        }

        // A named local interface must resolve now.
        if let Some(semi) = semi {
            addr::resolve_interface(&address[..semi], options.ipv4only)?;
        }

        let reconnect_ivl = options.reconnect_ivl;
        let reconnect_ivl_max = options.effective_reconnect_ivl_max();
        let max_frame_size = options.max_frame_size;
        let (base, shared) = EndpointBase::new(address.to_string(), options);

        let machine = ConnectedEndpoint {
            state: State::Idle,
            stopping: false,
            base,
            socket: StreamSock::new(Source::Sock),
            session: Session::new(Source::Session(SESSION_KEY), max_frame_size),
            dns: Resolver::new(Source::Dns),
            dns_result: None,
            retry: Backoff::new(Source::Retry, reconnect_ivl, reconnect_ivl_max),
        };

        let mid = handle.register_machine(Box::new(machine));
        Ok(EndpointHandle::new(shared, handle.clone(), mid))
    }

    // ========================================================================
    // State machine
    // ========================================================================

    fn dispatch(&mut self, ctx: &mut Ctx<'_>, src: Source, event: Event) {
        match self.state {
            // ----------------------------------------------------------------
            // IDLE: waiting to be started.
            // ----------------------------------------------------------------
            State::Idle => match (src, event) {
                (Source::Action, Event::Start) => self.start_resolving(ctx),
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // RESOLVING: the hostname is being turned into an address.
            // ----------------------------------------------------------------
            State::Resolving => match (src, event) {
                (Source::Dns, Event::Dns(DnsEvent::Done)) => {
                    self.dns.stop(ctx);
                    self.state = State::StoppingDns;
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // STOPPING_DNS: resolver commanded to stop; result pending.
            // ----------------------------------------------------------------
            State::StoppingDns => match (src, event) {
                (Source::Dns, Event::Dns(DnsEvent::Stopped)) => match self.dns.take_result() {
                    Ok(ip) => {
                        self.dns_result = Some(ip);
                        self.start_connecting(ctx);
                    }
                    Err(_) => {
                        self.retry.start(ctx);
                        self.state = State::Waiting;
                    }
                },
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // CONNECTING: non-blocking connect in flight.
            // ----------------------------------------------------------------
            State::Connecting => match (src, event) {
                (Source::Sock, Event::Sock(SockEvent::Connected)) => {
                    self.retry.reset();
                    self.session.start(ctx, &mut self.socket);
                    self.state = State::Active;
                    self.base.stat_increment(StatKind::InprogressConnections, -1);
                    self.base.stat_increment(StatKind::EstablishedConnections, 1);
                    self.base.clear_error();
                }
                (Source::Sock, Event::Sock(SockEvent::Error(errno))) => {
                    self.base.set_error(errno);
                    self.socket.stop(ctx);
                    self.state = State::StoppingSocket;
                    self.base.stat_increment(StatKind::InprogressConnections, -1);
                    self.base.stat_increment(StatKind::ConnectErrors, 1);
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // ACTIVE: the session drives the connection.
            // ----------------------------------------------------------------
            State::Active => match (src, event) {
                (Source::Session(SESSION_KEY), Event::Session(SessionEvent::Error)) => {
                    self.session.stop(ctx);
                    self.state = State::StoppingSession;
                    self.base.stat_increment(StatKind::BrokenConnections, 1);
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // STOPPING_SESSION: session commanded to stop after a failure.
            // ----------------------------------------------------------------
            State::StoppingSession => match (src, event) {
                (Source::Session(SESSION_KEY), Event::Session(SessionEvent::Stopped)) => {
                    self.socket.stop(ctx);
                    self.state = State::StoppingSocket;
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // STOPPING_SOCKET: socket commanded to stop; retry follows.
            // ----------------------------------------------------------------
            State::StoppingSocket => match (src, event) {
                (Source::Sock, Event::Sock(SockEvent::Stopped)) => {
                    self.retry.start(ctx);
                    self.state = State::Waiting;
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // WAITING: backoff running before the next attempt.
            // ----------------------------------------------------------------
            State::Waiting => match (src, event) {
                (Source::Retry, Event::Backoff(BackoffEvent::Timeout)) => {
                    self.retry.stop(ctx);
                    self.state = State::StoppingBackoff;
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // STOPPING_BACKOFF: timer commanded to stop before re-resolve.
            // ----------------------------------------------------------------
            State::StoppingBackoff => match (src, event) {
                (Source::Retry, Event::Backoff(BackoffEvent::Stopped)) => {
                    self.start_resolving(ctx);
                }
                (src, event) => self.bad_event(src, &event),
            },

            // The final shutdown states are serviced by shutdown_step.
            State::StoppingSessionFinal | State::Stopping => self.bad_event(src, &event),
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn start_resolving(&mut self, ctx: &mut Ctx<'_>) {
        let address = self.base.address().to_string();
        let ipv4only = self.base.options().ipv4only;
        self.dns.start(ctx, host_of(&address), ipv4only);
        self.state = State::Resolving;
    }

    fn start_connecting(&mut self, ctx: &mut Ctx<'_>) {
        let ip = self.dns_result.expect("resolution result present");
        let address = self.base.address().to_string();
        let opts = self.base.options().clone();

        let colon = address.rfind(':').expect("address validated at create");
        let port = addr::parse_port(&address[colon + 1..]).expect("port validated at create");
        let remote = SocketAddr::new(ip, port);

        let (local_iface, _) = addr::split_local(&address);
        let local_ip = match addr::resolve_interface(local_iface.unwrap_or("*"), opts.ipv4only) {
            Ok(ip) => ip,
            Err(e) => {
                log::warn!("cannot resolve local interface: {}", e);
                self.retry.start(ctx);
                self.state = State::Waiting;
                return;
            }
        };
        // An unspecified wildcard follows the family of the remote address.
        let local_ip = if local_ip.is_unspecified() && local_ip.is_ipv6() != remote.is_ipv6() {
            if remote.is_ipv6() {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        } else {
            local_ip
        };

        if let Err(e) = self.socket.open_for(&remote) {
            log::warn!("cannot create connecting socket: {}", e);
            self.retry.start(ctx);
            self.state = State::Waiting;
            return;
        }

        let prepared = self
            .socket
            .set_buffers(opts.sndbuf, opts.rcvbuf)
            .and_then(|()| self.socket.bind(SocketAddr::new(local_ip, 0)));
        if let Err(e) = prepared {
            log::warn!("cannot prepare connecting socket: {}", e);
            self.socket.discard();
            self.retry.start(ctx);
            self.state = State::Waiting;
            return;
        }

        log::debug!("connecting to {}", remote);
        self.socket.connect(ctx, remote);
        self.state = State::Connecting;
        self.base.stat_increment(StatKind::InprogressConnections, 1);
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    fn shutdown_step(&mut self, ctx: &mut Ctx<'_>, _src: Source, event: Event) {
        if matches!(event, Event::Stop) && !self.stopping {
            self.stopping = true;
            if !self.session.is_idle() {
                self.base.stat_increment(StatKind::DroppedConnections, 1);
                self.session.stop(ctx);
            } else if self.state == State::Connecting {
                // An in-flight attempt is abandoned: keep the books
                // balanced before the socket is torn down below.
                self.base.stat_increment(StatKind::InprogressConnections, -1);
                self.base.stat_increment(StatKind::DroppedConnections, 1);
            }
            self.state = State::StoppingSessionFinal;
        }

        if self.state == State::StoppingSessionFinal {
            if !self.session.is_idle() {
                return;
            }
            self.retry.stop(ctx);
            self.socket.stop(ctx);
            self.dns.stop(ctx);
            self.state = State::Stopping;
        }

        if self.state == State::Stopping {
            if !self.retry.is_idle() || !self.socket.is_idle() || !self.dns.is_idle() {
                return;
            }
            self.state = State::Idle;
            log::debug!("connected endpoint {} stopped", self.base.address());
            self.base.signal_stopped();
        }
    }

    fn bad_event(&self, src: Source, event: &Event) -> ! {
        panic!(
            "connected endpoint: unexpected event in state {:?}: source {:?}, event {:?}",
            self.state, src, event
        );
    }
}

impl Machine for ConnectedEndpoint {
    fn handle(&mut self, ctx: &mut Ctx<'_>, src: Source, event: Event) {
        // Cross-thread resolver completion is plumbing, not a state
        // machine event.
        let event = match event {
            Event::ResolverDone(generation, outcome) => {
                if src == Source::Dns {
                    self.dns.on_result(ctx, generation, outcome);
                } else {
                    log::trace!("resolver completion with unexpected source {:?}", src);
                }
                return;
            }
            event => event,
        };

        // Plumbing: readiness and timer fires go to the owning
        // sub-machine; terminal-event delivery is acknowledged before the
        // state machine sees it; the advisory Shutdown never changes
        // state.
        match (src, &event) {
            (Source::Sock, Event::Io(r)) => {
                let r = *r;
                match self.state {
                    State::Connecting => self.socket.on_io(ctx, r),
                    State::Active => self.session.on_io(ctx, &mut self.socket, r),
                    _ => log::trace!("readiness ignored in state {:?}", self.state),
                }
                return;
            }
            (Source::Retry, Event::Timer(id)) => {
                let id = *id;
                self.retry.on_timer(ctx, id);
                return;
            }
            (Source::Sock, Event::Sock(SockEvent::Shutdown)) => return,
            (Source::Sock, Event::Sock(SockEvent::Stopped)) => self.socket.confirm_stopped(),
            (Source::Retry, Event::Backoff(BackoffEvent::Stopped)) => self.retry.confirm_stopped(),
            (Source::Dns, Event::Dns(DnsEvent::Stopped)) => self.dns.confirm_stopped(),
            (Source::Session(SESSION_KEY), Event::Session(SessionEvent::Stopped)) => {
                self.session.confirm_stopped();
            }
            _ => {}
        }

        if self.stopping || matches!(event, Event::Stop) {
            self.shutdown_step(ctx, src, event);
        } else {
            self.dispatch(ctx, src, event);
        }
    }

    fn is_idle(&self) -> bool {
        self.state == State::Idle
    }
}

/// Host portion of a connected address: between the first `;` (if any)
/// and the rightmost `:`.
fn host_of(address: &str) -> &str {
    let start = address.find(';').map(|i| i + 1).unwrap_or(0);
    let end = address.rfind(':').expect("address validated at create");
    &address[start..end]
}

// ============================================================================
// Tests
// ============================================================================
