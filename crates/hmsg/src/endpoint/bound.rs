// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bound (listening) endpoint state machine.
//!
//! Owns a listening socket, the at-most-one *pending* session awaiting an
//! inbound connection, the set of established child sessions, and a
//! backoff timer for re-bind attempts.
//!
//! ```text
//!           IDLE --start--> [bind+listen] --ok--> ACTIVE <---+
//!             ^                  |  \                  |      |
//!             |        bind/listen \  socket creation  |      |
//!             |             fail    \      fail        |      |
//!          (stop path)               v                 v      |
//!                               CLOSING --> WAITING --> STOPPING_BACKOFF
//!                                    (listener error joins here)
//! ```
//!
//! Established children are untouched by the listener recovery cycle;
//! they live until they fail, the peer leaves, or the endpoint is
//! stopped.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use crate::addr;
use crate::backoff::Backoff;
use crate::error::{EndpointError, Result};
use crate::options::Options;
use crate::reactor::event::{
    BackoffEvent, Event, Machine, Readiness, SessionEvent, SessionKey, SockEvent, Source,
};
use crate::reactor::{Ctx, ReactorHandle};
use crate::session::Session;
use crate::sock::StreamSock;
use crate::stats::StatKind;

use super::base::{EndpointBase, EndpointHandle};

/// Fixed listen backlog: deep enough to ride out reconnection storms.
const LISTEN_BACKLOG: i32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    /// Transient: listener being set up within one handler invocation.
    Listening,
    Active,
    Waiting,
    Closing,
    StoppingPending,
    StoppingListener,
    StoppingChildren,
    StoppingBackoff,
}

/// One session and the socket it drives.
struct Child {
    session: Session,
    sock: StreamSock,
    /// Whether this child was counted as an established connection.
    established: bool,
}

/// The bound endpoint machine.
pub(crate) struct BoundEndpoint {
    state: State,
    stopping: bool,
    base: EndpointBase,
    listener: StreamSock,
    sessions: HashMap<SessionKey, Child>,
    pending: Option<SessionKey>,
    next_key: SessionKey,
    retry: Backoff,
}

impl BoundEndpoint {
    /// Validate the address and install the endpoint on the reactor.
    ///
    /// The address has the form `<iface-or-wildcard>:<port>`; the port is
    /// taken from after the last `:`.
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

        let (iface, port) = addr::split_port(address)?;
        addr::parse_port(port)?;
        addr::resolve_interface(iface, options.ipv4only)?;

        let reconnect_ivl = options.reconnect_ivl;
        let reconnect_ivl_max = options.effective_reconnect_ivl_max();
        let (base, shared) = EndpointBase::new(address.to_string(), options);

        let machine = BoundEndpoint {
            state: State::Idle,
            stopping: false,
            base,
            listener: StreamSock::new(Source::Sock),
            sessions: HashMap::new(),
            pending: None,
            next_key: 0,
            retry: Backoff::new(Source::Retry, reconnect_ivl, reconnect_ivl_max),
        };

        let mid = handle.register_machine(Box::new(machine));
        Ok(EndpointHandle::new(shared, handle.clone(), mid))
    }

    // ========================================================================
    // Plumbing: readiness routing
    // ========================================================================

    fn on_listener_io(&mut self, ctx: &mut Ctx<'_>, _readiness: Readiness) {
        // Any readiness on the listener (including an error edge) probes
        // the accept; a broken listener surfaces through accept_ready.
        if self.state != State::Active {
            return;
        }
        let Some(key) = self.pending else {
            return;
        };
        let Some(child) = self.sessions.get_mut(&key) else {
            return;
        };
        child
            .session
            .on_listener_ready(ctx, &mut self.listener, &mut child.sock);
    }

    fn on_child_io(&mut self, ctx: &mut Ctx<'_>, key: SessionKey, readiness: Readiness) {
        match self.sessions.get_mut(&key) {
            Some(child) => child.session.on_io(ctx, &mut child.sock, readiness),
            None => log::trace!("readiness for retired session {}", key),
        }
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
                (Source::Action, Event::Start) => self.start_listening(ctx),
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // ACTIVE: accepting; children serviced as they come and go.
            // ----------------------------------------------------------------
            State::Active => match (src, event) {
                (Source::Session(key), Event::Session(SessionEvent::Accepted))
                    if self.pending == Some(key) =>
                {
                    // The pending session now carries an established
                    // connection; leave it with the children and arm the
                    // next accept.
                    self.pending = None;
                    if let Some(child) = self.sessions.get_mut(&key) {
                        child.established = true;
                    }
                    self.base.stat_increment(StatKind::EstablishedConnections, 1);
                    self.start_accepting(ctx);
                }
                (Source::Session(key), Event::Session(SessionEvent::Error)) => {
                    self.on_child_error(ctx, key);
                }
                (Source::Session(key), Event::Session(SessionEvent::Stopped)) => {
                    self.destroy_child(ctx, key);
                }
                (Source::Sock, Event::Sock(SockEvent::Error(_))) => {
                    // Listener failed. The pending accept is abandoned;
                    // established children ride out the recovery cycle.
                    log::warn!(
                        "listener failed on {} (errno {}), re-binding",
                        self.base.address(),
                        self.listener.errno()
                    );
                    self.abort_pending(ctx);
                    self.listener.stop(ctx);
                    self.state = State::Closing;
                }
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // CLOSING: listener commanded to stop after a failure.
            // ----------------------------------------------------------------
            State::Closing => match (src, event) {
                (Source::Sock, Event::Sock(SockEvent::Stopped)) => {
                    self.retry.start(ctx);
                    self.state = State::Waiting;
                }
                (Source::Session(key), Event::Session(sev)) => self.child_event(ctx, key, sev),
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // WAITING: backoff running before the next bind attempt.
            // ----------------------------------------------------------------
            State::Waiting => match (src, event) {
                (Source::Retry, Event::Backoff(BackoffEvent::Timeout)) => {
                    self.retry.stop(ctx);
                    self.state = State::StoppingBackoff;
                }
                (Source::Session(key), Event::Session(sev)) => self.child_event(ctx, key, sev),
                (src, event) => self.bad_event(src, &event),
            },

            // ----------------------------------------------------------------
            // STOPPING_BACKOFF: timer commanded to stop before re-bind.
            // ----------------------------------------------------------------
            State::StoppingBackoff => match (src, event) {
                (Source::Retry, Event::Backoff(BackoffEvent::Stopped)) => {
                    self.start_listening(ctx);
                }
                (Source::Session(key), Event::Session(sev)) => self.child_event(ctx, key, sev),
                (src, event) => self.bad_event(src, &event),
            },

            // The shutdown states are serviced by shutdown_step; Listening
            // never outlives its handler invocation.
            State::Listening
            | State::StoppingPending
            | State::StoppingListener
            | State::StoppingChildren => self.bad_event(src, &event),
        }
    }

    /// Child events are serviced identically in every non-shutdown state:
    /// a failed child is commanded to stop, a stopped child is destroyed.
    fn child_event(&mut self, ctx: &mut Ctx<'_>, key: SessionKey, sev: SessionEvent) {
        match sev {
            SessionEvent::Error => self.on_child_error(ctx, key),
            SessionEvent::Stopped => self.destroy_child(ctx, key),
            SessionEvent::Accepted => panic!(
                "bound endpoint: unexpected Accepted from session {} in state {:?}",
                key, self.state
            ),
        }
    }

    fn on_child_error(&mut self, ctx: &mut Ctx<'_>, key: SessionKey) {
        if let Some(child) = self.sessions.get_mut(&key) {
            if child.established {
                self.base.stat_increment(StatKind::BrokenConnections, 1);
            }
            child.session.stop(ctx);
        }
    }

    /// Destroy a child whose terminal event has been observed. Removal
    /// and destruction happen in the same handler invocation.
    fn destroy_child(&mut self, ctx: &mut Ctx<'_>, key: SessionKey) {
        let Some(mut child) = self.sessions.remove(&key) else {
            panic!(
                "bound endpoint: Stopped from unknown session {} in state {:?}",
                key, self.state
            );
        };
        child.sock.close(ctx);

        if self.pending == Some(key) {
            self.pending = None;
            if self.state == State::Active {
                self.start_accepting(ctx);
            }
        }
    }

    fn abort_pending(&mut self, ctx: &mut Ctx<'_>) {
        let Some(key) = self.pending.take() else {
            return;
        };
        let accepting = self
            .sessions
            .get(&key)
            .is_some_and(|c| c.session.is_accepting());
        if accepting {
            // Nothing owned yet: quiesces synchronously.
            if let Some(mut child) = self.sessions.remove(&key) {
                child.session.abort();
                child.sock.close(ctx);
            }
        } else if let Some(child) = self.sessions.get_mut(&key) {
            // The pending session failed independently (it already owns a
            // connection); let its Stopped event retire it.
            child.session.stop(ctx);
        }
    }

    // ========================================================================
    // Actions
    // ========================================================================

    fn start_listening(&mut self, ctx: &mut Ctx<'_>) {
        let address = self.base.address().to_string();
        let ipv4only = self.base.options().ipv4only;
        let (iface, port) = addr::split_port(&address).expect("address validated at create");
        let port = addr::parse_port(port).expect("port validated at create");
        let ip = addr::resolve_interface(iface, ipv4only).expect("interface validated at create");
        let local = SocketAddr::new(ip, port);

        self.state = State::Listening;

        if let Err(e) = self.listener.open_for(&local) {
            log::warn!("cannot create listening socket for {}: {}", local, e);
            self.retry.start(ctx);
            self.state = State::Waiting;
            return;
        }

        if let Err(e) = self.try_listen(ctx, local) {
            log::warn!("cannot listen on {}: {}", local, e);
            self.listener.stop(ctx);
            self.state = State::Closing;
            return;
        }

        log::debug!("listening on {}", local);
        self.retry.reset();
        self.start_accepting(ctx);
        self.state = State::Active;
    }

    fn try_listen(&mut self, ctx: &mut Ctx<'_>, local: SocketAddr) -> io::Result<()> {
        self.listener.set_reuse_addr()?;
        self.listener.bind(local)?;
        self.listener.listen(ctx, LISTEN_BACKLOG)
    }

    fn start_accepting(&mut self, ctx: &mut Ctx<'_>) {
        debug_assert!(self.pending.is_none());

        let key = self.next_key;
        self.next_key = self.next_key.wrapping_add(1);

        let mut session = Session::new(Source::Session(key), self.base.options().max_frame_size);
        session.start_accept();
        self.sessions.insert(
            key,
            Child {
                session,
                sock: StreamSock::new(Source::Session(key)),
                established: false,
            },
        );
        self.pending = Some(key);

        // The poller is edge-triggered: a connection may already be queued
        // on the listener, so probe once instead of waiting for the next
        // readiness edge.
        ctx.raise(
            Source::Sock,
            Event::Io(Readiness {
                readable: true,
                writable: false,
            }),
        );
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    fn shutdown_step(&mut self, ctx: &mut Ctx<'_>, src: Source, event: Event) {
        if matches!(event, Event::Stop) && !self.stopping {
            self.stopping = true;
            self.retry.stop(ctx);
            if let Some(key) = self.pending {
                if let Some(child) = self.sessions.get_mut(&key) {
                    child.session.stop(ctx);
                }
                self.state = State::StoppingPending;
            } else {
                self.listener.stop(ctx);
                self.state = State::StoppingListener;
            }
        }

        // Children keep running until the blanket stop reaches them; their
        // stray events (queued before the command) are serviced in any
        // shutdown state.
        if let (Source::Session(key), Event::Session(sev)) = (src, &event) {
            match sev {
                SessionEvent::Stopped => self.remove_child(ctx, key),
                SessionEvent::Error => {
                    if let Some(child) = self.sessions.get_mut(&key) {
                        child.session.stop(ctx);
                    }
                }
                SessionEvent::Accepted => {
                    // The accept completed just before the stop was
                    // processed; the session is torn down like any child.
                    log::trace!("accept raced shutdown on session {}", key);
                }
            }
        }

        if self.state == State::StoppingPending {
            let pending_idle = match self.pending.and_then(|k| self.sessions.get(&k)) {
                Some(child) => child.session.is_idle(),
                None => true,
            };
            if !pending_idle {
                return;
            }
            if let Some(key) = self.pending.take() {
                if let Some(mut child) = self.sessions.remove(&key) {
                    child.sock.close(ctx);
                }
            }
            self.listener.stop(ctx);
            self.state = State::StoppingListener;
        }

        if self.state == State::StoppingListener {
            if !self.listener.is_idle() {
                return;
            }
            for child in self.sessions.values_mut() {
                child.session.stop(ctx);
            }
            self.state = State::StoppingChildren;
        }

        if self.state == State::StoppingChildren {
            // The retry timer may still have an undelivered terminal event
            // when the stop raced a backoff cycle; wait for everything.
            if !self.sessions.is_empty() || !self.retry.is_idle() || !self.listener.is_idle() {
                return;
            }
            self.state = State::Idle;
            log::debug!("bound endpoint {} stopped", self.base.address());
            self.base.signal_stopped();
        }
    }

    fn remove_child(&mut self, ctx: &mut Ctx<'_>, key: SessionKey) {
        if let Some(mut child) = self.sessions.remove(&key) {
            child.sock.close(ctx);
        }
    }

    fn bad_event(&self, src: Source, event: &Event) -> ! {
        panic!(
            "bound endpoint: unexpected event in state {:?}: source {:?}, event {:?}",
            self.state, src, event
        );
    }
}

impl Machine for BoundEndpoint {
    fn handle(&mut self, ctx: &mut Ctx<'_>, src: Source, event: Event) {
        // Plumbing first: raw readiness and timer fires go to the
        // sub-machine that owns them; terminal-event delivery is
        // acknowledged before the state machine sees it. The advisory
        // Shutdown never changes state.
        match (src, &event) {
            (Source::Sock, Event::Io(r)) => {
                let r = *r;
                self.on_listener_io(ctx, r);
                return;
            }
            (Source::Session(key), Event::Io(r)) => {
                let (key, r) = (key, *r);
                self.on_child_io(ctx, key, r);
                return;
            }
            (Source::Retry, Event::Timer(id)) => {
                let id = *id;
                self.retry.on_timer(ctx, id);
                return;
            }
            (Source::Sock, Event::Sock(SockEvent::Shutdown)) => return,
            (Source::Sock, Event::Sock(SockEvent::Stopped)) => self.listener.confirm_stopped(),
            (Source::Retry, Event::Backoff(BackoffEvent::Stopped)) => self.retry.confirm_stopped(),
            (Source::Session(key), Event::Session(SessionEvent::Stopped)) => {
                if let Some(child) = self.sessions.get_mut(&key) {
                    child.session.confirm_stopped();
                }
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
