// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event and source types for machine dispatch.
//!
//! Every delivery to a machine is a `(source, event)` pair. The source
//! names the sub-machine role within the receiving endpoint; it is the
//! "weak back-reference" a sub-machine carries for event delivery, never
//! an owning pointer.

use std::io;
use std::net::IpAddr;

use super::Ctx;

/// Identifier of a machine registered with the reactor.
pub(crate) type MachineId = u64;

/// Key distinguishing sessions within one endpoint.
pub(crate) type SessionKey = u32;

/// Identifier of an armed timer. Cancellation is lazy: a fired timer whose
/// id no longer matches the machine's armed id is ignored.
pub(crate) type TimerId = u64;

/// Sub-machine role within the receiving endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Source {
    /// User-initiated actions (start, stop).
    Action,

    /// The endpoint's own socket: the listener (bound) or the
    /// connecting/connected socket (connected).
    Sock,

    /// A session. For the bound endpoint the key identifies the pending
    /// or child session; the connected endpoint uses a single fixed key.
    Session(SessionKey),

    /// The reconnect backoff timer.
    Retry,

    /// The DNS resolver.
    Dns,
}

/// Socket readiness, decoded from the poller.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Events emitted by the underlying socket machine.
#[derive(Debug)]
pub(crate) enum SockEvent {
    /// An outbound connect completed.
    Connected,

    /// Advisory: the socket had begun I/O and is shutting down. Always
    /// precedes `Stopped`; endpoints ignore it without a state change.
    Shutdown,

    /// Terminal event of a stop command.
    Stopped,

    /// The socket failed; the OS errno is attached.
    Error(i32),
}

/// Events emitted by the backoff timer machine.
#[derive(Debug)]
pub(crate) enum BackoffEvent {
    /// The delay elapsed.
    Timeout,

    /// Terminal event of a stop command.
    Stopped,
}

/// Events emitted by the DNS resolver machine.
#[derive(Debug)]
pub(crate) enum DnsEvent {
    /// Resolution finished; the outcome is held by the resolver until
    /// the owner collects it after `Stopped`.
    Done,

    /// Terminal event of a stop command.
    Stopped,
}

/// Events emitted by a session machine.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The pending accept completed; the session now drives the new
    /// connection.
    Accepted,

    /// The peer failed the session (reset, EOF, protocol violation).
    Error,

    /// Terminal event of a stop command.
    Stopped,
}

/// A delivery to a machine handler.
#[derive(Debug)]
pub(crate) enum Event {
    /// Start the machine (queued once at registration).
    Start,

    /// Initiate asynchronous shutdown.
    Stop,

    /// Raw socket readiness for the sub-machine that registered the token.
    Io(Readiness),

    /// A timer fired.
    Timer(TimerId),

    /// Cross-thread completion of a DNS lookup, routed to the resolver.
    /// Carries the resolver generation so stale lookups are discarded.
    ResolverDone(u64, io::Result<IpAddr>),

    /// High-level socket event.
    Sock(SockEvent),

    /// High-level backoff event.
    Backoff(BackoffEvent),

    /// High-level resolver event.
    Dns(DnsEvent),

    /// High-level session event.
    Session(SessionEvent),
}

/// A state machine driven by the reactor.
///
/// Handlers run on the reactor thread, strictly serialized. A handler
/// must never block: it reacts to the event, possibly commands its
/// sub-machines, and returns. Events raised while handling are queued
/// and delivered in later invocations.
pub(crate) trait Machine: Send {
    /// Handle one `(source, event)` delivery.
    fn handle(&mut self, ctx: &mut Ctx<'_>, src: Source, event: Event);

    /// Whether the machine has fully quiesced (reached its IDLE state).
    fn is_idle(&self) -> bool;
}
