// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking stream socket machine.
//!
//! `StreamSock` wraps the lifetime of one stream socket: created by
//! family, optionally configured and bound, then used either as a
//! listener (bind/listen/accept) or as an outbound connection
//! (connect + completion). Completion and failure are reported as events
//! through the reactor queue; synchronous setup steps return `Result`
//! directly to the caller.
//!
//! Stop semantics: once I/O has begun, `stop` raises an advisory
//! `Shutdown` followed by the terminal `Stopped` and the sock stays
//! non-idle until the owner confirms delivery. A sock that never started
//! I/O quiesces silently.

use std::io;
use std::mem;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::reactor::event::{Event, Readiness, SockEvent, Source};
use crate::reactor::Ctx;

/// Extract the OS error number from an I/O error (-1 when absent).
pub(crate) fn errno_of(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(-1)
}

fn connect_in_progress(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Socket machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SockState {
    /// No socket exists.
    Idle,

    /// Socket created (and possibly bound), no I/O started.
    Open,

    /// Listening for inbound connections.
    Listening,

    /// Non-blocking connect in flight.
    Connecting,

    /// Connected (or adopted) stream in use.
    Active,

    /// Stop commanded; terminal event not yet observed by the owner.
    Stopping,
}

enum SockIo {
    None,
    Raw(Socket),
    Listener(TcpListener),
    Stream(TcpStream),
}

/// One non-blocking stream socket and its registration state.
pub(crate) struct StreamSock {
    tag: Source,
    state: SockState,
    io: SockIo,
    token: Option<Token>,
    errno: i32,
    errored: bool,
}

impl StreamSock {
    /// Create an idle sock that reports events under `tag`.
    pub fn new(tag: Source) -> Self {
        Self {
            tag,
            state: SockState::Idle,
            io: SockIo::None,
            token: None,
            errno: 0,
            errored: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == SockState::Idle
    }

    /// Last recorded OS error number.
    pub fn errno(&self) -> i32 {
        self.errno
    }

    // ========================================================================
    // Setup (synchronous)
    // ========================================================================

    /// Create a non-blocking socket of the family of `addr`.
    pub fn open_for(&mut self, addr: &SocketAddr) -> io::Result<()> {
        debug_assert_eq!(self.state, SockState::Idle);
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        self.io = SockIo::Raw(socket);
        self.state = SockState::Open;
        self.errno = 0;
        self.errored = false;
        Ok(())
    }

    /// Allow rebinding a recently used local address (listener side).
    pub fn set_reuse_addr(&mut self) -> io::Result<()> {
        self.raw()?.set_reuse_address(true)
    }

    /// Apply SO_SNDBUF / SO_RCVBUF (0 keeps the OS default).
    pub fn set_buffers(&mut self, sndbuf: usize, rcvbuf: usize) -> io::Result<()> {
        let socket = self.raw()?;
        if sndbuf > 0 {
            socket.set_send_buffer_size(sndbuf)?;
        }
        if rcvbuf > 0 {
            socket.set_recv_buffer_size(rcvbuf)?;
        }
        Ok(())
    }

    /// Bind to a local address.
    pub fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.raw()?.bind(&addr.into())
    }

    fn raw(&self) -> io::Result<&Socket> {
        match &self.io {
            SockIo::Raw(socket) => Ok(socket),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "socket not open")),
        }
    }

    // ========================================================================
    // Listener side
    // ========================================================================

    /// Start listening and register for accept readiness.
    pub fn listen(&mut self, ctx: &mut Ctx<'_>, backlog: i32) -> io::Result<()> {
        debug_assert_eq!(self.state, SockState::Open);
        let SockIo::Raw(socket) = mem::replace(&mut self.io, SockIo::None) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket not open"));
        };
        socket.listen(backlog)?;
        let mut listener = TcpListener::from_std(socket.into());
        let token = ctx.register(&mut listener, self.tag, Interest::READABLE)?;
        self.io = SockIo::Listener(listener);
        self.token = Some(token);
        self.state = SockState::Listening;
        Ok(())
    }

    /// Try to accept one queued connection.
    ///
    /// `Ok(None)` means no connection is pending. A fatal accept failure
    /// records the errno and raises `Error` (once per listen cycle); the
    /// owner is expected to stop the sock in response.
    pub fn accept_ready(&mut self, ctx: &mut Ctx<'_>) -> io::Result<Option<TcpStream>> {
        if self.errored {
            return Ok(None);
        }
        loop {
            let result = match &self.io {
                SockIo::Listener(listener) => listener.accept(),
                _ => return Ok(None),
            };
            match result {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {}", peer);
                    return Ok(Some(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    self.errno = errno_of(&e);
                    self.errored = true;
                    ctx.raise(self.tag, Event::Sock(SockEvent::Error(self.errno)));
                    return Err(e);
                }
            }
        }
    }

    // ========================================================================
    // Connect side
    // ========================================================================

    /// Start a non-blocking connect to `remote`.
    ///
    /// Never fails synchronously: any failure is reported as an `Error`
    /// event so the owner sees a single completion path.
    pub fn connect(&mut self, ctx: &mut Ctx<'_>, remote: SocketAddr) {
        debug_assert_eq!(self.state, SockState::Open);
        let SockIo::Raw(socket) = mem::replace(&mut self.io, SockIo::None) else {
            self.fail(ctx, io::Error::new(io::ErrorKind::NotConnected, "socket not open"));
            self.state = SockState::Connecting;
            return;
        };

        self.state = SockState::Connecting;

        let pending = match socket.connect(&remote.into()) {
            Ok(()) => false,
            Err(e) if connect_in_progress(&e) => true,
            Err(e) => {
                self.fail(ctx, e);
                return;
            }
        };

        let mut stream = TcpStream::from_std(socket.into());
        match ctx.register(&mut stream, self.tag, Interest::WRITABLE) {
            Ok(token) => {
                self.token = Some(token);
                self.io = SockIo::Stream(stream);
            }
            Err(e) => {
                self.fail(ctx, e);
                return;
            }
        }

        if !pending {
            // Completed synchronously (possible on some platforms).
            self.state = SockState::Active;
            ctx.raise(self.tag, Event::Sock(SockEvent::Connected));
        }
    }

    /// Handle readiness while a connect is in flight.
    pub fn on_io(&mut self, ctx: &mut Ctx<'_>, readiness: Readiness) {
        if self.state != SockState::Connecting || self.errored || !readiness.writable {
            return;
        }
        let outcome = {
            let SockIo::Stream(stream) = &self.io else {
                return;
            };
            match stream.take_error() {
                Ok(Some(e)) => Err(e),
                Ok(None) => match stream.peer_addr() {
                    Ok(peer) => Ok(Some(peer)),
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(None),
                    Err(e) if connect_in_progress(&e) => Ok(None),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        };
        match outcome {
            Ok(Some(peer)) => {
                log::debug!("connected to {}", peer);
                self.state = SockState::Active;
                ctx.raise(self.tag, Event::Sock(SockEvent::Connected));
            }
            Ok(None) => {}
            Err(e) => self.fail(ctx, e),
        }
    }

    fn fail(&mut self, ctx: &mut Ctx<'_>, e: io::Error) {
        log::warn!("socket failed: {}", e);
        self.errno = errno_of(&e);
        self.errored = true;
        ctx.raise(self.tag, Event::Sock(SockEvent::Error(self.errno)));
    }

    // ========================================================================
    // Established stream
    // ========================================================================

    /// Install an accepted stream and register it for session I/O.
    pub fn adopt(&mut self, ctx: &mut Ctx<'_>, mut stream: TcpStream) -> io::Result<()> {
        debug_assert_eq!(self.state, SockState::Idle);
        let token = ctx.register(&mut stream, self.tag, Interest::READABLE | Interest::WRITABLE)?;
        self.io = SockIo::Stream(stream);
        self.token = Some(token);
        self.state = SockState::Active;
        self.errno = 0;
        self.errored = false;
        Ok(())
    }

    /// Widen interests to session I/O after a connect completed.
    pub fn activate(&mut self, ctx: &mut Ctx<'_>) -> io::Result<()> {
        debug_assert_eq!(self.state, SockState::Active);
        match (&mut self.io, self.token) {
            (SockIo::Stream(stream), Some(token)) => {
                ctx.reregister(stream, token, Interest::READABLE | Interest::WRITABLE)
            }
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no active stream")),
        }
    }

    /// The active stream, for session reads and writes.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        match &mut self.io {
            SockIo::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Asynchronous stop: close the socket and report `Shutdown` (when I/O
    /// had begun) followed by the terminal `Stopped`.
    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            SockState::Idle | SockState::Stopping => {}
            SockState::Open => {
                self.io = SockIo::None;
                self.state = SockState::Stopping;
                ctx.raise(self.tag, Event::Sock(SockEvent::Stopped));
            }
            SockState::Listening | SockState::Connecting | SockState::Active => {
                self.release(ctx);
                self.state = SockState::Stopping;
                ctx.raise(self.tag, Event::Sock(SockEvent::Shutdown));
                ctx.raise(self.tag, Event::Sock(SockEvent::Stopped));
            }
        }
    }

    /// Synchronously discard a socket that never started I/O (failed
    /// setup before connect); the next attempt re-creates it.
    pub fn discard(&mut self) {
        debug_assert!(matches!(self.state, SockState::Idle | SockState::Open));
        self.io = SockIo::None;
        self.state = SockState::Idle;
    }

    /// Synchronous close for a sock whose lifecycle is subsumed by its
    /// session (accepted child streams). No events are raised.
    pub fn close(&mut self, ctx: &mut Ctx<'_>) {
        self.release(ctx);
        self.state = SockState::Idle;
    }

    /// The owner observed the terminal `Stopped` event.
    pub fn confirm_stopped(&mut self) {
        debug_assert_eq!(self.state, SockState::Stopping);
        self.state = SockState::Idle;
    }

    fn release(&mut self, ctx: &mut Ctx<'_>) {
        match mem::replace(&mut self.io, SockIo::None) {
            SockIo::Listener(mut listener) => {
                if let Some(token) = self.token.take() {
                    ctx.deregister(&mut listener, token);
                }
            }
            SockIo::Stream(mut stream) => {
                if let Some(token) = self.token.take() {
                    ctx.deregister(&mut stream, token);
                }
            }
            SockIo::Raw(_) | SockIo::None => {
                self.token = None;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_idle() {
        let sock = StreamSock::new(Source::Sock);
        assert!(sock.is_idle());
        assert_eq!(sock.state, SockState::Idle);
        assert_eq!(sock.errno(), 0);
    }

    #[test]
    fn test_open_for_family() {
        let mut sock = StreamSock::new(Source::Sock);
        sock.open_for(&"127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(sock.state, SockState::Open);

        sock.discard();
        assert!(sock.is_idle());

        sock.open_for(&"[::1]:0".parse().unwrap()).unwrap();
        assert_eq!(sock.state, SockState::Open);
        sock.discard();
    }

    #[test]
    fn test_setup_without_open_fails() {
        let mut sock = StreamSock::new(Source::Sock);
        assert!(sock.set_reuse_addr().is_err());
        assert!(sock.bind("127.0.0.1:0".parse().unwrap()).is_err());
    }

    #[test]
    fn test_bind_and_buffers() {
        let mut sock = StreamSock::new(Source::Sock);
        sock.open_for(&"127.0.0.1:0".parse().unwrap()).unwrap();
        sock.set_reuse_addr().unwrap();
        sock.set_buffers(64 * 1024, 64 * 1024).unwrap();
        sock.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        sock.discard();
    }

    #[test]
    fn test_errno_of() {
        let e = io::Error::from_raw_os_error(111);
        assert_eq!(errno_of(&e), 111);

        let e = io::Error::new(io::ErrorKind::Other, "no os code");
        assert_eq!(errno_of(&e), -1);
    }
}
