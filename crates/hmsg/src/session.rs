// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection session machine.
//!
//! A session carries the lifetime of one established connection: it
//! completes the accept (bound side), exchanges the 8-byte protocol
//! header, then validates length-prefix frames from the peer. Any peer
//! failure — reset, EOF, a bad header, a framing violation — is surfaced
//! to the owning endpoint as a single `Error` event.
//!
//! Message payloads are validated and discarded here; handing them to a
//! protocol core happens above this layer.
//!
//! The session never owns the socket: the endpoint passes its
//! `StreamSock` into each call, mirroring the control-without-ownership
//! split between connection lifetime and socket lifetime.

use std::io::{self, Read, Write};

use crate::frame::FrameCodec;
use crate::reactor::event::{Event, Readiness, SessionEvent, Source};
use crate::reactor::Ctx;
use crate::sock::StreamSock;

/// Protocol header exchanged after connect/accept:
/// NUL, "MSG", protocol version, three reserved bytes.
pub const PROTOCOL_HEADER: [u8; 8] = [0x00, b'M', b'S', b'G', 0x01, 0x00, 0x00, 0x00];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    /// Not attached to a connection.
    Idle,

    /// Waiting for the listener to hand us an inbound connection.
    Accepting,

    /// Connection up; protocol headers in flight.
    Handshake,

    /// Headers exchanged; validating frames.
    Active,

    /// Error raised; waiting for the owner to stop us.
    Failed,

    /// Stop commanded; terminal event not yet observed by the owner.
    Stopping,
}

/// Connection-lifetime sub-machine.
pub(crate) struct Session {
    tag: Source,
    state: SessionState,
    codec: FrameCodec,
    outbuf: Vec<u8>,
    outpos: usize,
    hdr: [u8; 8],
    hdr_read: usize,
    frames: u64,
}

impl Session {
    pub fn new(tag: Source, max_frame_size: usize) -> Self {
        Self {
            tag,
            state: SessionState::Idle,
            codec: FrameCodec::new(max_frame_size),
            outbuf: Vec::new(),
            outpos: 0,
            hdr: [0u8; 8],
            hdr_read: 0,
            frames: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    /// Whether the session is still waiting for an inbound connection.
    pub fn is_accepting(&self) -> bool {
        self.state == SessionState::Accepting
    }

    // ========================================================================
    // Bound side: accept
    // ========================================================================

    /// Wait for an inbound connection on the owner's listener.
    pub fn start_accept(&mut self) {
        debug_assert_eq!(self.state, SessionState::Idle);
        self.state = SessionState::Accepting;
    }

    /// Abandon the accept. Legal only while accepting; the session owns
    /// nothing yet, so this quiesces synchronously.
    pub fn abort(&mut self) {
        debug_assert_eq!(self.state, SessionState::Accepting);
        self.state = SessionState::Idle;
    }

    /// The listener became readable: try to take one connection.
    ///
    /// On success the stream is installed into `own`, `Accepted` is
    /// raised, and the handshake begins. A fatal listener failure is
    /// reported by the listener itself.
    pub fn on_listener_ready(
        &mut self,
        ctx: &mut Ctx<'_>,
        listener: &mut StreamSock,
        own: &mut StreamSock,
    ) {
        if self.state != SessionState::Accepting {
            return;
        }
        match listener.accept_ready(ctx) {
            Ok(Some(stream)) => {
                if let Err(e) = own.adopt(ctx, stream) {
                    self.fail(ctx, &e);
                    return;
                }
                self.begin_handshake();
                ctx.raise(self.tag, Event::Session(SessionEvent::Accepted));
            }
            Ok(None) => {}
            Err(_) => {
                // The listener raised its own Error; recovery is the
                // endpoint's job.
            }
        }
    }

    // ========================================================================
    // Connected side: takeover
    // ========================================================================

    /// Drive an already-connected socket.
    pub fn start(&mut self, ctx: &mut Ctx<'_>, sock: &mut StreamSock) {
        debug_assert_eq!(self.state, SessionState::Idle);
        if let Err(e) = sock.activate(ctx) {
            self.state = SessionState::Handshake;
            self.fail(ctx, &e);
            return;
        }
        self.begin_handshake();
    }

    fn begin_handshake(&mut self) {
        self.outbuf = PROTOCOL_HEADER.to_vec();
        self.outpos = 0;
        self.hdr_read = 0;
        self.frames = 0;
        self.codec.reset();
        self.state = SessionState::Handshake;
    }

    // ========================================================================
    // I/O
    // ========================================================================

    /// Socket readiness for the connection this session drives.
    pub fn on_io(&mut self, ctx: &mut Ctx<'_>, sock: &mut StreamSock, readiness: Readiness) {
        if !matches!(self.state, SessionState::Handshake | SessionState::Active) {
            return;
        }
        if readiness.writable {
            self.flush(ctx, sock);
        }
        if !matches!(self.state, SessionState::Handshake | SessionState::Active) {
            return;
        }
        if readiness.readable {
            self.drain(ctx, sock);
        }
    }

    /// Write queued bytes until the socket would block.
    fn flush(&mut self, ctx: &mut Ctx<'_>, sock: &mut StreamSock) {
        while self.outpos < self.outbuf.len() {
            let Some(stream) = sock.stream_mut() else {
                return;
            };
            match stream.write(&self.outbuf[self.outpos..]) {
                Ok(0) => {
                    self.fail(ctx, &io::Error::new(io::ErrorKind::WriteZero, "peer closed"));
                    return;
                }
                Ok(n) => self.outpos += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail(ctx, &e);
                    return;
                }
            }
        }
        self.outbuf.clear();
        self.outpos = 0;
    }

    /// Read until the socket would block: finish the handshake, then
    /// validate frames.
    fn drain(&mut self, ctx: &mut Ctx<'_>, sock: &mut StreamSock) {
        loop {
            match self.state {
                SessionState::Handshake => {
                    let Some(stream) = sock.stream_mut() else {
                        return;
                    };
                    match stream.read(&mut self.hdr[self.hdr_read..]) {
                        Ok(0) => {
                            self.fail(
                                ctx,
                                &io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"),
                            );
                            return;
                        }
                        Ok(n) => {
                            self.hdr_read += n;
                            if self.hdr_read == self.hdr.len() {
                                if self.hdr == PROTOCOL_HEADER {
                                    log::debug!("session established");
                                    self.state = SessionState::Active;
                                } else {
                                    self.fail(
                                        ctx,
                                        &io::Error::new(
                                            io::ErrorKind::InvalidData,
                                            "bad protocol header",
                                        ),
                                    );
                                    return;
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            self.fail(ctx, &e);
                            return;
                        }
                    }
                }
                SessionState::Active => {
                    let Some(stream) = sock.stream_mut() else {
                        return;
                    };
                    match self.codec.decode(stream) {
                        Ok(Some(body)) => {
                            self.frames += 1;
                            log::trace!("frame {} ({} bytes)", self.frames, body.len());
                        }
                        Ok(None) => return,
                        Err(e) => {
                            self.fail(ctx, &e);
                            return;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn fail(&mut self, ctx: &mut Ctx<'_>, e: &io::Error) {
        if self.state == SessionState::Failed {
            return;
        }
        log::warn!("session failed: {}", e);
        self.state = SessionState::Failed;
        ctx.raise(self.tag, Event::Session(SessionEvent::Error));
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Stop the session. While accepting this quiesces synchronously;
    /// otherwise the terminal `Stopped` is raised.
    pub fn stop(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            SessionState::Idle | SessionState::Stopping => {}
            SessionState::Accepting => self.state = SessionState::Idle,
            SessionState::Handshake | SessionState::Active | SessionState::Failed => {
                self.state = SessionState::Stopping;
                ctx.raise(self.tag, Event::Session(SessionEvent::Stopped));
            }
        }
    }

    /// The owner observed the terminal `Stopped` event.
    pub fn confirm_stopped(&mut self) {
        debug_assert_eq!(self.state, SessionState::Stopping);
        self.state = SessionState::Idle;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_header_shape() {
        assert_eq!(PROTOCOL_HEADER.len(), 8);
        assert_eq!(PROTOCOL_HEADER[0], 0x00);
        assert_eq!(&PROTOCOL_HEADER[1..4], b"MSG");
        assert_eq!(PROTOCOL_HEADER[4], 0x01);
    }

    #[test]
    fn test_accept_lifecycle_is_synchronous() {
        let mut s = Session::new(Source::Session(7), 1024);
        assert!(s.is_idle());

        s.start_accept();
        assert!(!s.is_idle());

        // Abandoning an accept needs no events: nothing is owned yet.
        s.abort();
        assert!(s.is_idle());
    }
}
