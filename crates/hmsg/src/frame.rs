// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for sessions.
//!
//! TCP is a stream protocol without message boundaries; each message on an
//! established session is delimited by a 4-byte big-endian length prefix:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | Message body      |
//! +----------------+-------------------+
//! ```
//!
//! The decoder is incremental and designed for non-blocking sockets: call
//! [`FrameCodec::decode`] whenever the socket is readable, until it
//! returns `Ok(None)` (would block).

use std::io::{self, Read};

/// Frame header size (4 bytes for the length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Incremental length-prefix frame decoder.
#[derive(Debug)]
pub struct FrameCodec {
    state: ReadState,
    buffer: Vec<u8>,
    max_size: usize,
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// Reading the 4-byte length header.
    Header { bytes_read: usize },

    /// Reading the message body.
    Body { expected: usize, bytes_read: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header { bytes_read: 0 }
    }
}

impl FrameCodec {
    /// Create a codec with the given maximum frame size.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: ReadState::default(),
            buffer: vec![0u8; FRAME_HEADER_SIZE],
            max_size,
        }
    }

    /// Encode a message into a framed buffer: `[length: u32 BE][body]`.
    pub fn encode(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    /// Try to decode one complete message from the reader.
    ///
    /// Returns:
    /// - `Ok(Some(body))` — a complete message was decoded
    /// - `Ok(None)` — the reader would block; call again on readiness
    /// - `Err(e)` — I/O error, EOF, or an oversized frame
    pub fn decode<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                ReadState::Header { bytes_read } => {
                    match reader.read(&mut self.buffer[bytes_read..FRAME_HEADER_SIZE]) {
                        Ok(0) => {
                            let msg = if bytes_read == 0 {
                                "connection closed"
                            } else {
                                "incomplete frame header"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, msg));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::Header { bytes_read: total };
                                continue;
                            }

                            let len = u32::from_be_bytes([
                                self.buffer[0],
                                self.buffer[1],
                                self.buffer[2],
                                self.buffer[3],
                            ]) as usize;

                            if len > self.max_size {
                                self.state = ReadState::default();
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!("frame too large: {} bytes (max {})", len, self.max_size),
                                ));
                            }

                            if len == 0 {
                                self.state = ReadState::default();
                                return Ok(Some(Vec::new()));
                            }

                            self.buffer.resize(len, 0);
                            self.state = ReadState::Body {
                                expected: len,
                                bytes_read: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }

                ReadState::Body {
                    expected,
                    bytes_read,
                } => {
                    match reader.read(&mut self.buffer[bytes_read..expected]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "incomplete frame body",
                            ));
                        }
                        Ok(n) => {
                            let total = bytes_read + n;
                            if total < expected {
                                self.state = ReadState::Body {
                                    expected,
                                    bytes_read: total,
                                };
                                continue;
                            }

                            let body = self.buffer[..expected].to_vec();
                            self.buffer.resize(FRAME_HEADER_SIZE, 0);
                            self.state = ReadState::default();
                            return Ok(Some(body));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Reset the decoder (e.g. when a connection is replaced).
    pub fn reset(&mut self) {
        self.state = ReadState::default();
        self.buffer.resize(FRAME_HEADER_SIZE, 0);
    }

    /// Whether the decoder is mid-frame.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::Header { bytes_read } => bytes_read > 0,
            ReadState::Body { .. } => true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode() {
        let frame = FrameCodec::encode(b"hello");
        assert_eq!(frame.len(), 4 + 5);
        assert_eq!(&frame[..4], &5u32.to_be_bytes());
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_decode_simple() {
        let mut codec = FrameCodec::new(1024);
        let mut cursor = Cursor::new(FrameCodec::encode(b"hello, world!"));

        let body = codec.decode(&mut cursor).unwrap();
        assert_eq!(body, Some(b"hello, world!".to_vec()));
    }

    #[test]
    fn test_decode_empty_message() {
        let mut codec = FrameCodec::new(1024);
        let mut cursor = Cursor::new(FrameCodec::encode(b""));
        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_decode_back_to_back() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = FrameCodec::encode(b"first");
        buf.extend_from_slice(&FrameCodec::encode(b"second"));
        let mut cursor = Cursor::new(buf);

        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(b"first".to_vec()));
        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_decode_too_large() {
        let mut codec = FrameCodec::new(8);
        let mut cursor = Cursor::new(FrameCodec::encode(b"way past the configured limit"));

        let err = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_eof_is_error() {
        let mut codec = FrameCodec::new(1024);

        // EOF at a frame boundary
        let mut cursor = Cursor::new(Vec::new());
        let err = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        // EOF mid-body
        let frame = FrameCodec::encode(b"hello");
        let mut cursor = Cursor::new(frame[..6].to_vec());
        let err = codec.decode(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_partial_then_reset() {
        struct WouldBlockAfter(Vec<u8>, usize);
        impl Read for WouldBlockAfter {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.1 == 0 || self.0.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
                }
                let n = buf.len().min(self.0.len()).min(self.1);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0.drain(..n);
                self.1 -= n;
                Ok(n)
            }
        }

        let mut codec = FrameCodec::new(1024);
        let frame = FrameCodec::encode(b"hello");

        // Only two header bytes available
        let mut partial = WouldBlockAfter(frame.clone(), 2);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        assert!(codec.is_partial());

        codec.reset();
        assert!(!codec.is_partial());

        // A fresh full frame decodes cleanly after reset
        let mut cursor = Cursor::new(frame);
        assert_eq!(codec.decode(&mut cursor).unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_max_u32_length_rejected() {
        let mut codec = FrameCodec::new(1024);
        let mut cursor = Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
        assert!(codec.decode(&mut cursor).is_err());
    }
}
