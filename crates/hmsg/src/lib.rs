// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HMSG — connection-oriented transport endpoints
//!
//! The TCP endpoint layer of the HMSG messaging library: a *bound*
//! endpoint that listens, accepts, and manages child sessions, and a
//! *connected* endpoint that resolves, dials, and maintains a single
//! session with exponential reconnect backoff. Both are event-driven
//! state machines running on a shared single-threaded reactor.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hmsg::{Options, Reactor};
//! use std::time::Duration;
//!
//! fn main() -> hmsg::Result<()> {
//!     let reactor = Reactor::spawn()?;
//!
//!     let server = reactor.handle().bind("*:5555", Options::default())?;
//!     let client = reactor.handle().connect("127.0.0.1:5555", Options::default())?;
//!
//!     std::thread::sleep(Duration::from_millis(100));
//!     assert_eq!(client.stats().established_connections, 1);
//!
//!     client.stop();
//!     server.stop();
//!     client.wait_stopped(Duration::from_secs(1));
//!     server.wait_stopped(Duration::from_secs(1));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          User threads                              |
//! |        EndpointHandle: stop / wait_stopped / stats / errors        |
//! +--------------------------------------------------------------------+
//! |                        Endpoint machines                           |
//! |   BoundEndpoint (listen/accept/children) | ConnectedEndpoint       |
//! |   (resolve/connect/session/backoff)                                |
//! +--------------------------------------------------------------------+
//! |                          Sub-machines                              |
//! |   StreamSock | Session | Resolver | Backoff                        |
//! +--------------------------------------------------------------------+
//! |                            Reactor                                 |
//! |   mio::Poll | timers | FIFO event queue | worker thread            |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Failure model
//!
//! Endpoint creation fails only for configuration problems (bad address,
//! unresolvable local interface). Everything after that — bind conflicts,
//! refused connections, DNS failures, peer resets — is recovered in place
//! through backoff retry and reported via [`EndpointHandle::stats`] and
//! [`EndpointHandle::last_error`].
//!
//! ## Shutdown
//!
//! [`EndpointHandle::stop`] initiates an asynchronous teardown that
//! sequences every sub-machine to quiescence; await it with
//! [`EndpointHandle::wait_stopped`], then drop the handle.

mod addr;
mod backoff;
mod endpoint;
mod error;
mod frame;
mod options;
mod reactor;
mod resolver;
mod session;
mod sock;
mod stats;

pub use endpoint::EndpointHandle;
pub use error::{EndpointError, Result};
pub use frame::{FrameCodec, FRAME_HEADER_SIZE};
pub use options::Options;
pub use reactor::{Reactor, ReactorHandle};
pub use session::PROTOCOL_HEADER;
pub use stats::{StatKind, StatsSnapshot};
