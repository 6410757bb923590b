// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport endpoints.
//!
//! - [`bound`] — the listening side: bind, listen, accept loop with
//!   re-bind retry.
//! - [`connected`] — the dialing side: resolve, connect, maintain one
//!   session with exponential reconnect backoff.
//! - [`base`] — state shared between a machine and its user handle.
//!
//! Endpoints are created through [`ReactorHandle::bind`] and
//! [`ReactorHandle::connect`].

pub(crate) mod base;
pub(crate) mod bound;
pub(crate) mod connected;

pub use self::base::EndpointHandle;

use crate::error::Result;
use crate::options::Options;
use crate::reactor::ReactorHandle;

impl ReactorHandle {
    /// Create a bound (listening) endpoint on `address` (`IFACE:PORT`).
    ///
    /// The address is validated synchronously; the endpoint then starts
    /// on the reactor and recovers all runtime failures internally.
    pub fn bind(&self, address: &str, options: Options) -> Result<EndpointHandle> {
        bound::BoundEndpoint::create(self, address, options)
    }

    /// Create a connected (dialing) endpoint to `address`
    /// (`[LOCAL_IFACE;]HOST:PORT`).
    ///
    /// The address is validated synchronously; resolution and connection
    /// happen on the reactor with backoff retry.
    pub fn connect(&self, address: &str, options: Options) -> Result<EndpointHandle> {
        connected::ConnectedEndpoint::create(self, address, options)
    }
}
