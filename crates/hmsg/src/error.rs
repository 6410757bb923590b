// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for endpoint creation.
//!
//! Only configuration problems surface as errors: once `create` succeeds,
//! all runtime failures (bind, connect, DNS, peer resets) are recovered
//! internally and reported through statistics and the last-error cell.

use std::io;

use thiserror::Error;

/// Errors returned when creating an endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The endpoint address could not be parsed.
    ///
    /// Raised for a missing `:` port separator, a port outside
    /// `[1, 65535]`, or a host that is neither a valid literal nor a
    /// syntactically valid hostname.
    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// A local interface was named but could not be resolved.
    #[error("no such local device: {0}")]
    NoDevice(String),

    /// The reactor could not be started or reached.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience result alias for endpoint creation.
pub type Result<T> = std::result::Result<T, EndpointError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = EndpointError::InvalidAddress("tcp://nope".to_string());
        assert!(e.to_string().contains("invalid endpoint address"));

        let e = EndpointError::NoDevice("eth9".to_string());
        assert!(e.to_string().contains("no such local device"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let e: EndpointError = io_err.into();
        assert!(matches!(e, EndpointError::Io(_)));
    }
}
