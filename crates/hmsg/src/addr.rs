// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint address grammar.
//!
//! Two address forms are accepted:
//!
//! - Bound endpoints: `IFACE:PORT`
//! - Connected endpoints: `[LOCAL_IFACE;]HOST:PORT`
//!
//! The splitter takes the port from the substring after the *rightmost*
//! `:` and the local interface from the substring before the *first* `;`.
//! This rule is applied verbatim, which means an un-bracketed IPv6 literal
//! such as `fe80::1:5555` is misclassified (the last group becomes the
//! port). Callers must bracket IPv6 hosts: `[fe80::1]:5555`.
//!
//! `HOST` is either an IP literal (optionally bracketed) or a DNS hostname;
//! `IFACE` is `*` (wildcard) or an IP literal of a local interface.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::EndpointError;

/// Split an address at the rightmost `:`, returning `(head, port)`.
///
/// The head is the interface (bound form) or `[local;]host` (connected
/// form); the port substring is everything after the separator.
pub(crate) fn split_port(addr: &str) -> Result<(&str, &str), EndpointError> {
    match addr.rfind(':') {
        Some(pos) => Ok((&addr[..pos], &addr[pos + 1..])),
        None => Err(EndpointError::InvalidAddress(addr.to_string())),
    }
}

/// Split an address at the first `;`, returning `(local, rest)`.
pub(crate) fn split_local(addr: &str) -> (Option<&str>, &str) {
    match addr.find(';') {
        Some(pos) => (Some(&addr[..pos]), &addr[pos + 1..]),
        None => (None, addr),
    }
}

/// Parse a port substring. Valid ports are decimal integers in
/// `[1, 65535]` with no sign, whitespace, or other decoration.
pub(crate) fn parse_port(s: &str) -> Result<u16, EndpointError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EndpointError::InvalidAddress(format!("bad port: {:?}", s)));
    }
    match s.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(EndpointError::InvalidAddress(format!("bad port: {:?}", s))),
    }
}

/// Check hostname syntax: dot-separated labels of alphanumerics and `-`,
/// labels up to 63 bytes, no leading/trailing `-`, total length <= 255.
///
/// This is a syntactic check only; whether the name resolves is decided
/// later by the resolver.
pub(crate) fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 255 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Parse an IP literal, accepting `[...]` brackets around IPv6 addresses.
///
/// Returns `None` if the string is not a literal, or if it is an IPv6
/// literal while `ipv4only` is set.
pub(crate) fn parse_literal(host: &str, ipv4only: bool) -> Option<IpAddr> {
    let inner = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let ip: IpAddr = inner.parse().ok()?;
    if ipv4only && ip.is_ipv6() {
        return None;
    }
    Some(ip)
}

/// Resolve a local interface specification to a bindable address.
///
/// `*` resolves to the wildcard address of the selected family; IP
/// literals resolve to themselves. Anything else is `NoDevice` — named
/// OS interfaces are not enumerated.
pub(crate) fn resolve_interface(iface: &str, ipv4only: bool) -> Result<IpAddr, EndpointError> {
    if iface == "*" {
        return Ok(if ipv4only {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        });
    }
    parse_literal(iface, ipv4only).ok_or_else(|| EndpointError::NoDevice(iface.to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_port_rightmost_colon() {
        assert_eq!(split_port("*:5555").unwrap(), ("*", "5555"));
        assert_eq!(split_port("host.example.com:80").unwrap(), ("host.example.com", "80"));
        // Rightmost colon wins, so bracketed IPv6 splits correctly
        assert_eq!(split_port("[fe80::1]:5555").unwrap(), ("[fe80::1]", "5555"));
        // ...and an un-bracketed IPv6 literal is misclassified by design
        assert_eq!(split_port("fe80::1").unwrap(), ("fe80:", "1"));
    }

    #[test]
    fn test_split_port_missing() {
        assert!(split_port("nocolon").is_err());
        assert!(split_port("").is_err());
    }

    #[test]
    fn test_split_local_first_semicolon() {
        assert_eq!(split_local("127.0.0.1;host:80"), (Some("127.0.0.1"), "host:80"));
        assert_eq!(split_local("host:80"), (None, "host:80"));
        // First semicolon wins
        assert_eq!(split_local("a;b;c"), (Some("a"), "b;c"));
    }

    #[test]
    fn test_parse_port_range() {
        assert_eq!(parse_port("1").unwrap(), 1);
        assert_eq!(parse_port("5555").unwrap(), 5555);
        assert_eq!(parse_port("65535").unwrap(), 65535);

        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("").is_err());
        assert!(parse_port("-1").is_err());
        assert!(parse_port("80a").is_err());
        assert!(parse_port(" 80").is_err());
    }

    #[test]
    fn test_hostname_syntax() {
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("example.com"));
        assert!(is_valid_hostname("a-b.c-d.example"));
        assert!(is_valid_hostname("xn--nxasmq6b.example"));

        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("exa mple.com"));
        assert!(!is_valid_hostname("-leading.example"));
        assert!(!is_valid_hostname("trailing-.example"));
        assert!(!is_valid_hostname("double..dot"));
        assert!(!is_valid_hostname("under_score.example"));
        assert!(!is_valid_hostname(&"a".repeat(256)));
        assert!(!is_valid_hostname(&format!("{}.example", "a".repeat(64))));
    }

    #[test]
    fn test_literal_parsing() {
        assert_eq!(
            parse_literal("127.0.0.1", true),
            Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
        );
        assert_eq!(parse_literal("::1", false), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(parse_literal("[::1]", false), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        // IPv6 literals are rejected under ipv4only
        assert_eq!(parse_literal("::1", true), None);
        assert_eq!(parse_literal("[fe80::1]", true), None);

        assert_eq!(parse_literal("example.com", false), None);
        assert_eq!(parse_literal("[not-an-ip]", false), None);
    }

    #[test]
    fn test_resolve_interface() {
        assert_eq!(
            resolve_interface("*", true).unwrap(),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
        assert_eq!(
            resolve_interface("*", false).unwrap(),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        );
        assert_eq!(
            resolve_interface("127.0.0.1", true).unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );

        assert!(matches!(
            resolve_interface("eth0", true),
            Err(EndpointError::NoDevice(_))
        ));
        assert!(matches!(
            resolve_interface("", true),
            Err(EndpointError::NoDevice(_))
        ));
        // An IPv6 local interface is unusable when ipv4only is set
        assert!(matches!(
            resolve_interface("::1", true),
            Err(EndpointError::NoDevice(_))
        ));
    }
}
