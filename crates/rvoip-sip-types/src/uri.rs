//! SIP URI parsing and formatting.
//!
//! `sip:user@host:port;param=value;param2=value2`, optionally `sips:`.
//! Implements the round-trip law of spec §8:
//! `parse_sip_address ∘ format_sip_address = identity` on any syntactically
//! valid SIP URI — parameter order is preserved so formatting a parsed URI
//! reproduces the original parameter ordering exactly.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SipTypesError};

/// A parsed SIP or SIPS URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub secure: bool,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// `;name=value` or bare `;name` parameters, in source order.
    pub params: Vec<(String, Option<String>)>,
}

impl SipUri {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            secure: false,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), Some(value.into())));
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn transport(&self) -> Option<&str> {
        self.param("transport")
    }
}

/// Parses a SIP/SIPS URI. See module docs for the round-trip guarantee.
pub fn parse_sip_address(input: &str) -> Result<SipUri> {
    let input = input.trim();

    let (secure, rest) = if let Some(rest) = input.strip_prefix("sips:") {
        (true, rest)
    } else if let Some(rest) = input.strip_prefix("sip:") {
        (false, rest)
    } else {
        return Err(SipTypesError::MalformedUri(format!(
            "missing sip:/sips: scheme in '{input}'"
        )));
    };

    // Split off ;params (headers with `?` are not modeled, matching the
    // session state machine's needs, which never inspects them).
    let (userhost, params_str) = match rest.find(';') {
        Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
        None => (rest, None),
    };

    let (user, hostport) = match userhost.rfind('@') {
        Some(idx) => (Some(userhost[..idx].to_string()), &userhost[idx + 1..]),
        None => (None, userhost),
    };

    if hostport.is_empty() {
        return Err(SipTypesError::MalformedUri("empty host".to_string()));
    }

    let (host, port) = match hostport.rfind(':') {
        // Guard against IPv6 literals like `[::1]` which contain colons.
        Some(idx) if !hostport.starts_with('[') || hostport[..idx].ends_with(']') => {
            let port_str = &hostport[idx + 1..];
            let port = port_str.parse::<u16>().map_err(|_| {
                SipTypesError::MalformedUri(format!("invalid port '{port_str}'"))
            })?;
            (hostport[..idx].to_string(), Some(port))
        }
        _ => (hostport.to_string(), None),
    };

    let mut params = Vec::new();
    if let Some(params_str) = params_str {
        for chunk in params_str.split(';') {
            if chunk.is_empty() {
                continue;
            }
            match chunk.find('=') {
                Some(idx) => params.push((chunk[..idx].to_string(), Some(chunk[idx + 1..].to_string()))),
                None => params.push((chunk.to_string(), None)),
            }
        }
    }

    Ok(SipUri {
        secure,
        user,
        host,
        port,
        params,
    })
}

/// Formats a URI back to its wire representation.
pub fn format_sip_address(uri: &SipUri) -> String {
    uri.to_string()
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.secure { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{name}={v}")?,
                None => write!(f, ";{name}")?,
            }
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = SipTypesError;

    fn from_str(s: &str) -> Result<Self> {
        parse_sip_address(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_uri() {
        let uri = parse_sip_address("sip:alice@example.com").unwrap();
        assert_eq!(format_sip_address(&uri), "sip:alice@example.com");
    }

    #[test]
    fn round_trips_uri_with_port_and_params() {
        let original = "sip:bob@192.0.2.10:5070;transport=tcp;lr";
        let uri = parse_sip_address(original).unwrap();
        assert_eq!(uri.host, "192.0.2.10");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.transport(), Some("tcp"));
        assert_eq!(format_sip_address(&uri), original);
    }

    #[test]
    fn round_trips_sips_uri_without_user() {
        let original = "sips:secure.example.com:5061";
        let uri = parse_sip_address(original).unwrap();
        assert!(uri.secure);
        assert!(uri.user.is_none());
        assert_eq!(format_sip_address(&uri), original);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_sip_address("alice@example.com").is_err());
    }

    #[test]
    fn builder_matches_manual_construction() {
        let uri = SipUri::new("example.com").with_user("bob").with_port(5060).with_param("transport", "udp");
        assert_eq!(uri.to_string(), "sip:bob@example.com:5060;transport=udp");
    }
}
