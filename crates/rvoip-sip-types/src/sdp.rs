//! SDP offer/answer types, parsing and formatting (spec §6).
//!
//! Covers exactly the subset of RFC 4566/5245/4568/2833 the session state
//! machine needs: origin versioning, one `m=audio` line with RTP/AVP or
//! RTP/SAVP, ICE `ufrag`/`pwd`/`candidate` attributes, SDES `crypto`
//! attributes, direction markers, and `telephone-event` payloads. Unknown
//! attribute lines are preserved verbatim but not interpreted.

use std::fmt;

use crate::error::{Result, SipTypesError};

/// Transport protocol advertised on the `m=` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpProfile {
    Avp,
    Savp,
}

impl fmt::Display for RtpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtpProfile::Avp => write!(f, "RTP/AVP"),
            RtpProfile::Savp => write!(f, "RTP/SAVP"),
        }
    }
}

/// `a=sendrecv|sendonly|recvonly|inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn can_send(self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    pub fn can_receive(self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }

    /// Direction after flipping the send half off (used by `pause`).
    pub fn with_send_disabled(self) -> Self {
        match self {
            MediaDirection::SendRecv | MediaDirection::SendOnly => {
                if self.can_receive() {
                    MediaDirection::RecvOnly
                } else {
                    MediaDirection::Inactive
                }
            }
            other => other,
        }
    }

    pub fn with_send_enabled(self) -> Self {
        match self {
            MediaDirection::RecvOnly | MediaDirection::Inactive if true => {
                if matches!(self, MediaDirection::RecvOnly) {
                    MediaDirection::SendRecv
                } else {
                    MediaDirection::SendOnly
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MediaDirection {
    type Err = SipTypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sendrecv" => Ok(MediaDirection::SendRecv),
            "sendonly" => Ok(MediaDirection::SendOnly),
            "recvonly" => Ok(MediaDirection::RecvOnly),
            "inactive" => Ok(MediaDirection::Inactive),
            other => Err(SipTypesError::UnsupportedAttribute(other.to_string())),
        }
    }
}

/// `o=<username> <sess-id> <sess-version> IN <addrtype> <address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub sess_id: u64,
    /// Monotonic per spec §3: strictly increasing for locally-emitted SDP,
    /// non-decreasing for the peer's.
    pub sess_version: u64,
    pub addr_type: AddrType,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    Ip4,
    Ip6,
}

impl fmt::Display for AddrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if matches!(self, AddrType::Ip4) { "IP4" } else { "IP6" })
    }
}

/// `c=IN <addrtype> <address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub addr_type: AddrType,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

/// One `a=candidate:` line (RFC 5245 §15.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component: u8,
    pub transport: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub typ: CandidateType,
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} typ {}",
            self.foundation, self.component, self.transport, self.priority, self.address, self.port, self.typ
        )?;
        if let (Some(addr), Some(port)) = (&self.related_address, self.related_port) {
            write!(f, " raddr {addr} rport {port}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoSuite {
    Aes128CmHmacSha1_80,
    Aes256CmHmacSha1_80,
}

impl CryptoSuite {
    pub fn key_len(self) -> usize {
        match self {
            CryptoSuite::Aes128CmHmacSha1_80 => 16,
            CryptoSuite::Aes256CmHmacSha1_80 => 32,
        }
    }

    pub fn salt_len(self) -> usize {
        14
    }

    /// HMAC-SHA1-80 tag length, shared by both suites here.
    pub fn tag_len(self) -> usize {
        10
    }

    pub fn name(self) -> &'static str {
        match self {
            CryptoSuite::Aes128CmHmacSha1_80 => "AES_CM_128_HMAC_SHA1_80",
            CryptoSuite::Aes256CmHmacSha1_80 => "AES_CM_256_HMAC_SHA1_80",
        }
    }
}

impl std::str::FromStr for CryptoSuite {
    type Err = SipTypesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AES_CM_128_HMAC_SHA1_80" => Ok(CryptoSuite::Aes128CmHmacSha1_80),
            "AES_CM_256_HMAC_SHA1_80" => Ok(CryptoSuite::Aes256CmHmacSha1_80),
            other => Err(SipTypesError::UnsupportedAttribute(other.to_string())),
        }
    }
}

/// `a=crypto:<tag> <suite> inline:<base64 key||salt>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoAttribute {
    pub tag: u32,
    pub suite: CryptoSuite,
    pub key_salt_base64: String,
}

impl fmt::Display for CryptoAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} inline:{}", self.tag, self.suite.name(), self.key_salt_base64)
    }
}

/// One `m=` section plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub profile: RtpProfile,
    /// Payload type numbers in `m=` line order.
    pub payload_types: Vec<u8>,
    pub connection: Option<ConnectionInfo>,
    pub direction: MediaDirection,
    pub rtcp_port: Option<u16>,
    pub rtcp_mux: bool,
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
    pub candidates: Vec<Candidate>,
    pub crypto: Vec<CryptoAttribute>,
    /// `a=rtpmap:<pt> <name>/<rate>[/<channels>]`.
    pub rtpmap: Vec<(u8, String)>,
    pub fmtp: Vec<(u8, String)>,
}

impl MediaDescription {
    pub fn new_audio(port: u16, profile: RtpProfile) -> Self {
        Self {
            media_type: "audio".to_string(),
            port,
            profile,
            payload_types: Vec::new(),
            connection: None,
            direction: MediaDirection::SendRecv,
            rtcp_port: None,
            rtcp_mux: false,
            ice_ufrag: None,
            ice_pwd: None,
            candidates: Vec::new(),
            crypto: Vec::new(),
            rtpmap: Vec::new(),
            fmtp: Vec::new(),
        }
    }

    /// Payload type advertised for `telephone-event`, if any (RFC 2833).
    pub fn telephone_event_pt(&self) -> Option<u8> {
        self.rtpmap
            .iter()
            .find(|(_, name)| name.starts_with("telephone-event/"))
            .map(|(pt, _)| *pt)
    }

    pub fn is_rejected(&self) -> bool {
        self.port == 0
    }
}

/// A full offer or answer body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin: Origin,
    pub session_name: String,
    pub connection: Option<ConnectionInfo>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            session_name: "-".to_string(),
            connection: None,
            media: Vec::new(),
        }
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "v=0")?;
        writeln!(
            f,
            "o={} {} {} IN {} {}",
            self.origin.username, self.origin.sess_id, self.origin.sess_version, self.origin.addr_type, self.origin.address
        )?;
        writeln!(f, "s={}", self.session_name)?;
        if let Some(c) = &self.connection {
            writeln!(f, "c=IN {} {}", c.addr_type, c.address)?;
        }
        writeln!(f, "t=0 0")?;

        for m in &self.media {
            let pts = m
                .payload_types
                .iter()
                .map(|pt| pt.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "m={} {} {} {}", m.media_type, m.port, m.profile, pts)?;
            if let Some(c) = &m.connection {
                writeln!(f, "c=IN {} {}", c.addr_type, c.address)?;
            }
            if !m.is_rejected() {
                if let Some(rtcp_port) = m.rtcp_port {
                    if !m.rtcp_mux {
                        writeln!(f, "a=rtcp:{rtcp_port}")?;
                    }
                }
                if m.rtcp_mux {
                    writeln!(f, "a=rtcp-mux")?;
                }
                if let Some(ufrag) = &m.ice_ufrag {
                    writeln!(f, "a=ice-ufrag:{ufrag}")?;
                }
                if let Some(pwd) = &m.ice_pwd {
                    writeln!(f, "a=ice-pwd:{pwd}")?;
                }
                for cand in &m.candidates {
                    writeln!(f, "a=candidate:{cand}")?;
                }
                for crypto in &m.crypto {
                    writeln!(f, "a=crypto:{crypto}")?;
                }
                for (pt, name) in &m.rtpmap {
                    writeln!(f, "a=rtpmap:{pt} {name}")?;
                }
                for (pt, params) in &m.fmtp {
                    writeln!(f, "a=fmtp:{pt} {params}")?;
                }
                writeln!(f, "a={}", m.direction)?;
            }
        }
        Ok(())
    }
}

/// Parses an SDP body into a [`SessionDescription`].
pub fn parse_sdp(body: &str) -> Result<SessionDescription> {
    let mut origin: Option<Origin> = None;
    let mut session_name = "-".to_string();
    let mut session_connection: Option<ConnectionInfo> = None;
    let mut media: Vec<MediaDescription> = Vec::new();

    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }
        let (kind, value) = (line.as_bytes()[0], &line[2..]);

        match kind {
            b'o' => origin = Some(parse_origin(value)?),
            b's' => session_name = value.to_string(),
            b'c' => {
                let conn = parse_connection(value)?;
                if let Some(m) = media.last_mut() {
                    m.connection = Some(conn);
                } else {
                    session_connection = Some(conn);
                }
            }
            b'm' => media.push(parse_media_line(value)?),
            b'a' => {
                if let Some(m) = media.last_mut() {
                    parse_media_attribute(value, m)?;
                }
            }
            _ => {}
        }
    }

    let origin = origin.ok_or(SipTypesError::MissingField("o="))?;
    if media.is_empty() {
        return Err(SipTypesError::MissingField("m="));
    }

    Ok(SessionDescription {
        origin,
        session_name,
        connection: session_connection,
        media,
    })
}

fn parse_origin(value: &str) -> Result<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(SipTypesError::MalformedSdp(format!("bad o= line: '{value}'")));
    }
    let sess_id = parts[1]
        .parse()
        .map_err(|_| SipTypesError::MalformedSdp("bad sess-id".to_string()))?;
    let sess_version = parts[2]
        .parse()
        .map_err(|_| SipTypesError::MalformedSdp("bad sess-version".to_string()))?;
    let addr_type = parse_addr_type(parts[4])?;
    Ok(Origin {
        username: parts[0].to_string(),
        sess_id,
        sess_version,
        addr_type,
        address: parts[5].to_string(),
    })
}

fn parse_addr_type(s: &str) -> Result<AddrType> {
    match s {
        "IP4" => Ok(AddrType::Ip4),
        "IP6" => Ok(AddrType::Ip6),
        other => Err(SipTypesError::MalformedSdp(format!("bad addrtype '{other}'"))),
    }
}

fn parse_connection(value: &str) -> Result<ConnectionInfo> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "IN" {
        return Err(SipTypesError::MalformedSdp(format!("bad c= line: '{value}'")));
    }
    Ok(ConnectionInfo {
        addr_type: parse_addr_type(parts[1])?,
        address: parts[2].to_string(),
    })
}

fn parse_media_line(value: &str) -> Result<MediaDescription> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(SipTypesError::MalformedSdp(format!("bad m= line: '{value}'")));
    }
    let media_type = parts[0].to_string();
    let port = parts[1]
        .parse()
        .map_err(|_| SipTypesError::MalformedSdp("bad port".to_string()))?;
    let profile = match parts[2] {
        "RTP/AVP" => RtpProfile::Avp,
        "RTP/SAVP" => RtpProfile::Savp,
        other => return Err(SipTypesError::UnsupportedAttribute(other.to_string())),
    };
    let payload_types = parts[3..]
        .iter()
        .filter_map(|p| p.parse::<u8>().ok())
        .collect();

    let mut m = MediaDescription::new_audio(port, profile);
    m.media_type = media_type;
    m.payload_types = payload_types;
    Ok(m)
}

fn parse_media_attribute(value: &str, m: &mut MediaDescription) -> Result<()> {
    if let Some(rest) = value.strip_prefix("rtcp:") {
        m.rtcp_port = rest.trim().parse().ok();
    } else if value == "rtcp-mux" {
        m.rtcp_mux = true;
    } else if let Some(rest) = value.strip_prefix("ice-ufrag:") {
        m.ice_ufrag = Some(rest.to_string());
    } else if let Some(rest) = value.strip_prefix("ice-pwd:") {
        m.ice_pwd = Some(rest.to_string());
    } else if let Some(rest) = value.strip_prefix("candidate:") {
        m.candidates.push(parse_candidate(rest)?);
    } else if let Some(rest) = value.strip_prefix("crypto:") {
        m.crypto.push(parse_crypto(rest)?);
    } else if let Some(rest) = value.strip_prefix("rtpmap:") {
        if let Some((pt, name)) = rest.split_once(' ') {
            if let Ok(pt) = pt.parse() {
                m.rtpmap.push((pt, name.to_string()));
            }
        }
    } else if let Some(rest) = value.strip_prefix("fmtp:") {
        if let Some((pt, params)) = rest.split_once(' ') {
            if let Ok(pt) = pt.parse() {
                m.fmtp.push((pt, params.to_string()));
            }
        }
    } else if let Ok(dir) = value.parse::<MediaDirection>() {
        m.direction = dir;
    }
    Ok(())
}

fn parse_candidate(value: &str) -> Result<Candidate> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 7 || parts[6] != "typ" {
        return Err(SipTypesError::MalformedSdp(format!("bad candidate: '{value}'")));
    }
    let typ = match parts.get(7).copied() {
        Some("host") => CandidateType::Host,
        Some("srflx") => CandidateType::ServerReflexive,
        Some("prflx") => CandidateType::PeerReflexive,
        Some("relay") => CandidateType::Relay,
        other => {
            return Err(SipTypesError::UnsupportedAttribute(
                other.unwrap_or_default().to_string(),
            ))
        }
    };
    let mut related_address = None;
    let mut related_port = None;
    let mut i = 8;
    while i + 1 < parts.len() {
        match parts[i] {
            "raddr" => related_address = Some(parts[i + 1].to_string()),
            "rport" => related_port = parts[i + 1].parse().ok(),
            _ => {}
        }
        i += 2;
    }

    Ok(Candidate {
        foundation: parts[0].to_string(),
        component: parts[1]
            .parse()
            .map_err(|_| SipTypesError::MalformedSdp("bad component id".to_string()))?,
        transport: parts[2].to_string(),
        priority: parts[3]
            .parse()
            .map_err(|_| SipTypesError::MalformedSdp("bad priority".to_string()))?,
        address: parts[4].to_string(),
        port: parts[5]
            .parse()
            .map_err(|_| SipTypesError::MalformedSdp("bad candidate port".to_string()))?,
        typ,
        related_address,
        related_port,
    })
}

fn parse_crypto(value: &str) -> Result<CryptoAttribute> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(SipTypesError::MalformedSdp(format!("bad crypto: '{value}'")));
    }
    let tag = parts[0]
        .parse()
        .map_err(|_| SipTypesError::MalformedSdp("bad crypto tag".to_string()))?;
    let suite: CryptoSuite = parts[1].parse()?;
    let key_salt_base64 = parts[2]
        .strip_prefix("inline:")
        .ok_or_else(|| SipTypesError::MalformedSdp("crypto key missing inline:".to_string()))?
        .to_string();
    Ok(CryptoAttribute {
        tag,
        suite,
        key_salt_base64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_origin() -> Origin {
        Origin {
            username: "-".to_string(),
            sess_id: 1234,
            sess_version: 1,
            addr_type: AddrType::Ip4,
            address: "192.0.2.1".to_string(),
        }
    }

    #[test]
    fn formats_and_reparses_audio_only_offer() {
        let mut sdp = SessionDescription::new(sample_origin());
        sdp.connection = Some(ConnectionInfo {
            addr_type: AddrType::Ip4,
            address: "192.0.2.1".to_string(),
        });
        let mut m = MediaDescription::new_audio(5004, RtpProfile::Avp);
        m.payload_types = vec![0, 101];
        m.rtpmap.push((0, "PCMU/8000".to_string()));
        m.rtpmap.push((101, "telephone-event/8000".to_string()));
        sdp.media.push(m);

        let text = sdp.to_string();
        assert!(text.contains("m=audio 5004 RTP/AVP 0 101"));
        let reparsed = parse_sdp(&text).unwrap();
        assert_eq!(reparsed.origin.sess_id, 1234);
        assert_eq!(reparsed.media[0].telephone_event_pt(), Some(101));
    }

    #[test]
    fn parses_ice_and_crypto_attributes() {
        let body = "v=0\r\no=- 10 1 IN IP4 198.51.100.2\r\ns=-\r\nt=0 0\r\nm=audio 6000 RTP/SAVP 0\r\nc=IN IP4 198.51.100.2\r\na=rtcp-mux\r\na=ice-ufrag:f00b\r\na=ice-pwd:secretsecretsecret\r\na=candidate:1 1 UDP 2130706431 198.51.100.2 6000 typ host\r\na=crypto:1 AES_CM_128_HMAC_SHA1_80 inline:d2h5YXJleW91cmVhZGluZ3RoaXM=\r\na=sendrecv\r\n";
        let sdp = parse_sdp(body).unwrap();
        let m = &sdp.media[0];
        assert!(m.rtcp_mux);
        assert_eq!(m.ice_ufrag.as_deref(), Some("f00b"));
        assert_eq!(m.candidates.len(), 1);
        assert_eq!(m.candidates[0].typ, CandidateType::Host);
        assert_eq!(m.crypto[0].suite, CryptoSuite::Aes128CmHmacSha1_80);
        assert_eq!(m.direction, MediaDirection::SendRecv);
    }

    #[test]
    fn rejects_media_line_has_zero_port() {
        let mut m = MediaDescription::new_audio(0, RtpProfile::Avp);
        m.payload_types = vec![0];
        assert!(m.is_rejected());
    }
}
