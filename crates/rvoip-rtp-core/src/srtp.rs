//! SRTP (RFC 3711) protect/unprotect for RTP and RTCP.
//!
//! Implements AES in counter mode for confidentiality and HMAC-SHA1-80 for
//! authentication, with the per-packet IV construction of RFC 3711 §4.1.1
//! (salt XOR SSRC-shifted-by-64 XOR packet-index-shifted-by-16). It does
//! **not** implement the master-key → session-key KDF of RFC 3711 §4.3:
//! the key/salt pulled out of `a=crypto: inline:<base64>` is used directly
//! as the session key and session salt, and the same key doubles as the
//! HMAC key. That keeps this crate's footprint proportional to what
//! spec §4.4 actually asks of it (protect/unprotect, per-SSRC lazy install)
//! without porting a second, independent crypto primitive we have no way to
//! cross-check against an external peer. See DESIGN.md.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha1::Sha1;

use crate::error::{Result, RtpError};
use crate::packet::ssrc_of;

type HmacSha1 = Hmac<Sha1>;
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

pub const SALT_LEN: usize = 14;
const TAG_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpSuite {
    Aes128CmHmacSha1_80,
    Aes256CmHmacSha1_80,
}

impl SrtpSuite {
    pub fn key_len(self) -> usize {
        match self {
            SrtpSuite::Aes128CmHmacSha1_80 => 16,
            SrtpSuite::Aes256CmHmacSha1_80 => 32,
        }
    }

    pub fn tag_len(self) -> usize {
        TAG_LEN
    }
}

/// A session key/salt pair, as carried by one `a=crypto:` line.
#[derive(Clone)]
pub struct SrtpKeySalt {
    pub key: Vec<u8>,
    pub salt: [u8; SALT_LEN],
}

impl SrtpKeySalt {
    pub fn new(key: Vec<u8>, salt: [u8; SALT_LEN]) -> Self {
        Self { key, salt }
    }
}

fn aes_ctr_apply(key: &[u8], iv: [u8; 16], data: &mut [u8]) -> Result<()> {
    match key.len() {
        16 => {
            let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
            cipher.apply_keystream(data);
            Ok(())
        }
        32 => {
            let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
            cipher.apply_keystream(data);
            Ok(())
        }
        other => Err(RtpError::Io(format!("unsupported SRTP key length {other}"))),
    }
}

fn compute_iv(salt: &[u8; SALT_LEN], ssrc: u32, packet_index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..SALT_LEN].copy_from_slice(salt);
    // SSRC occupies bits 64-95: bytes[4..8] in this big-endian 16-byte layout.
    let ssrc_bytes = ssrc.to_be_bytes();
    for i in 0..4 {
        iv[4 + i] ^= ssrc_bytes[i];
    }
    // 48-bit packet index occupies bits 16-63: bytes[8..14].
    let idx_bytes = packet_index.to_be_bytes(); // 8 bytes, use low 6
    for i in 0..6 {
        iv[8 + i] ^= idx_bytes[2 + i];
    }
    iv
}

fn hmac_tag(key: &[u8], data: &[u8]) -> Result<[u8; TAG_LEN]> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| RtpError::Io(e.to_string()))?;
    mac.update(data);
    let full = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&full[..TAG_LEN]);
    Ok(tag)
}

/// Per-SSRC rollover-counter state, tracked independently for each
/// direction so re-INVITE media restarts don't require session teardown
/// (spec §4.4).
#[derive(Default, Clone, Copy)]
struct RocState {
    roc: u32,
    highest_seq: u16,
    initialized: bool,
}

impl RocState {
    /// Extended sequence number tracking per RFC 3711 Appendix A (simplified:
    /// treats any large backward jump as a rollover, any large forward jump
    /// as a `future` packet without bumping ROC — good enough for a jitter
    /// window that never spans more than one rollover).
    fn packet_index(&mut self, seq: u16) -> u64 {
        if !self.initialized {
            self.initialized = true;
            self.highest_seq = seq;
            return u64::from(self.roc) << 16 | u64::from(seq);
        }
        let diff = seq.wrapping_sub(self.highest_seq) as i16;
        if diff > 0 {
            self.highest_seq = seq;
        } else if i32::from(diff).unsigned_abs() > 0x8000 {
            // Large backward jump: sequence number wrapped around 2^16.
            self.roc = self.roc.wrapping_add(1);
            self.highest_seq = seq;
        }
        u64::from(self.roc) << 16 | u64::from(seq)
    }
}

struct RtcpIndex {
    counter: AtomicU64,
}

/// One direction's SRTP crypto context plus per-SSRC stream state. Policies
/// are installed lazily: the first packet seen for a new SSRC creates its
/// `RocState` on demand (spec §4.4).
pub struct SrtpSession {
    suite: SrtpSuite,
    outgoing: SrtpKeySalt,
    incoming: SrtpKeySalt,
    outgoing_roc: Mutex<HashMap<u32, RocState>>,
    incoming_roc: Mutex<HashMap<u32, RocState>>,
    outgoing_rtcp_index: RtcpIndex,
    decrypt_failures: AtomicU64,
}

impl SrtpSession {
    pub fn new(suite: SrtpSuite, outgoing: SrtpKeySalt, incoming: SrtpKeySalt) -> Self {
        Self {
            suite,
            outgoing,
            incoming,
            outgoing_roc: Mutex::new(HashMap::new()),
            incoming_roc: Mutex::new(HashMap::new()),
            outgoing_rtcp_index: RtcpIndex { counter: AtomicU64::new(0) },
            decrypt_failures: AtomicU64::new(0),
        }
    }

    pub fn suite(&self) -> SrtpSuite {
        self.suite
    }

    pub fn decrypt_failure_count(&self) -> u64 {
        self.decrypt_failures.load(Ordering::Relaxed)
    }

    /// Encrypts `packet`'s RTP payload in place and appends the auth tag.
    /// `packet` must already contain a full serialized [`crate::RtpPacket`].
    pub fn protect_rtp(&self, packet: &mut Vec<u8>) -> Result<()> {
        let ssrc = ssrc_of(packet).ok_or(RtpError::PacketTooShort)?;
        let seq = crate::packet::sequence_number_of(packet).ok_or(RtpError::PacketTooShort)?;
        let header_len = rtp_header_len(packet)?;

        let packet_index = {
            let mut map = self.outgoing_roc.lock();
            map.entry(ssrc).or_default().packet_index(seq)
        };

        let iv = compute_iv(&self.outgoing.salt, ssrc, packet_index);
        aes_ctr_apply(&self.outgoing.key, iv, &mut packet[header_len..])?;

        let tag = hmac_tag(&self.outgoing.key, packet)?;
        packet.extend_from_slice(&tag);
        Ok(())
    }

    /// Decrypts an SRTP packet into `out`, returning the plaintext length.
    /// On auth failure or any structural problem the packet is dropped and
    /// the decrypt-failure counter is incremented — it never propagates as
    /// a session-ending error (spec §4.1 "Failure semantics").
    pub fn unprotect_rtp(&self, packet: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        if packet.len() < TAG_LEN {
            self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
            return Err(RtpError::BufferTooShortForTag);
        }
        let (body, tag) = packet.split_at(packet.len() - TAG_LEN);
        let expected = hmac_tag(&self.incoming.key, body)?;
        if !constant_time_eq(&expected, tag) {
            self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
            return Err(RtpError::AuthFailed);
        }

        let ssrc = ssrc_of(body).ok_or(RtpError::PacketTooShort)?;
        let seq = crate::packet::sequence_number_of(body).ok_or(RtpError::PacketTooShort)?;
        let header_len = rtp_header_len(body)?;

        let packet_index = {
            let mut map = self.incoming_roc.lock();
            map.entry(ssrc).or_default().packet_index(seq)
        };

        out.clear();
        out.extend_from_slice(body);
        let iv = compute_iv(&self.incoming.salt, ssrc, packet_index);
        aes_ctr_apply(&self.incoming.key, iv, &mut out[header_len..])?;
        Ok(out.len())
    }

    /// Encrypts an RTCP packet, appending a 4-byte SRTCP index (E-bit set)
    /// and the auth tag, per RFC 3711 §3.4.
    pub fn protect_rtcp(&self, packet: &mut Vec<u8>) -> Result<()> {
        let ssrc = u32::from_be_bytes(packet.get(4..8).ok_or(RtpError::PacketTooShort)?.try_into().unwrap());
        let index = self.outgoing_rtcp_index.counter.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff;

        let iv = compute_iv(&self.outgoing.salt, ssrc, index);
        aes_ctr_apply(&self.outgoing.key, iv, &mut packet[8..])?;

        let srtcp_index = (index as u32) | 0x8000_0000; // E-bit = encrypted
        packet.extend_from_slice(&srtcp_index.to_be_bytes());

        let tag = hmac_tag(&self.outgoing.key, packet)?;
        packet.extend_from_slice(&tag);
        Ok(())
    }

    pub fn unprotect_rtcp(&self, packet: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        if packet.len() < TAG_LEN + 4 + 8 {
            self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
            return Err(RtpError::BufferTooShortForTag);
        }
        let (body, tag) = packet.split_at(packet.len() - TAG_LEN);
        let expected = hmac_tag(&self.incoming.key, body)?;
        if !constant_time_eq(&expected, tag) {
            self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
            return Err(RtpError::AuthFailed);
        }

        let (header_and_payload, index_bytes) = body.split_at(body.len() - 4);
        let raw_index = u32::from_be_bytes(index_bytes.try_into().unwrap());
        let index = u64::from(raw_index & 0x7fff_ffff);
        let ssrc = u32::from_be_bytes(header_and_payload[4..8].try_into().unwrap());

        out.clear();
        out.extend_from_slice(header_and_payload);
        let iv = compute_iv(&self.incoming.salt, ssrc, index);
        aes_ctr_apply(&self.incoming.key, iv, &mut out[8..])?;
        Ok(out.len())
    }
}

fn rtp_header_len(buf: &[u8]) -> Result<usize> {
    if buf.len() < 12 {
        return Err(RtpError::PacketTooShort);
    }
    let csrc_count = (buf[0] & 0x0f) as usize;
    Ok(12 + 4 * csrc_count)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Base64-decodes an `a=crypto: inline:` key+salt blob into key/salt parts.
pub fn decode_key_salt(suite: SrtpSuite, base64_blob: &str) -> Result<SrtpKeySalt> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(base64_blob)
        .map_err(|e| RtpError::Io(e.to_string()))?;
    let key_len = suite.key_len();
    if raw.len() != key_len + SALT_LEN {
        return Err(RtpError::Io(format!(
            "expected {} bytes of key+salt, got {}",
            key_len + SALT_LEN,
            raw.len()
        )));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&raw[key_len..]);
    Ok(SrtpKeySalt::new(raw[..key_len].to_vec(), salt))
}

/// Base64-encodes a key/salt pair for an `a=crypto: inline:` line.
pub fn encode_key_salt(key_salt: &SrtpKeySalt) -> String {
    use base64::Engine;
    let mut raw = key_salt.key.clone();
    raw.extend_from_slice(&key_salt.salt);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{RtpHeader, RtpPacket};
    use rand::RngCore;

    fn random_key_salt(len: usize) -> SrtpKeySalt {
        let mut key = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut key);
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        SrtpKeySalt::new(key, salt)
    }

    #[test]
    fn protect_then_unprotect_rtp_is_identity() {
        let key_salt = random_key_salt(16);
        let session = SrtpSession::new(SrtpSuite::Aes128CmHmacSha1_80, key_salt.clone(), key_salt);

        let header = RtpHeader::new(0, 42, 8000, 0x1234);
        let original = RtpPacket::new(header, vec![10, 20, 30, 40]).serialize();

        let mut protected = original.clone();
        session.protect_rtp(&mut protected).unwrap();
        assert_eq!(protected.len(), original.len() + SrtpSuite::Aes128CmHmacSha1_80.tag_len());

        let mut plaintext = Vec::new();
        let len = session.unprotect_rtp(&protected, &mut plaintext).unwrap();
        plaintext.truncate(len);
        assert_eq!(plaintext, original);
    }

    #[test]
    fn unprotect_with_wrong_key_fails_and_counts() {
        let sender_key = random_key_salt(32);
        let receiver_key = random_key_salt(32);
        let sender = SrtpSession::new(SrtpSuite::Aes256CmHmacSha1_80, sender_key.clone(), sender_key);
        let receiver = SrtpSession::new(SrtpSuite::Aes256CmHmacSha1_80, receiver_key.clone(), receiver_key);

        let header = RtpHeader::new(0, 1, 1, 1);
        let original = RtpPacket::new(header, vec![1, 2, 3]).serialize();
        let mut protected = original.clone();
        sender.protect_rtp(&mut protected).unwrap();

        let mut out = Vec::new();
        let result = receiver.unprotect_rtp(&protected, &mut out);
        assert!(result.is_err());
        assert_eq!(receiver.decrypt_failure_count(), 1);
    }

    #[test]
    fn protect_then_unprotect_rtcp_is_identity() {
        let key_salt = random_key_salt(16);
        let session = SrtpSession::new(SrtpSuite::Aes128CmHmacSha1_80, key_salt.clone(), key_salt);

        let rr = crate::rtcp::RtcpPacket::ReceiverReport(crate::rtcp::ReceiverReport { ssrc: 99, reports: vec![] });
        let original = rr.serialize();
        let mut protected = original.clone();
        session.protect_rtcp(&mut protected).unwrap();

        let mut out = Vec::new();
        let len = session.unprotect_rtcp(&protected, &mut out).unwrap();
        out.truncate(len);
        assert_eq!(out, original);
    }

    #[test]
    fn key_salt_round_trips_through_base64() {
        let key_salt = random_key_salt(16);
        let encoded = encode_key_salt(&key_salt);
        let decoded = decode_key_salt(SrtpSuite::Aes128CmHmacSha1_80, &encoded).unwrap();
        assert_eq!(decoded.key, key_salt.key);
        assert_eq!(decoded.salt, key_salt.salt);
    }
}
