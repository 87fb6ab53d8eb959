//! RTP packet framing per RFC 3550 §5.1.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RtpError};

const FIXED_HEADER_LEN: usize = 12;

/// A parsed RTP header (no extension header support — none of the spec's
/// scenarios need one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: 2,
            padding: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    fn header_len(&self) -> usize {
        FIXED_HEADER_LEN + 4 * self.csrc.len()
    }
}

/// A full RTP packet: header plus raw payload bytes (already encoded by the
/// codec, and already SRTP-protected if applicable — see `rvoip-rtp-core::srtp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(RtpError::PacketTooShort);
        }
        let version = buf[0] >> 6;
        if version != 2 {
            return Err(RtpError::UnsupportedVersion(version));
        }
        let padding = (buf[0] & 0x20) != 0;
        let extension = (buf[0] & 0x10) != 0;
        let csrc_count = (buf[0] & 0x0f) as usize;
        let marker = (buf[1] & 0x80) != 0;
        let payload_type = buf[1] & 0x7f;
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = FIXED_HEADER_LEN;
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            if buf.len() < offset + 4 {
                return Err(RtpError::PacketTooShort);
            }
            csrc.push(u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]]));
            offset += 4;
        }

        // No extension-header support: skip past it by its declared length
        // if present, so a peer that sends one doesn't corrupt our payload.
        if extension {
            if buf.len() < offset + 4 {
                return Err(RtpError::PacketTooShort);
            }
            let ext_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + ext_words * 4;
            if buf.len() < offset {
                return Err(RtpError::PacketTooShort);
            }
        }

        let mut payload_end = buf.len();
        if padding {
            if let Some(&pad_len) = buf.last() {
                payload_end = payload_end.saturating_sub(pad_len as usize);
            }
        }
        let payload = buf.get(offset..payload_end).unwrap_or(&[]).to_vec();

        Ok(RtpPacket {
            header: RtpHeader {
                version,
                padding,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
            },
            payload,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.header.header_len() + self.payload.len());
        let first_byte = (self.header.version << 6)
            | ((self.header.padding as u8) << 5)
            | (self.header.csrc.len() as u8 & 0x0f);
        buf.put_u8(first_byte);
        buf.put_u8(((self.header.marker as u8) << 7) | (self.header.payload_type & 0x7f));
        buf.put_u16(self.header.sequence_number);
        buf.put_u32(self.header.timestamp);
        buf.put_u32(self.header.ssrc);
        for csrc in &self.header.csrc {
            buf.put_u32(*csrc);
        }
        buf.put_slice(&self.payload);
        buf.to_vec()
    }
}

/// Extracts the SSRC directly from a raw datagram without a full parse —
/// used by the socket heap's demultiplexer and by SRTP's per-SSRC policy
/// lookup on the hot path.
pub fn ssrc_of(buf: &[u8]) -> Option<u32> {
    if buf.len() < FIXED_HEADER_LEN {
        return None;
    }
    Some(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]))
}

pub fn sequence_number_of(buf: &[u8]) -> Option<u16> {
    if buf.len() < FIXED_HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([buf[2], buf[3]]))
}

/// RTP version-field sniff used by the socket heap to tell RTP/RTCP apart
/// from STUN (whose magic cookie sits in different bytes entirely).
pub fn looks_like_rtp_or_rtcp(buf: &[u8]) -> bool {
    buf.len() >= FIXED_HEADER_LEN && (buf[0] >> 6) == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let header = RtpHeader::new(0, 1000, 160_000, 0xdead_beef).with_marker(true);
        let packet = RtpPacket::new(header.clone(), vec![1, 2, 3, 4]);
        let bytes = packet.serialize();
        let parsed = RtpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn ssrc_of_matches_parsed_header() {
        let header = RtpHeader::new(8, 1, 1, 0x1234_5678);
        let packet = RtpPacket::new(header, vec![]);
        let bytes = packet.serialize();
        assert_eq!(ssrc_of(&bytes), Some(0x1234_5678));
        assert_eq!(sequence_number_of(&bytes), Some(1));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(RtpPacket::parse(&[0u8; 4]).is_err());
    }

    #[test]
    fn honors_padding_byte() {
        let header = RtpHeader::new(0, 1, 1, 1);
        let mut buf = RtpPacket::new(header, vec![9, 9, 9]).serialize();
        buf[0] |= 0x20; // set padding bit
        buf.extend_from_slice(&[0, 0, 2]); // 2 bytes padding, last byte = count
        let parsed = RtpPacket::parse(&buf).unwrap();
        assert_eq!(parsed.payload, vec![9, 9, 9, 0]);
    }
}
