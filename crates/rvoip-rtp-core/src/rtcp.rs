//! RTCP Sender/Receiver Reports per RFC 3550 §6.4.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RtpError};

const SR_PT: u8 = 200;
const RR_PT: u8 = 201;

/// One reception report block, one per source being reported on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub highest_seq: u32,
    pub jitter: u32,
    pub lsr: u32,
    pub dlsr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_sec: u32,
    pub ntp_frac: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReportBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReportBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    /// Any other RTCP packet type (BYE, APP, …); preserved for forwarding
    /// but not interpreted — out of scope per spec §1.
    Other { payload_type: u8, raw: Vec<u8> },
}

fn write_report_block(buf: &mut BytesMut, rb: &ReportBlock) {
    buf.put_u32(rb.ssrc);
    buf.put_u8(rb.fraction_lost);
    buf.put_uint(rb.cumulative_lost as u64, 3);
    buf.put_u32(rb.highest_seq);
    buf.put_u32(rb.jitter);
    buf.put_u32(rb.lsr);
    buf.put_u32(rb.dlsr);
}

fn parse_report_block(buf: &[u8]) -> Result<ReportBlock> {
    if buf.len() < 24 {
        return Err(RtpError::PacketTooShort);
    }
    Ok(ReportBlock {
        ssrc: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
        fraction_lost: buf[4],
        cumulative_lost: u32::from_be_bytes([0, buf[5], buf[6], buf[7]]),
        highest_seq: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        jitter: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        lsr: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
        dlsr: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
    })
}

impl RtcpPacket {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        match self {
            RtcpPacket::SenderReport(sr) => {
                let rc = sr.reports.len() as u8;
                let word_len = 6 + 6 * sr.reports.len() as u16; // header(1) + sender info(5) + blocks(6 words each)
                buf.put_u8(0x80 | rc);
                buf.put_u8(SR_PT);
                buf.put_u16(word_len);
                buf.put_u32(sr.ssrc);
                buf.put_u32(sr.ntp_sec);
                buf.put_u32(sr.ntp_frac);
                buf.put_u32(sr.rtp_timestamp);
                buf.put_u32(sr.packet_count);
                buf.put_u32(sr.octet_count);
                for rb in &sr.reports {
                    write_report_block(&mut buf, rb);
                }
            }
            RtcpPacket::ReceiverReport(rr) => {
                let rc = rr.reports.len() as u8;
                let word_len = 1 + 6 * rr.reports.len() as u16;
                buf.put_u8(0x80 | rc);
                buf.put_u8(RR_PT);
                buf.put_u16(word_len);
                buf.put_u32(rr.ssrc);
                for rb in &rr.reports {
                    write_report_block(&mut buf, rb);
                }
            }
            RtcpPacket::Other { raw, .. } => buf.put_slice(raw),
        }
        buf.to_vec()
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(RtpError::PacketTooShort);
        }
        let rc = buf[0] & 0x1f;
        let payload_type = buf[1];
        let ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());

        match payload_type {
            SR_PT => {
                if buf.len() < 28 {
                    return Err(RtpError::PacketTooShort);
                }
                let ntp_sec = u32::from_be_bytes(buf[8..12].try_into().unwrap());
                let ntp_frac = u32::from_be_bytes(buf[12..16].try_into().unwrap());
                let rtp_timestamp = u32::from_be_bytes(buf[16..20].try_into().unwrap());
                let packet_count = u32::from_be_bytes(buf[20..24].try_into().unwrap());
                let octet_count = u32::from_be_bytes(buf[24..28].try_into().unwrap());
                let mut reports = Vec::with_capacity(rc as usize);
                let mut offset = 28;
                for _ in 0..rc {
                    reports.push(parse_report_block(&buf[offset..])?);
                    offset += 24;
                }
                Ok(RtcpPacket::SenderReport(SenderReport {
                    ssrc,
                    ntp_sec,
                    ntp_frac,
                    rtp_timestamp,
                    packet_count,
                    octet_count,
                    reports,
                }))
            }
            RR_PT => {
                let mut reports = Vec::with_capacity(rc as usize);
                let mut offset = 8;
                for _ in 0..rc {
                    reports.push(parse_report_block(&buf[offset..])?);
                    offset += 24;
                }
                Ok(RtcpPacket::ReceiverReport(ReceiverReport { ssrc, reports }))
            }
            other => Ok(RtcpPacket::Other { payload_type: other, raw: buf.to_vec() }),
        }
    }
}

/// Demultiplex hint the socket heap uses to tell RTCP from RTP on a muxed
/// socket (RFC 5761): payload type 200-204 in the second byte.
pub fn looks_like_rtcp(buf: &[u8]) -> bool {
    buf.len() >= 2 && (200..=204).contains(&buf[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sender_report_with_one_block() {
        let sr = SenderReport {
            ssrc: 0x1111_2222,
            ntp_sec: 100,
            ntp_frac: 200,
            rtp_timestamp: 8000,
            packet_count: 50,
            octet_count: 8000,
            reports: vec![ReportBlock {
                ssrc: 0x3333_4444,
                fraction_lost: 1,
                cumulative_lost: 2,
                highest_seq: 1000,
                jitter: 5,
                lsr: 0,
                dlsr: 0,
            }],
        };
        let bytes = RtcpPacket::SenderReport(sr.clone()).serialize();
        assert!(looks_like_rtcp(&bytes));
        match RtcpPacket::parse(&bytes).unwrap() {
            RtcpPacket::SenderReport(parsed) => assert_eq!(parsed, sr),
            other => panic!("expected SR, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_receiver_report_with_no_blocks() {
        let rr = ReceiverReport { ssrc: 42, reports: vec![] };
        let bytes = RtcpPacket::ReceiverReport(rr.clone()).serialize();
        match RtcpPacket::parse(&bytes).unwrap() {
            RtcpPacket::ReceiverReport(parsed) => assert_eq!(parsed, rr),
            other => panic!("expected RR, got {other:?}"),
        }
    }
}
