//! `RtpSession`: sequence/timestamp bookkeeping and the send/receive path
//! that sits between a socket pair and the codec layer above it (spec §4.2
//! steps 1-7 minus codec/jitter-buffer concerns, which `rvoip-media-core`
//! owns per the leaf ownership table in spec §2).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use rand::RngCore;

use crate::error::{Result, RtpError};
use crate::packet::{RtpHeader, RtpPacket};
use crate::rtcp::{self, ReceiverReport, ReportBlock, RtcpPacket, SenderReport};
use crate::socket_heap::{SocketHandle, SocketHeap};
use crate::srtp::SrtpSession;
use crate::stats::SessionStats;

/// One bound RTP/RTCP media leg: owns the send-side sequence number and
/// timestamp cursor, demuxes inbound datagrams by payload-type sniff
/// (RFC 5761 rtcp-mux), optionally runs SRTP, and folds every packet into
/// [`SessionStats`].
pub struct RtpSession {
    local_ssrc: u32,
    payload_type: AtomicU16,
    clock_rate: u32,

    sequence: AtomicU16,
    timestamp: AtomicU32,
    marker_next: AtomicBool,

    remote_addr: parking_lot::Mutex<Option<SocketAddr>>,
    remote_ssrc: AtomicU32,
    remote_ssrc_known: AtomicBool,

    rtp_handle: SocketHandle,
    rtcp_handle: SocketHandle,
    heap: Arc<SocketHeap>,

    srtp: Option<Arc<SrtpSession>>,
    stats: SessionStats,
}

impl RtpSession {
    /// `rtp_handle`/`rtcp_handle` are the same value when rtcp-mux is in
    /// effect; `srtp` is `None` for a plain RTP/AVP session.
    pub fn new(
        heap: Arc<SocketHeap>,
        rtp_handle: SocketHandle,
        rtcp_handle: SocketHandle,
        payload_type: u8,
        clock_rate: u32,
        srtp: Option<Arc<SrtpSession>>,
    ) -> Self {
        let mut ssrc_bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut ssrc_bytes);
        let mut seq_bytes = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut seq_bytes);

        Self {
            local_ssrc: u32::from_be_bytes(ssrc_bytes),
            payload_type: AtomicU16::new(payload_type as u16),
            clock_rate,
            sequence: AtomicU16::new(u16::from_be_bytes(seq_bytes)),
            timestamp: AtomicU32::new(0),
            marker_next: AtomicBool::new(true),
            remote_addr: parking_lot::Mutex::new(None),
            remote_ssrc: AtomicU32::new(0),
            remote_ssrc_known: AtomicBool::new(false),
            rtp_handle,
            rtcp_handle,
            heap,
            srtp,
            stats: SessionStats::new(),
        }
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn set_remote_address(&self, addr: SocketAddr) {
        *self.remote_addr.lock() = Some(addr);
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote_addr.lock()
    }

    pub fn set_payload_type(&self, pt: u8) {
        self.payload_type.store(pt as u16, Ordering::Relaxed);
    }

    /// Encodes, optionally protects, and sends one frame of audio samples
    /// worth of already-encoded payload bytes. `samples_in_frame` advances
    /// the RTP timestamp by the codec's per-frame sample count.
    pub fn send_frame(&self, payload: &[u8], samples_in_frame: u32) -> Result<usize> {
        let remote = self.remote_address().ok_or_else(|| RtpError::Io("no remote address set".to_string()))?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ts = self.timestamp.fetch_add(samples_in_frame, Ordering::Relaxed);
        let marker = self.marker_next.swap(false, Ordering::Relaxed);

        let header = RtpHeader::new(self.payload_type.load(Ordering::Relaxed) as u8, seq, ts, self.local_ssrc)
            .with_marker(marker);
        let mut bytes = RtpPacket::new(header, payload.to_vec()).serialize();

        if let Some(srtp) = &self.srtp {
            srtp.protect_rtp(&mut bytes)?;
        }

        let sent = self.heap.send_data(self.rtp_handle, remote, &bytes)?;
        self.stats.record_sent(sent);
        Ok(sent)
    }

    /// Marks the next outgoing frame as a talkspurt start (RFC 3551 marker
    /// bit) — called after silence suppression or a pause/resume cycle.
    pub fn mark_next_as_talkspurt_start(&self) {
        self.marker_next.store(true, Ordering::Relaxed);
    }

    /// Handles one datagram the socket heap delivered for this session's
    /// RTP or muxed RTP/RTCP socket. Returns the decoded RTP payload when
    /// the datagram was RTP; RTCP datagrams are consumed internally.
    pub fn on_datagram(&self, src: SocketAddr, data: &[u8]) -> Option<Vec<u8>> {
        if rtcp::looks_like_rtcp(data) {
            self.on_rtcp_datagram(src, data);
            return None;
        }

        let mut plain = Vec::new();
        let result = if let Some(srtp) = &self.srtp {
            srtp.unprotect_rtp(data, &mut plain)
        } else {
            plain.extend_from_slice(data);
            Ok(data.len())
        };

        let len = match result {
            Ok(len) => len,
            Err(_) => {
                self.stats.record_dropped();
                return None;
            }
        };
        plain.truncate(len);

        let parsed = match RtpPacket::parse(&plain) {
            Ok(p) => p,
            Err(_) => {
                self.stats.record_dropped();
                return None;
            }
        };

        if !self.remote_ssrc_known.swap(true, Ordering::Relaxed) {
            self.remote_ssrc.store(parsed.header.ssrc, Ordering::Relaxed);
        }
        self.set_remote_address(src);

        let arrival = now_rtp_units(self.clock_rate);
        self.stats.record_received(plain.len(), parsed.header.sequence_number, arrival, parsed.header.timestamp);

        Some(parsed.payload)
    }

    fn on_rtcp_datagram(&self, _src: SocketAddr, data: &[u8]) {
        let mut plain = Vec::new();
        let raw = if let Some(srtp) = &self.srtp {
            match srtp.unprotect_rtcp(data, &mut plain) {
                Ok(len) => {
                    plain.truncate(len);
                    &plain[..]
                }
                Err(_) => {
                    self.stats.record_dropped();
                    return;
                }
            }
        } else {
            data
        };

        if RtcpPacket::parse(raw).is_ok() {
            self.stats.record_rtcp_received();
        }
    }

    /// Builds and sends a Receiver Report for the current remote SSRC.
    /// Sender Reports are `rvoip-media-core`'s job (it knows wall-clock/NTP
    /// mapping); this session only ever reports as a receiver.
    pub fn send_receiver_report(&self) -> Result<()> {
        let remote = self.remote_address().ok_or_else(|| RtpError::Io("no remote address set".to_string()))?;
        if !self.remote_ssrc_known.load(Ordering::Relaxed) {
            return Ok(());
        }

        let report = ReceiverReport {
            ssrc: self.local_ssrc,
            reports: vec![ReportBlock {
                ssrc: self.remote_ssrc.load(Ordering::Relaxed),
                fraction_lost: 0,
                cumulative_lost: self.stats.packets_lost() as u32,
                highest_seq: 0,
                jitter: self.stats.jitter_samples() as u32,
                lsr: 0,
                dlsr: 0,
            }],
        };
        let mut bytes = RtcpPacket::ReceiverReport(report).serialize();
        if let Some(srtp) = &self.srtp {
            srtp.protect_rtcp(&mut bytes)?;
        }
        self.heap.send_data(self.rtcp_handle, remote, &bytes)?;
        self.stats.record_rtcp_sent();
        Ok(())
    }

    /// Sends a Sender Report built by the caller, who owns the wall-clock
    /// → NTP mapping and running packet/octet counts.
    pub fn send_sender_report(&self, report: SenderReport) -> Result<()> {
        let remote = self.remote_address().ok_or_else(|| RtpError::Io("no remote address set".to_string()))?;
        let mut bytes = RtcpPacket::SenderReport(report).serialize();
        if let Some(srtp) = &self.srtp {
            srtp.protect_rtcp(&mut bytes)?;
        }
        self.heap.send_data(self.rtcp_handle, remote, &bytes)?;
        self.stats.record_rtcp_sent();
        Ok(())
    }
}

fn now_rtp_units(clock_rate: u32) -> u32 {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs_f64();
    ((secs * clock_rate as f64) as u64 & 0xffff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket_heap::{Family, Multiplex, SocketSink};
    use std::sync::atomic::AtomicUsize;

    struct NullSink;
    impl SocketSink for NullSink {
        fn on_received_data(&self, _handle: SocketHandle, _src: SocketAddr, _data: &[u8]) {}
    }

    #[test]
    fn sequence_and_timestamp_advance_per_frame() {
        let heap = Arc::new(SocketHeap::new(31000, 31200).unwrap());
        let (rtp, rtcp) = heap
            .alloc_socket_pair(Family::V4, Arc::new(NullSink), Multiplex::Do)
            .unwrap();
        let session = RtpSession::new(heap.clone(), rtp.0, rtcp.0, 0, 8000, None);
        session.set_remote_address("127.0.0.1:9".parse().unwrap());

        let first_seq = session.sequence.load(Ordering::Relaxed);
        session.send_frame(&[0u8; 160], 160).unwrap();
        session.send_frame(&[0u8; 160], 160).unwrap();

        assert_eq!(session.sequence.load(Ordering::Relaxed), first_seq.wrapping_add(2));
        assert_eq!(session.timestamp.load(Ordering::Relaxed), 320);
        heap.shutdown();
    }

    #[test]
    fn first_frame_carries_marker_bit() {
        let heap = Arc::new(SocketHeap::new(31202, 31400).unwrap());
        let (rtp, rtcp) = heap
            .alloc_socket_pair(Family::V4, Arc::new(NullSink), Multiplex::Do)
            .unwrap();
        let session = RtpSession::new(heap.clone(), rtp.0, rtcp.0, 0, 8000, None);
        session.set_remote_address("127.0.0.1:9".parse().unwrap());

        assert!(session.marker_next.load(Ordering::Relaxed));
        session.send_frame(&[0u8; 160], 160).unwrap();
        assert!(!session.marker_next.load(Ordering::Relaxed));
        heap.shutdown();
    }

    #[test]
    fn round_trips_plaintext_rtp_through_on_datagram() {
        let heap = Arc::new(SocketHeap::new(31402, 31600).unwrap());
        let received_count = Arc::new(AtomicUsize::new(0));

        struct CountingSink(Arc<AtomicUsize>);
        impl SocketSink for CountingSink {
            fn on_received_data(&self, _h: SocketHandle, _s: SocketAddr, _d: &[u8]) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let sink = Arc::new(CountingSink(received_count.clone()));
        let (rtp, rtcp) = heap.alloc_socket_pair(Family::V4, sink, Multiplex::Do).unwrap();
        let session = RtpSession::new(heap.clone(), rtp.0, rtcp.0, 0, 8000, None);

        let header = RtpHeader::new(0, 5, 800, 0xabcd_ef01);
        let packet = RtpPacket::new(header, vec![1, 2, 3]).serialize();
        let payload = session.on_datagram("127.0.0.1:9999".parse().unwrap(), &packet);
        assert_eq!(payload, Some(vec![1, 2, 3]));
        assert_eq!(session.stats().packets_lost(), 0);
        heap.shutdown();
    }
}
