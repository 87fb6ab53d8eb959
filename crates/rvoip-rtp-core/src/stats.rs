//! Per-session media statistics: counters, RFC 3550 jitter, RTT and MOS
//! estimation (spec §4.2 "Statistics", §8 "packet loss law").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Running statistics for one RTP session, updated from the send and
/// receive paths without a lock (all fields are independent atomics — the
/// numbers are a snapshot, not a transaction).
#[derive(Default)]
pub struct SessionStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    rtcp_packets_sent: AtomicU64,
    rtcp_packets_received: AtomicU64,
    dropped_rtp_count: AtomicU64,

    first_seq: AtomicU32,
    highest_seq: AtomicU32,
    seq_initialized: std::sync::atomic::AtomicBool,

    // RFC 3550 §6.4.1 jitter estimate, stored as fixed-point (x16) so the
    // 1/16 filter update stays integer arithmetic on the hot path.
    jitter_x16: AtomicU64,
    last_transit: AtomicU64,
    transit_initialized: std::sync::atomic::AtomicBool,

    // RTT exponential moving average, milliseconds x1000.
    rtt_ewma_micros: AtomicU64,
}

/// A consistent snapshot of [`SessionStats`] for reporting to the
/// command/event bus (`get_media_stats`, spec §4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub rtcp_packets_sent: u64,
    pub rtcp_packets_received: u64,
    pub packets_lost: u64,
    pub jitter_samples: f64,
    pub rtt_ms: f64,
    pub mos: f32,
    pub remote_address: Option<SocketAddr>,
    pub codec_name: Option<&'static str>,
    pub ssrc: Option<u32>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_rtcp_sent(&self) {
        self.rtcp_packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rtcp_received(&self) {
        self.rtcp_packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_rtp_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one received RTP packet and updates the sequence-range and
    /// jitter trackers. `arrival_ts` and `rtp_ts` are both in RTP clock-rate
    /// units (spec §8's jitter law assumes a common timebase).
    pub fn record_received(&self, bytes: usize, seq: u16, arrival_ts: u32, rtp_ts: u32) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);

        if !self.seq_initialized.swap(true, Ordering::Relaxed) {
            self.first_seq.store(seq as u32, Ordering::Relaxed);
            self.highest_seq.store(seq as u32, Ordering::Relaxed);
        } else {
            let highest = self.highest_seq.load(Ordering::Relaxed) as u16;
            let diff = seq.wrapping_sub(highest) as i16;
            if diff > 0 {
                self.highest_seq.store(seq as u32, Ordering::Relaxed);
            }
        }

        let transit = (arrival_ts as i64).wrapping_sub(rtp_ts as i64);
        if !self.transit_initialized.swap(true, Ordering::Relaxed) {
            self.last_transit.store(transit as u64, Ordering::Relaxed);
        } else {
            let last = self.last_transit.load(Ordering::Relaxed) as i64;
            let d = (transit - last).unsigned_abs();
            self.last_transit.store(transit as u64, Ordering::Relaxed);
            // jitter += (|d| - jitter) / 16, fixed-point by 16 to avoid
            // losing the fractional part (RFC 3550 §6.4.1).
            let prev = self.jitter_x16.load(Ordering::Relaxed) as i64;
            let new = prev + (d as i64 * 16 - prev) / 16;
            self.jitter_x16.store(new.max(0) as u64, Ordering::Relaxed);
        }
    }

    /// Folds one RTT sample (round-trip measured from an RTCP SR/RR
    /// exchange's `lsr`/`dlsr` fields) into the running EWMA, weight 1/8.
    pub fn record_rtt_sample(&self, rtt: std::time::Duration) {
        let sample_micros = rtt.as_micros() as u64;
        let prev = self.rtt_ewma_micros.load(Ordering::Relaxed);
        let new = if prev == 0 { sample_micros } else { prev + (sample_micros.wrapping_sub(prev)) / 8 };
        self.rtt_ewma_micros.store(new, Ordering::Relaxed);
    }

    /// Packets lost per spec §8: `max(0, expected_range) - received - already_counted_dropped`.
    /// Expected range is inclusive of both ends of the observed sequence window.
    pub fn packets_lost(&self) -> u64 {
        if !self.seq_initialized.load(Ordering::Relaxed) {
            return 0;
        }
        let first = self.first_seq.load(Ordering::Relaxed);
        let highest = self.highest_seq.load(Ordering::Relaxed);
        let expected = (highest.wrapping_sub(first) as u64) + 1;
        let received = self.packets_received.load(Ordering::Relaxed);
        expected.saturating_sub(received)
    }

    pub fn jitter_samples(&self) -> f64 {
        self.jitter_x16.load(Ordering::Relaxed) as f64 / 16.0
    }

    pub fn rtt_ms(&self) -> f64 {
        self.rtt_ewma_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Simplified E-model MOS (ITU-T G.107): starts from a codec R-factor,
    /// subtracts loss and jitter-driven delay penalties, maps R to MOS with
    /// the standard cubic. Good enough for the bus's `get_media_stats` call,
    /// not a full E-model implementation.
    pub fn mos(&self, codec_r_factor: f64, clock_rate: u32) -> f32 {
        let total = self.packets_received.load(Ordering::Relaxed) + self.packets_lost();
        let loss_fraction = if total == 0 { 0.0 } else { self.packets_lost() as f64 / total as f64 };

        // Loss impairment, Cisco's commonly cited approximation: ~2.5 R per %.
        let loss_penalty = loss_fraction * 100.0 * 2.5;

        let jitter_ms = if clock_rate == 0 { 0.0 } else { self.jitter_samples() / (clock_rate as f64 / 1000.0) };
        let delay_ms = self.rtt_ms() / 2.0 + jitter_ms;
        let delay_penalty = if delay_ms < 160.0 { 0.0 } else { (delay_ms - 160.0) / 40.0 };

        let r = (codec_r_factor - loss_penalty - delay_penalty).clamp(0.0, 100.0);
        let mos = 1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7e-6;
        mos.clamp(1.0, 4.5) as f32
    }

    pub fn snapshot(&self, remote_address: Option<SocketAddr>, codec_name: Option<&'static str>, ssrc: Option<u32>, codec_r_factor: f64, clock_rate: u32) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            rtcp_packets_sent: self.rtcp_packets_sent.load(Ordering::Relaxed),
            rtcp_packets_received: self.rtcp_packets_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost(),
            jitter_samples: self.jitter_samples(),
            rtt_ms: self.rtt_ms(),
            mos: self.mos(codec_r_factor, clock_rate),
            remote_address,
            codec_name,
            ssrc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loss_when_sequence_is_contiguous() {
        let stats = SessionStats::new();
        for seq in 0..10u16 {
            stats.record_received(160, seq, seq as u32 * 160, seq as u32 * 160);
        }
        assert_eq!(stats.packets_lost(), 0);
    }

    #[test]
    fn counts_gap_in_sequence() {
        let stats = SessionStats::new();
        stats.record_received(160, 0, 0, 0);
        stats.record_received(160, 5, 800, 800);
        // expected range [0,5] = 6 packets, 2 received -> 4 lost
        assert_eq!(stats.packets_lost(), 4);
    }

    #[test]
    fn mos_degrades_with_loss() {
        let clean = SessionStats::new();
        for seq in 0..50u16 {
            clean.record_received(160, seq, seq as u32 * 160, seq as u32 * 160);
        }
        let lossy = SessionStats::new();
        for seq in (0..50u16).step_by(2) {
            lossy.record_received(160, seq, seq as u32 * 160, seq as u32 * 160);
        }
        assert!(clean.mos(93.2, 8000) > lossy.mos(93.2, 8000));
    }

    #[test]
    fn rtt_ewma_converges_toward_samples() {
        let stats = SessionStats::new();
        for _ in 0..50 {
            stats.record_rtt_sample(std::time::Duration::from_millis(40));
        }
        assert!((stats.rtt_ms() - 40.0).abs() < 1.0);
    }
}
