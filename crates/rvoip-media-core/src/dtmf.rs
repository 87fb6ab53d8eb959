//! DTMF engine: RFC 2833 packet builder and inband tone synthesizer with a
//! start/stop/queue model (spec §2, §4.2). The RFC2833/inband split mirrors
//! `original_source`'s `DtmfBuilder::buildRfc2833`/`buildInband` and
//! `DtmfContext`'s mode switch.

use std::f64::consts::PI;

/// One DTMF digit, RFC 2833 §3 event codes 0-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfDigit {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    D9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfDigit {
    pub fn event_code(self) -> u8 {
        match self {
            DtmfDigit::D0 => 0,
            DtmfDigit::D1 => 1,
            DtmfDigit::D2 => 2,
            DtmfDigit::D3 => 3,
            DtmfDigit::D4 => 4,
            DtmfDigit::D5 => 5,
            DtmfDigit::D6 => 6,
            DtmfDigit::D7 => 7,
            DtmfDigit::D8 => 8,
            DtmfDigit::D9 => 9,
            DtmfDigit::Star => 10,
            DtmfDigit::Pound => 11,
            DtmfDigit::A => 12,
            DtmfDigit::B => 13,
            DtmfDigit::C => 14,
            DtmfDigit::D => 15,
        }
    }

    /// Dual-tone low/high frequencies per the standard DTMF keypad matrix.
    fn frequencies(self) -> (f64, f64) {
        let (row, col) = match self {
            DtmfDigit::D1 => (697.0, 1209.0),
            DtmfDigit::D2 => (697.0, 1336.0),
            DtmfDigit::D3 => (697.0, 1477.0),
            DtmfDigit::A => (697.0, 1633.0),
            DtmfDigit::D4 => (770.0, 1209.0),
            DtmfDigit::D5 => (770.0, 1336.0),
            DtmfDigit::D6 => (770.0, 1477.0),
            DtmfDigit::B => (770.0, 1633.0),
            DtmfDigit::D7 => (852.0, 1209.0),
            DtmfDigit::D8 => (852.0, 1336.0),
            DtmfDigit::D9 => (852.0, 1477.0),
            DtmfDigit::C => (852.0, 1633.0),
            DtmfDigit::Star => (941.0, 1209.0),
            DtmfDigit::D0 => (941.0, 1336.0),
            DtmfDigit::Pound => (941.0, 1477.0),
            DtmfDigit::D => (941.0, 1633.0),
        };
        (row, col)
    }
}

/// One outbound RFC 2833 telephone-event payload (RFC 2833 §3.1 layout:
/// event, E/R/volume byte, duration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc2833Packet {
    pub event: u8,
    pub end_of_event: bool,
    pub volume: u8,
    pub duration: u16,
    pub marker: bool,
}

impl Rfc2833Packet {
    pub fn serialize(&self) -> [u8; 4] {
        let mut second_byte = self.volume & 0x3f;
        if self.end_of_event {
            second_byte |= 0x80;
        }
        let dur = self.duration.to_be_bytes();
        [self.event, second_byte, dur[0], dur[1]]
    }
}

/// Builds the RFC 2833 packet sequence for one DTMF digit held for
/// `duration_ms`, ticked every `packet_time_ms` (spec §4.2, §8's
/// "ceil(D/packet_time) packets plus 3 terminating packets" law).
pub fn build_rfc2833(digit: DtmfDigit, duration_ms: u32, packet_time_ms: u32, volume: u8) -> Vec<Rfc2833Packet> {
    let event = digit.event_code();
    let ticks = (duration_ms as f64 / packet_time_ms as f64).ceil() as u32;
    let mut packets = Vec::with_capacity(ticks as usize + 3);

    for tick in 0..ticks {
        let elapsed = (tick + 1) * packet_time_ms;
        packets.push(Rfc2833Packet {
            event,
            end_of_event: false,
            volume,
            duration: elapsed.min(u16::MAX as u32) as u16,
            marker: tick == 0,
        });
    }

    let final_duration = (ticks * packet_time_ms).min(u16::MAX as u32) as u16;
    for _ in 0..3 {
        packets.push(Rfc2833Packet { event, end_of_event: true, volume, duration: final_duration, marker: false });
    }
    packets
}

/// Synthesizes `ceil(duration_ms * rate / 1000)` PCM16 samples of dual-tone
/// audio for a digit at the given device sample rate (spec §8's inband
/// round-trip law).
pub fn build_inband(digit: DtmfDigit, duration_ms: u32, rate: u32, amplitude: i16) -> Vec<i16> {
    let (f_low, f_high) = digit.frequencies();
    let sample_count = ((duration_ms as u64 * rate as u64 + 999) / 1000) as usize;
    let mut out = Vec::with_capacity(sample_count);
    for n in 0..sample_count {
        let t = n as f64 / rate as f64;
        let sample = (2.0 * PI * f_low * t).sin() + (2.0 * PI * f_high * t).sin();
        out.push(((sample / 2.0) * amplitude as f64) as i16);
    }
    out
}

/// Which representation is currently being generated for the active digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfMode {
    Rfc2833,
    Inband,
}

enum ActiveTone {
    Inband { samples: Vec<i16>, position: usize },
    Rfc2833 { packets: Vec<Rfc2833Packet>, next_index: usize },
}

/// Queue-driven DTMF state machine for one audio stream's send path: one
/// digit generates at a time, subsequent digits queue (spec §2 "start/stop/
/// queue model").
pub struct DtmfEngine {
    mode: DtmfMode,
    queue: std::collections::VecDeque<DtmfDigit>,
    active: Option<ActiveTone>,
    packet_time_ms: u32,
    digit_duration_ms: u32,
    device_rate: u32,
}

impl DtmfEngine {
    pub fn new(mode: DtmfMode, packet_time_ms: u32, digit_duration_ms: u32, device_rate: u32) -> Self {
        Self { mode, queue: std::collections::VecDeque::new(), active: None, packet_time_ms, digit_duration_ms, device_rate }
    }

    pub fn queue_digit(&mut self, digit: DtmfDigit) {
        self.queue.push_back(digit);
        if self.active.is_none() {
            self.start_next();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn start_next(&mut self) {
        let Some(digit) = self.queue.pop_front() else { return };
        self.active = Some(match self.mode {
            DtmfMode::Inband => ActiveTone::Inband {
                samples: build_inband(digit, self.digit_duration_ms, self.device_rate, 8000),
                position: 0,
            },
            DtmfMode::Rfc2833 => ActiveTone::Rfc2833 {
                packets: build_rfc2833(digit, self.digit_duration_ms, self.packet_time_ms, 10),
                next_index: 0,
            },
        });
    }

    /// Pulls `frame_samples` of inband tone audio (only meaningful in
    /// [`DtmfMode::Inband`]); splices into the send path in place of
    /// resampled microphone audio per spec §4.2 step 5.
    pub fn pull_inband_frame(&mut self, frame_samples: usize) -> Option<Vec<i16>> {
        let ActiveTone::Inband { samples, position } = self.active.as_mut()? else { return None };
        if *position >= samples.len() {
            self.active = None;
            self.start_next();
            return None;
        }
        let end = (*position + frame_samples).min(samples.len());
        let frame = samples[*position..end].to_vec();
        *position = end;
        if *position >= samples.len() {
            self.active = None;
            self.start_next();
        }
        Some(frame)
    }

    /// Pops the next RFC 2833 packet to emit this tick, if any (only
    /// meaningful in [`DtmfMode::Rfc2833`]).
    pub fn pull_rfc2833_packet(&mut self) -> Option<Rfc2833Packet> {
        let ActiveTone::Rfc2833 { packets, next_index } = self.active.as_mut()? else { return None };
        if *next_index >= packets.len() {
            self.active = None;
            self.start_next();
            return None;
        }
        let packet = packets[*next_index].clone();
        *next_index += 1;
        if *next_index >= packets.len() {
            self.active = None;
            self.start_next();
        }
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc2833_burst_matches_scenario_5_of_the_spec() {
        // digit '1' for 160ms at packet_time=20ms -> 8 event packets + 3 terminators
        let packets = build_rfc2833(DtmfDigit::D1, 160, 20, 10);
        assert_eq!(packets.len(), 11);
        assert_eq!(packets.iter().filter(|p| p.end_of_event).count(), 3);
        assert!(packets[0].marker);
        assert!(packets[1..].iter().all(|p| !p.marker));
        for w in packets[..8].windows(2) {
            assert!(w[1].duration > w[0].duration);
        }
    }

    #[test]
    fn inband_sample_count_matches_duration_and_rate() {
        let samples = build_inband(DtmfDigit::D5, 100, 8000, 8000);
        assert_eq!(samples.len(), 800);
    }

    #[test]
    fn queue_advances_to_next_digit_after_inband_tone_drains() {
        let mut engine = DtmfEngine::new(DtmfMode::Inband, 20, 20, 8000);
        engine.queue_digit(DtmfDigit::D1);
        engine.queue_digit(DtmfDigit::D2);
        // drain first digit (20ms @ 8kHz = 160 samples) in one pull
        let frame = engine.pull_inband_frame(160).unwrap();
        assert_eq!(frame.len(), 160);
        assert!(engine.is_active());
    }
}
