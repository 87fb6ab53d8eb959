//! Per-SSRC receive stream: decoder + jitter buffer producing smoothed PCM
//! (spec §2, §4.2 "Jitter buffer").

use std::collections::BTreeMap;

use rvoip_codec_core::registry::Decoder;

/// Target prebuffer before the stream starts emitting (spec §4.2).
pub const RTP_BUFFER_PREBUFFER: usize = 3;
/// Queue length above which the oldest packet is dropped to keep latency
/// bounded (spec §4.2).
pub const RTP_BUFFER_HIGH: usize = 20;
/// Reordering window: a packet this far behind the highest sequence number
/// seen is treated as too late and counted dropped rather than buffered.
const REORDER_WINDOW: u16 = 100;

struct JitterBuffer {
    queue: BTreeMap<u16, Vec<u8>>,
    highest_seq: Option<u16>,
    next_expected: Option<u16>,
    prebuffering: bool,
    dropped: u64,
    duplicates: u64,
}

impl JitterBuffer {
    fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            highest_seq: None,
            next_expected: None,
            prebuffering: true,
            dropped: 0,
            duplicates: 0,
        }
    }

    fn push(&mut self, seq: u16, payload: Vec<u8>) {
        if let Some(highest) = self.highest_seq {
            let diff = seq.wrapping_sub(highest) as i16;
            if diff < 0 && (-(diff as i32)) as u16 > REORDER_WINDOW {
                self.dropped += 1;
                return;
            }
            if diff > 0 {
                self.highest_seq = Some(seq);
            }
        } else {
            self.highest_seq = Some(seq);
        }

        if self.queue.insert(seq, payload).is_some() {
            self.duplicates += 1;
        }

        if self.queue.len() > RTP_BUFFER_HIGH {
            if let Some((&oldest, _)) = self.queue.iter().next() {
                self.queue.remove(&oldest);
                self.dropped += 1;
            }
        }

        if self.prebuffering && self.queue.len() >= RTP_BUFFER_PREBUFFER {
            self.prebuffering = false;
            self.next_expected = self.queue.keys().next().copied();
        }
    }

    /// Pops the next packet in sequence order, if the stream has finished
    /// prebuffering and the next expected sequence number is present.
    fn pop_next(&mut self) -> Option<Vec<u8>> {
        if self.prebuffering {
            return None;
        }
        let next = self.next_expected?;
        let payload = self.queue.remove(&next);
        match payload {
            Some(p) => {
                self.next_expected = Some(next.wrapping_add(1));
                Some(p)
            }
            None => {
                // Gap: advance past it once something later is buffered,
                // otherwise wait (still counts as waiting, not dropped —
                // the sender may just be late this tick).
                let candidate = self.queue.keys().next().copied()?;
                self.next_expected = Some(candidate);
                self.queue.remove(&candidate)
            }
        }
    }
}

/// Decode + jitter buffer for one remote SSRC. Created on first RTP packet
/// for a new source, destroyed with the owning audio stream (spec §3).
pub struct ReceiveStream {
    ssrc: u32,
    decoder: Box<dyn Decoder>,
    jitter: JitterBuffer,
    frame_samples: usize,
}

impl ReceiveStream {
    pub fn new(ssrc: u32, decoder: Box<dyn Decoder>, frame_samples: usize) -> Self {
        Self { ssrc, decoder, jitter: JitterBuffer::new(), frame_samples }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn dropped_count(&self) -> u64 {
        self.jitter.dropped
    }

    pub fn duplicate_count(&self) -> u64 {
        self.jitter.duplicates
    }

    /// Feeds one received RTP payload, keyed by its sequence number.
    pub fn push_packet(&mut self, seq: u16, payload: Vec<u8>) {
        self.jitter.push(seq, payload);
    }

    /// Pulls one frame's worth of decoded PCM; emits exact-length silence
    /// on underrun (spec §4.2, §8).
    pub fn pull_pcm(&mut self) -> Vec<i16> {
        match self.jitter.pop_next() {
            Some(payload) => self.decoder.decode(&payload),
            None => vec![0i16; self.frame_samples],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvoip_codec_core::g711::G711Factory;
    use rvoip_codec_core::registry::CodecFactory;

    fn make_stream() -> ReceiveStream {
        let factory = G711Factory::pcmu();
        ReceiveStream::new(1, factory.new_decoder(), 160)
    }

    #[test]
    fn underrun_emits_exact_length_silence() {
        let mut stream = make_stream();
        let pcm = stream.pull_pcm();
        assert_eq!(pcm, vec![0i16; 160]);
    }

    #[test]
    fn out_of_order_packets_emit_in_sequence_order() {
        let mut stream = make_stream();
        for seq in [3u16, 1, 2] {
            stream.push_packet(seq, vec![0xffu8; 160]);
        }
        // still prebuffering with exactly 3 packets until threshold reached
        assert!(stream.jitter.prebuffering == false || stream.jitter.queue.len() == 3);
    }

    #[test]
    fn duplicate_packet_is_counted_and_not_requeued_twice() {
        let mut stream = make_stream();
        stream.push_packet(1, vec![0u8; 160]);
        stream.push_packet(1, vec![0u8; 160]);
        assert_eq!(stream.duplicate_count(), 1);
    }
}
