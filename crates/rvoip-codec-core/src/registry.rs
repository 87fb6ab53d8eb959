//! The codec factory trait and a static-priority registry.

use std::sync::Arc;

/// What the media pipeline needs to know about a codec without caring how
/// it works: sample rate, channel count, native frame time, and the RTP
/// payload type it negotiates under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub name: &'static str,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u8,
    /// Native frame duration in milliseconds — the default packet time
    /// (spec §4.2) when the session doesn't override it.
    pub frame_time_ms: u32,
    /// Encoded bytes produced per native frame.
    pub payload_size: usize,
}

/// Per-call encoder state. Not `Clone`: codecs may carry prediction state.
pub trait Encoder: Send {
    /// Encodes one native frame of interleaved PCM16 samples.
    fn encode(&mut self, pcm: &[i16]) -> Vec<u8>;
}

/// Per-call decoder state, one instance per receive SSRC (spec §3).
pub trait Decoder: Send {
    /// Decodes one payload into PCM16 samples; an empty payload (or a
    /// decode failure the codec recovers from) should still emit a full
    /// native frame's worth of samples so the jitter buffer's shape doesn't
    /// need special-casing (spec §7: "Codec failure ... emit silence frame").
    fn decode(&mut self, payload: &[u8]) -> Vec<i16>;
}

/// Produces encoder/decoder instances with a declared [`CodecDescriptor`].
pub trait CodecFactory: Send + Sync {
    fn descriptor(&self) -> CodecDescriptor;
    fn new_encoder(&self) -> Box<dyn Encoder>;
    fn new_decoder(&self) -> Box<dyn Decoder>;
}

/// A static codec priority list (spec's Non-goals rule out adaptive
/// switching — selection is this list, top to bottom).
#[derive(Clone, Default)]
pub struct CodecRegistry {
    factories: Vec<Arc<dyn CodecFactory>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self { factories: Vec::new() }
    }

    pub fn with_priority(mut self, factory: Arc<dyn CodecFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn factories(&self) -> &[Arc<dyn CodecFactory>] {
        &self.factories
    }

    pub fn by_payload_type(&self, pt: u8) -> Option<Arc<dyn CodecFactory>> {
        self.factories.iter().find(|f| f.descriptor().payload_type == pt).cloned()
    }

    /// First local factory (in priority order) whose payload type the peer
    /// also offered — the "static priority list" selection rule of spec §1.
    pub fn negotiate(&self, remote_payload_types: &[u8]) -> Option<Arc<dyn CodecFactory>> {
        self.factories
            .iter()
            .find(|f| remote_payload_types.contains(&f.descriptor().payload_type))
            .cloned()
    }
}
