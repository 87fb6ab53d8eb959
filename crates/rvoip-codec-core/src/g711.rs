//! G.711 μ-law (PCMU, payload type 0) and A-law (PCMA, payload type 8).
//!
//! Both variants compand 16-bit linear PCM down to 8 bits per sample at
//! 8 kHz mono, per ITU-T G.711. There is no encoder/decoder state to carry
//! between frames, unlike ADPCM-style codecs — `G711Encoder`/`G711Decoder`
//! are thin wrappers so the trait objects still have somewhere to live.

use crate::registry::{CodecDescriptor, CodecFactory, Decoder, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    Pcmu,
    Pcma,
}

pub struct G711Factory {
    variant: G711Variant,
    /// Samples per native frame, e.g. 160 for 20ms @ 8kHz.
    frame_time_ms: u32,
}

impl G711Factory {
    pub fn new(variant: G711Variant, frame_time_ms: u32) -> Self {
        Self { variant, frame_time_ms }
    }

    pub fn pcmu() -> Self {
        Self::new(G711Variant::Pcmu, 20)
    }

    pub fn pcma() -> Self {
        Self::new(G711Variant::Pcma, 20)
    }
}

impl CodecFactory for G711Factory {
    fn descriptor(&self) -> CodecDescriptor {
        let samples_per_frame = 8000 * self.frame_time_ms / 1000;
        CodecDescriptor {
            name: match self.variant {
                G711Variant::Pcmu => "PCMU",
                G711Variant::Pcma => "PCMA",
            },
            payload_type: match self.variant {
                G711Variant::Pcmu => 0,
                G711Variant::Pcma => 8,
            },
            clock_rate: 8000,
            channels: 1,
            frame_time_ms: self.frame_time_ms,
            payload_size: samples_per_frame as usize,
        }
    }

    fn new_encoder(&self) -> Box<dyn Encoder> {
        Box::new(G711Encoder { variant: self.variant })
    }

    fn new_decoder(&self) -> Box<dyn Decoder> {
        Box::new(G711Decoder { variant: self.variant })
    }
}

struct G711Encoder {
    variant: G711Variant,
}

impl Encoder for G711Encoder {
    fn encode(&mut self, pcm: &[i16]) -> Vec<u8> {
        pcm.iter()
            .map(|&s| match self.variant {
                G711Variant::Pcmu => linear_to_ulaw(s),
                G711Variant::Pcma => linear_to_alaw(s),
            })
            .collect()
    }
}

struct G711Decoder {
    variant: G711Variant,
}

impl Decoder for G711Decoder {
    fn decode(&mut self, payload: &[u8]) -> Vec<i16> {
        payload
            .iter()
            .map(|&b| match self.variant {
                G711Variant::Pcmu => ulaw_to_linear(b),
                G711Variant::Pcma => alaw_to_linear(b),
            })
            .collect()
    }
}

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// ITU-T G.711 μ-law encode.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let exponent = (0..8)
        .rev()
        .find(|&exp| pcm >= (1 << (exp + 3)))
        .unwrap_or(0);
    let mantissa = (pcm >> (exponent + 3)) & 0x0f;
    let byte = !(sign | (exponent << 4) as i32 | mantissa) as u8;
    byte
}

/// ITU-T G.711 μ-law decode.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0f;
    let mut sample = ((mantissa as i32) << 3) + BIAS;
    sample <<= exponent as i32;
    sample -= BIAS;
    (if sign != 0 { -sample } else { sample }) as i16
}

/// ITU-T G.711 A-law encode.
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm >= 0 { 0x80 } else { 0 };
    if pcm < 0 {
        pcm = -pcm - 1;
    }
    if pcm > CLIP {
        pcm = CLIP;
    }

    let exponent = (0..8).rev().find(|&exp| pcm >= (1 << (exp + 4))).unwrap_or(0);
    let mantissa = if exponent == 0 {
        (pcm >> 4) & 0x0f
    } else {
        (pcm >> (exponent + 3)) & 0x0f
    };
    let byte = (sign | ((exponent as i32) << 4) | mantissa) as u8;
    byte ^ 0x55
}

/// ITU-T G.711 A-law decode.
pub fn alaw_to_linear(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0f;

    let mut sample = ((mantissa as i32) << 4) + 8;
    if exponent > 0 {
        sample += 0x100;
        sample <<= exponent as i32 - 1;
    }
    (if sign != 0 { -sample } else { sample }) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulaw_round_trip_is_within_companding_error() {
        for sample in [0i16, 100, -100, 5000, -5000, 16000, -16000, 32000, -32000] {
            let encoded = linear_to_ulaw(sample);
            let decoded = ulaw_to_linear(encoded);
            assert!((sample as i32 - decoded as i32).abs() < 700, "sample={sample} decoded={decoded}");
        }
    }

    #[test]
    fn alaw_round_trip_is_within_companding_error() {
        for sample in [0i16, 100, -100, 5000, -5000, 16000, -16000, 32000, -32000] {
            let encoded = linear_to_alaw(sample);
            let decoded = alaw_to_linear(encoded);
            assert!((sample as i32 - decoded as i32).abs() < 700, "sample={sample} decoded={decoded}");
        }
    }

    #[test]
    fn factory_descriptor_matches_rfc_defaults() {
        let desc = G711Factory::pcmu().descriptor();
        assert_eq!(desc.payload_type, 0);
        assert_eq!(desc.clock_rate, 8000);
        assert_eq!(desc.payload_size, 160);

        let desc = G711Factory::pcma().descriptor();
        assert_eq!(desc.payload_type, 8);
    }

    #[test]
    fn encoder_decoder_round_trip_through_trait_objects() {
        let factory = G711Factory::pcmu();
        let mut encoder = factory.new_encoder();
        let mut decoder = factory.new_decoder();
        let pcm: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let encoded = encoder.encode(&pcm);
        assert_eq!(encoded.len(), 160);
        let decoded = decoder.decode(&encoded);
        assert_eq!(decoded.len(), 160);
    }
}
