//! Fixed sample-rate-pair converters (spec §2 "Resampler set": 8/16/32/48 kHz
//! ↔ device rate). Linear interpolation is enough precision for narrowband
//! voice and keeps the converter state trivial to carry per (ssrc, rate)
//! pair in the mixer and per direction in the audio stream.

/// Converts PCM16 mono between two fixed rates, keeping fractional phase
/// across calls so consecutive frames resample seamlessly.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// Fractional source-sample position carried across `process` calls.
    phase: f64,
    last_sample: i16,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self { from_rate, to_rate, phase: 0.0, last_sample: 0 }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_identity(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Last source sample seen, used by the mixer to synthesize a
    /// fade-out tail without re-resampling stale input.
    pub fn last_input_sample(&self) -> i16 {
        self.last_sample
    }

    /// Resamples `input` to the target rate. Output length is
    /// `round(input.len() * to_rate / from_rate)`.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_identity() {
            self.last_sample = *input.last().unwrap_or(&self.last_sample);
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let ratio = self.from_rate as f64 / self.to_rate as f64;
        let out_len = ((input.len() as f64) * self.to_rate as f64 / self.from_rate as f64).round() as usize;
        let mut out = Vec::with_capacity(out_len);

        for i in 0..out_len {
            let pos = self.phase + i as f64 * ratio;
            let idx = pos.floor() as isize;
            let frac = pos - pos.floor();

            let s0 = if idx < 0 { self.last_sample } else { *input.get(idx as usize).unwrap_or(input.last().unwrap()) };
            let s1 = if idx + 1 < 0 {
                self.last_sample
            } else {
                *input.get((idx + 1) as usize).unwrap_or(input.last().unwrap())
            };
            let interpolated = s0 as f64 + (s1 as f64 - s0 as f64) * frac;
            out.push(interpolated.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }

        self.phase = (self.phase + out_len as f64 * ratio) - input.len() as f64;
        self.last_sample = *input.last().unwrap();
        out
    }
}

/// A resampler per fixed codec rate, keyed by that rate, all converting
/// to/from one shared device rate (spec §3 "per-rate resamplers").
pub struct ResamplerBank {
    device_rate: u32,
    to_device: std::collections::HashMap<u32, Resampler>,
    from_device: std::collections::HashMap<u32, Resampler>,
}

impl ResamplerBank {
    pub fn new(device_rate: u32) -> Self {
        Self { device_rate, to_device: std::collections::HashMap::new(), from_device: std::collections::HashMap::new() }
    }

    pub fn to_device(&mut self, from_rate: u32, input: &[i16]) -> Vec<i16> {
        self.to_device
            .entry(from_rate)
            .or_insert_with(|| Resampler::new(from_rate, self.device_rate))
            .process(input)
    }

    pub fn from_device(&mut self, to_rate: u32, input: &[i16]) -> Vec<i16> {
        self.from_device
            .entry(to_rate)
            .or_insert_with(|| Resampler::new(self.device_rate, to_rate))
            .process(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rate_pair_is_passthrough() {
        let mut r = Resampler::new(8000, 8000);
        assert_eq!(r.process(&[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn upsampling_doubles_length() {
        let mut r = Resampler::new(8000, 16000);
        let input: Vec<i16> = (0..160).map(|i| i as i16 * 10).collect();
        let output = r.process(&input);
        assert_eq!(output.len(), 320);
    }

    #[test]
    fn downsampling_halves_length() {
        let mut r = Resampler::new(16000, 8000);
        let input: Vec<i16> = (0..320).map(|i| i as i16 * 10).collect();
        let output = r.process(&input);
        assert_eq!(output.len(), 160);
    }
}
