//! N-input PCM mixer with per-input fade-out and active-channel counting
//! (spec §4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{MediaError, Result};
use crate::resample::Resampler;

/// Samples a fade-out envelope ramps over once a channel goes inactive with
/// `fade_out` requested (grounded in the teacher's mixer fade-out window,
/// sized to ~10ms at 8kHz so a click never escapes the envelope).
const FADE_OUT_SAMPLES: usize = 80;

/// Key identifying one mixer input: the owning audio stream (by an opaque
/// context id, typically its session/stream index) and the RTP SSRC feeding
/// it. `unregister_channel` evicts every channel sharing a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub context: u64,
    pub ssrc: u32,
}

struct Channel {
    resampler: Resampler,
    active: bool,
    fade_out: bool,
    fade_remaining: usize,
    last_touched: u64,
}

/// Fixed-capacity PCM summation mixer. `add_pcm` feeds one channel's worth
/// of samples (already at the channel's native rate; the mixer resamples to
/// device rate itself); `mix_and_get_pcm` drains the summed output.
pub struct Mixer {
    capacity: usize,
    device_rate: u32,
    channels: Mutex<HashMap<ChannelKey, Channel>>,
    accumulator: Mutex<Vec<i32>>,
    active_count: AtomicUsize,
    clock: AtomicUsize,
}

impl Mixer {
    pub fn new(capacity: usize, device_rate: u32) -> Self {
        Self {
            capacity,
            device_rate,
            channels: Mutex::new(HashMap::new()),
            accumulator: Mutex::new(Vec::new()),
            active_count: AtomicUsize::new(0),
            clock: AtomicUsize::new(0),
        }
    }

    pub fn active_channel_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Feeds PCM from one channel. Allocates the channel on first use,
    /// evicting the least-recently-touched inactive channel if the mixer
    /// is already at capacity.
    pub fn add_pcm(&self, key: ChannelKey, pcm: &[i16], rate: u32, fade_out: bool) -> Result<()> {
        let now = self.clock.fetch_add(1, Ordering::Relaxed) as u64;
        let resampled = {
            let mut channels = self.channels.lock();
            if !channels.contains_key(&key) {
                if channels.len() >= self.capacity {
                    self.evict_lru_inactive(&mut channels)?;
                }
                channels.insert(
                    key,
                    Channel {
                        resampler: Resampler::new(rate, self.device_rate),
                        active: true,
                        fade_out: false,
                        fade_remaining: 0,
                        last_touched: now,
                    },
                );
                self.active_count.fetch_add(1, Ordering::Relaxed);
            }
            let channel = channels.get_mut(&key).unwrap();
            if !channel.active {
                self.active_count.fetch_add(1, Ordering::Relaxed);
            }
            channel.active = true;
            channel.fade_out = fade_out;
            channel.last_touched = now;
            channel.resampler.process(pcm)
        };

        let mut acc = self.accumulator.lock();
        if acc.len() < resampled.len() {
            acc.resize(resampled.len(), 0);
        }
        for (slot, sample) in acc.iter_mut().zip(resampled.iter()) {
            *slot += *sample as i32;
        }
        Ok(())
    }

    /// Marks a channel inactive. If `fade_out` was requested on its last
    /// `add_pcm`, writes a linear ramp from its last known amplitude down
    /// to zero over [`FADE_OUT_SAMPLES`] directly into the accumulator so
    /// the channel doesn't cut out abruptly (spec §4.3, grounded in the
    /// teacher's fade-out counter).
    pub fn mark_inactive(&self, key: ChannelKey) {
        let mut channels = self.channels.lock();
        let Some(channel) = channels.get_mut(&key) else { return };
        if channel.active {
            self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
        channel.active = false;

        if channel.fade_out {
            channel.fade_remaining = FADE_OUT_SAMPLES;
            let start = channel.resampler.last_input_sample() as f64;
            drop(channels);

            let mut acc = self.accumulator.lock();
            if acc.len() < FADE_OUT_SAMPLES {
                acc.resize(FADE_OUT_SAMPLES, 0);
            }
            for i in 0..FADE_OUT_SAMPLES {
                let gain = 1.0 - (i as f64 / FADE_OUT_SAMPLES as f64);
                acc[i] += (start * gain).round() as i32;
            }
        }
    }

    /// Removes every channel owned by `context` (call before dropping the
    /// owning audio stream, spec §4.3).
    pub fn unregister_channel(&self, context: u64) {
        let mut channels = self.channels.lock();
        channels.retain(|key, channel| {
            let keep = key.context != context;
            if !keep && channel.active {
                self.active_count.fetch_sub(1, Ordering::Relaxed);
            }
            keep
        });
    }

    fn evict_lru_inactive(&self, channels: &mut HashMap<ChannelKey, Channel>) -> Result<()> {
        let victim = channels
            .iter()
            .filter(|(_, c)| !c.active)
            .min_by_key(|(_, c)| c.last_touched)
            .map(|(k, _)| *k);
        match victim {
            Some(key) => {
                channels.remove(&key);
                Ok(())
            }
            None => Err(MediaError::MixerFull { capacity: self.capacity }),
        }
    }

    /// Drains `len` samples of mixed PCM, clamped to int16 range with
    /// saturation (never wrap-around, spec §8). Silence when no input has
    /// contributed yet.
    pub fn mix_and_get_pcm(&self, len: usize) -> Vec<i16> {
        let mut acc = self.accumulator.lock();
        if acc.len() < len {
            acc.resize(len, 0);
        }
        let out: Vec<i16> = acc[..len].iter().map(|&s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16).collect();
        acc.drain(..len);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_when_no_channel_has_contributed() {
        let mixer = Mixer::new(4, 8000);
        assert_eq!(mixer.mix_and_get_pcm(4), vec![0, 0, 0, 0]);
    }

    #[test]
    fn sums_two_equal_amplitude_channels_without_wraparound() {
        let mixer = Mixer::new(4, 8000);
        let a = ChannelKey { context: 1, ssrc: 100 };
        let b = ChannelKey { context: 1, ssrc: 200 };
        mixer.add_pcm(a, &[20000, 20000], 8000, false).unwrap();
        mixer.add_pcm(b, &[20000, 20000], 8000, false).unwrap();
        let out = mixer.mix_and_get_pcm(2);
        // 40000 would overflow i16; must saturate at i16::MAX, never wrap negative.
        assert_eq!(out, vec![i16::MAX, i16::MAX]);
    }

    #[test]
    fn evicts_inactive_channel_when_full() {
        let mixer = Mixer::new(1, 8000);
        let a = ChannelKey { context: 1, ssrc: 1 };
        let b = ChannelKey { context: 1, ssrc: 2 };
        mixer.add_pcm(a, &[1, 2], 8000, false).unwrap();
        mixer.mark_inactive(a);
        mixer.add_pcm(b, &[3, 4], 8000, false).unwrap();
        assert_eq!(mixer.active_channel_count(), 1);
    }

    #[test]
    fn full_mixer_with_all_channels_active_errors() {
        let mixer = Mixer::new(1, 8000);
        let a = ChannelKey { context: 1, ssrc: 1 };
        let b = ChannelKey { context: 1, ssrc: 2 };
        mixer.add_pcm(a, &[1], 8000, false).unwrap();
        assert!(mixer.add_pcm(b, &[1], 8000, false).is_err());
    }

    #[test]
    fn unregister_channel_drops_all_channels_for_context() {
        let mixer = Mixer::new(4, 8000);
        let a = ChannelKey { context: 7, ssrc: 1 };
        let b = ChannelKey { context: 7, ssrc: 2 };
        mixer.add_pcm(a, &[1], 8000, false).unwrap();
        mixer.add_pcm(b, &[1], 8000, false).unwrap();
        mixer.unregister_channel(7);
        assert_eq!(mixer.active_channel_count(), 0);
    }
}
