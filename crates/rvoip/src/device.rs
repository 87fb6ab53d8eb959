//! The audio device layer is an external collaborator (spec §1: "The audio
//! device layer (microphone/speaker callbacks delivering/requesting PCM at
//! a fixed format)"); this module only fixes the interface the user agent
//! drives it through, plus a silence-in/silence-out reference
//! implementation for the local binary and for tests that don't have a
//! real sound card (spec §5 "Device threads... come from the audio device
//! layer on its own thread(s)").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Delivers captured microphone PCM and requests speaker PCM, both at a
/// fixed device sample rate and frame size. A real implementation wraps a
/// platform sound API; [`NullAudioDevice`] below generates silence on the
/// capture side and discards the speaker side, just enough to drive the
/// send/receive pipeline's timing in tests.
pub trait AudioDeviceSink: Send + Sync {
    /// Called once per device frame with captured microphone PCM.
    fn on_capture_frame(&self, pcm: &[i16]);

    /// Called once per device frame to fill the speaker buffer; the sink
    /// asks its active session(s) to mix `len` samples and plays them.
    fn on_speaker_pull(&self, len: usize);
}

/// Spawns the two device threads (spec §5 "Device threads") driving a sink
/// at a fixed cadence: one microphone thread generating silence frames, one
/// speaker thread pulling mixed audio. Frame size is `device_rate *
/// frame_ms / 1000` samples, matching the codec's native frame time.
pub struct NullAudioDevice {
    shutdown: Arc<AtomicBool>,
    mic_thread: Option<JoinHandle<()>>,
    speaker_thread: Option<JoinHandle<()>>,
}

impl NullAudioDevice {
    pub fn start(sink: Arc<dyn AudioDeviceSink>, device_rate: u32, frame_ms: u32) -> Self {
        let frame_len = (device_rate as usize * frame_ms as usize / 1000).max(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mic_shutdown = shutdown.clone();
        let mic_sink = sink.clone();
        let mic_thread = std::thread::Builder::new()
            .name("rvoip-device-mic".to_string())
            .spawn(move || {
                let silence = vec![0i16; frame_len];
                while !mic_shutdown.load(Ordering::Relaxed) {
                    mic_sink.on_capture_frame(&silence);
                    std::thread::sleep(Duration::from_millis(frame_ms as u64));
                }
            })
            .expect("spawn microphone device thread");

        let speaker_shutdown = shutdown.clone();
        let speaker_thread = std::thread::Builder::new()
            .name("rvoip-device-speaker".to_string())
            .spawn(move || {
                while !speaker_shutdown.load(Ordering::Relaxed) {
                    sink.on_speaker_pull(frame_len);
                    std::thread::sleep(Duration::from_millis(frame_ms as u64));
                }
            })
            .expect("spawn speaker device thread");

        Self { shutdown, mic_thread: Some(mic_thread), speaker_thread: Some(speaker_thread) }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.mic_thread.take() {
            let _ = h.join();
        }
        if let Some(h) = self.speaker_thread.take() {
            let _ = h.join();
        }
    }
}

impl Drop for NullAudioDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
