//! The audio pipeline beneath a session's media streams (spec §2, §4.2-4.3):
//! sliding PCM window, resampler set, mixer, per-SSRC jitter/decode stream,
//! DTMF engine, and the audio stream that wires them to an
//! `rvoip_rtp_core::RtpSession`.

pub mod audio_stream;
pub mod dtmf;
pub mod error;
pub mod mixer;
pub mod receive_stream;
pub mod resample;
pub mod wav;
pub mod window;

pub use audio_stream::AudioStream;
pub use dtmf::{DtmfDigit, DtmfEngine, DtmfMode};
pub use error::{MediaError, Result};
pub use mixer::{ChannelKey, Mixer};
pub use receive_stream::ReceiveStream;
pub use resample::{Resampler, ResamplerBank};
pub use window::SlidingPcmWindow;
