//! Media pipeline errors.

#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("no codec negotiated for this stream")]
    NoCodec,

    #[error("unsupported sample rate pair {from} -> {to}")]
    UnsupportedRatePair { from: u32, to: u32 },

    #[error("mixer is at capacity ({capacity} channels)")]
    MixerFull { capacity: usize },

    #[error("rtp error: {0}")]
    Rtp(#[from] rvoip_rtp_core::RtpError),

    #[error("wav I/O error: {0}")]
    Wav(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;
