//! Codec errors.

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("no codec overlaps local priority list and remote offer")]
    NoCommonCodec,

    #[error("decode failed: {0}")]
    DecodeFailed(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
