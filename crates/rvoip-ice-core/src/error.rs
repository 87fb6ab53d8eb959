//! ICE adapter errors.

#[derive(Debug, Clone, thiserror::Error)]
pub enum IceError {
    #[error("unknown ICE stream {0:?}")]
    UnknownStream(crate::agent::StreamId),

    #[error("unknown ICE component {0:?} on stream {1:?}")]
    UnknownComponent(crate::agent::ComponentId, crate::agent::StreamId),

    #[error("no remote candidates offered for stream {0:?}")]
    NoRemoteCandidates(crate::agent::StreamId),
}

pub type Result<T> = std::result::Result<T, IceError>;
