//! Session-core errors for session-level (rather than packet-level) failures.

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("operation not legal in state {state}")]
    InvalidState { state: &'static str },

    #[error("session already terminated")]
    AlreadyTerminated,

    #[error("no common codec with peer")]
    NoCommonCodec,

    #[error("media socket allocation failed: {0}")]
    SocketAllocationFailed(String),

    #[error("SDP offer/answer is missing required connection information")]
    MissingConnectionInfo,

    #[error("unknown account id {0}")]
    UnknownAccount(u64),

    #[error("unknown session id {0}")]
    UnknownSession(u64),

    /// The peer's answer named a crypto tag/suite this session never
    /// offered — a broken or hostile answer, not a negotiation failure.
    #[error("peer's SDP answer selected an SRTP suite we did not offer")]
    NoCommonCryptoSuite,

    #[error(transparent)]
    Ice(#[from] rvoip_ice_core::IceError),

    #[error(transparent)]
    Media(#[from] rvoip_media_core::MediaError),

    #[error(transparent)]
    SipTypes(#[from] rvoip_sip_types::error::SipTypesError),

    #[error(transparent)]
    Rtp(#[from] rvoip_rtp_core::RtpError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Maps a session-establishment failure to the SIP answer code policy
    /// of spec §4.1 ("no compatible codec... 488... socket allocation
    /// fails... 503... otherwise 200").
    pub fn to_sip_status(&self) -> u16 {
        match self {
            SessionError::NoCommonCodec => 488,
            SessionError::NoCommonCryptoSuite => 488,
            SessionError::SocketAllocationFailed(_) => 503,
            SessionError::MissingConnectionInfo => 488,
            _ => 500,
        }
    }
}
