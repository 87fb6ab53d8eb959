//! User-agent-level errors. The command dispatcher never lets one of these
//! escape across a thread boundary (spec §7 "Propagation"): every command
//! answer always carries a structured `code`/`message` pair instead.

#[derive(Debug, thiserror::Error)]
pub enum UaError {
    #[error("unknown account id {0}")]
    UnknownAccount(u64),

    #[error("unknown session id {0}")]
    UnknownSession(u64),

    #[error("user agent is not started")]
    NotStarted,

    #[error("invalid command field: {0}")]
    InvalidField(&'static str),

    #[error("malformed config patch: {0}")]
    BadConfig(#[from] serde_json::Error),

    #[error("failed to bind the RTP/RTCP port range: {0}")]
    SocketHeap(#[from] std::io::Error),

    #[error(transparent)]
    Session(#[from] rvoip_session_core::SessionError),

    #[error(transparent)]
    SipTypes(#[from] rvoip_sip_types::error::SipTypesError),
}

pub type Result<T> = std::result::Result<T, UaError>;

impl UaError {
    /// Answer `code` for the command/event bus (spec §6); distinct from the
    /// SIP response codes [`rvoip_session_core::SessionError::to_sip_status`]
    /// produces for the signaling side of the same failures.
    pub fn code(&self) -> i64 {
        crate::wire::CODE_ERROR
    }
}
