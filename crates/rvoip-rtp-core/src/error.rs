//! RTP/RTCP/SRTP/socket-heap errors.

#[derive(Debug, Clone, thiserror::Error)]
pub enum RtpError {
    #[error("packet too short to contain an RTP header")]
    PacketTooShort,

    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),

    #[error("SRTP auth tag mismatch")]
    AuthFailed,

    #[error("SRTP buffer too short for auth tag")]
    BufferTooShortForTag,

    #[error("port range [{start}, {finish}] exhausted after {attempts} attempts")]
    PortRangeExhausted { start: u16, finish: u16, attempts: u32 },

    #[error("socket I/O error: {0}")]
    Io(String),

    #[error("datagram of {size} bytes exceeds MAX_VALID_UDPPACKET_SIZE, dropped")]
    PacketTooLarge { size: usize },
}

pub type Result<T> = std::result::Result<T, RtpError>;
