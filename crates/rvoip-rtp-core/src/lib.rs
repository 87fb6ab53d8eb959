//! RTP/RTCP packet codec, SRTP, the socket heap, and media statistics.
//!
//! This is the RFC 3550/3711 plumbing layer beneath `rvoip-media-core`'s
//! audio pipeline (spec §4.2, §4.4, §4.5): packet framing, key/salt-based
//! protect/unprotect, the port-range allocator with its single I/O thread,
//! and the per-session counters spec §3 and §4.2 define.

pub mod error;
pub mod packet;
pub mod rtcp;
pub mod srtp;
pub mod socket_heap;
pub mod session;
pub mod stats;

pub use error::{RtpError, Result};
pub use packet::{RtpHeader, RtpPacket};
pub use rtcp::{ReceiverReport, ReportBlock, RtcpPacket, SenderReport};
pub use srtp::{SrtpKeySalt, SrtpSession, SrtpSuite};
pub use socket_heap::{SocketHandle, SocketHeap, SocketSink};
pub use session::RtpSession;
pub use stats::SessionStats;
