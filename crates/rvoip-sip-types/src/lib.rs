//! SIP URI and SDP offer/answer types.
//!
//! This crate owns only the *data* consumed and produced across the
//! signaling boundary the session state machine sits behind: SIP addresses
//! and SDP bodies. It deliberately does not implement a transaction/dialog
//! state machine, transport, or retransmission timers — those belong to the
//! SIP signaling transport collaborator that `rvoip-session-core` treats as
//! external (see spec §1).

pub mod error;
pub mod uri;
pub mod sdp;

pub use error::{SipTypesError, Result};
pub use uri::SipUri;
pub use sdp::{
    SessionDescription, Origin, ConnectionInfo, MediaDescription, MediaDirection,
    Candidate, CandidateType, CryptoSuite, CryptoAttribute, RtpProfile,
};
