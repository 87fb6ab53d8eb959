//! The ICE engine contract of spec §4.6.
//!
//! The real ICE engine (STUN/TURN transactions, consent freshness, candidate
//! priority ordering per RFC 8445) is an external collaborator — this crate
//! only fixes the *interface* [`rvoip-session-core`] drives it through:
//! stream/component ids, candidate SDP attributes, remote password/ufrag,
//! and gather/check result callbacks. [`HostOnlyIceAgent`] is a reference
//! implementation (host candidates only, no STUN/TURN) sufficient to drive
//! the session state machine end to end in tests and in deployments with no
//! NAT to traverse.

mod agent;
mod error;
mod host_only;

pub use agent::{
    ComponentId, IceAgent, IceEvent, IceEventSink, IceStream, StreamId,
};
pub use error::{IceError, Result};
pub use host_only::HostOnlyIceAgent;

pub use rvoip_sip_types::sdp::Candidate;
