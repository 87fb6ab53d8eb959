//! ICE stream/component model and the agent trait.

use std::net::SocketAddr;

use rvoip_sip_types::sdp::Candidate;

use crate::error::Result;

/// Identifies one ICE stream — 1:1 with a media line (spec §4.1 "ICE binding").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u32);

/// Identifies one transport flow within a stream: RTP and RTCP are distinct
/// components unless `rtcp-mux` collapses them into one (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u8);

impl ComponentId {
    pub const RTP: ComponentId = ComponentId(1);
    pub const RTCP: ComponentId = ComponentId(2);
}

/// Local identity of one ICE stream: credentials plus gathered candidates.
#[derive(Debug, Clone, Default)]
pub struct IceStream {
    pub ufrag: String,
    pub pwd: String,
}

/// Results the agent reports back asynchronously, matching spec §4.6:
/// `on_gathered`, `on_success`, `on_failed`.
#[derive(Debug, Clone)]
pub enum IceEvent {
    /// Candidate gathering finished (or its timeout expired) for a stream.
    GatheringComplete { stream: StreamId },
    /// Connectivity checks nominated a nominated pair for a component.
    ConnectivityEstablished {
        stream: StreamId,
        component: ComponentId,
        remote: SocketAddr,
    },
    /// All candidate pairs for a stream failed to validate.
    ConnectivityFailed { stream: StreamId },
}

/// Receives asynchronous ICE results. Implemented by the session state
/// machine; called on whatever thread the agent's own worker runs on — spec
/// §5 requires sinks not take the session graph's write lock directly, so
/// implementations should enqueue work rather than mutate in place.
pub trait IceEventSink: Send + Sync {
    fn on_ice_event(&self, event: IceEvent);
}

/// The contract spec §4.6 describes: add_stream → add_component →
/// gather_candidates → (async) on_gathered → fill_candidate_list →
/// process_sdp_offer → check_connectivity → on_success/on_failed.
pub trait IceAgent: Send + Sync {
    /// Allocates a new ICE stream and returns its id.
    fn add_stream(&self) -> StreamId;

    /// Registers the local RTP/RTCP ports to bind candidates to, returning
    /// the RTP component id (RTCP gets the next one unless multiplexed).
    fn add_component(&self, stream: StreamId, local_port4: u16, local_port6: Option<u16>) -> Result<ComponentId>;

    /// Starts asynchronous candidate gathering; completion is reported via
    /// [`IceEventSink::on_ice_event`] as [`IceEvent::GatheringComplete`].
    fn gather_candidates(&self, stream: StreamId);

    /// Returns the local candidate lines to place in outbound SDP.
    fn fill_candidate_list(&self, stream: StreamId, component: ComponentId) -> Result<Vec<Candidate>>;

    /// Local ufrag/pwd to advertise in SDP for this stream.
    fn local_credentials(&self, stream: StreamId) -> Result<(String, String)>;

    /// Feeds the peer's offered candidates and default address into the
    /// stream, detecting an ICE restart via ufrag/pwd mismatch.
    fn process_sdp_offer(
        &self,
        stream: StreamId,
        remote_ufrag: &str,
        remote_pwd: &str,
        remote_candidates: &[Candidate],
        default_ip: &str,
        default_port: u16,
        defer_relayed: bool,
    ) -> Result<()>;

    /// Starts connectivity checks; results are reported via
    /// [`IceEvent::ConnectivityEstablished`] / [`IceEvent::ConnectivityFailed`].
    fn check_connectivity(&self, stream: StreamId);

    /// The nominated remote pair for a component, once established.
    fn remote_address(&self, stream: StreamId, component: ComponentId) -> Option<SocketAddr>;

    /// Forces a credential (and so ICE) restart on the next gather/offer.
    fn refresh_pwd_ufrag(&self, stream: StreamId);

    /// Tears down a stream (its components, candidates, checks).
    fn remove_stream(&self, stream: StreamId);
}
