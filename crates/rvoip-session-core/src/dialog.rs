//! The SIP signaling collaborator: transaction/dialog
//! handling, header parsing, and retransmission timers are someone else's
//! problem entirely. This crate only fixes the handful of operations the
//! session state machine drives it through — offer, answer, final response,
//! and teardown — mirroring the narrow adapter-trait shape
//! [`rvoip_ice_core::IceAgent`] uses for the ICE engine.

use rvoip_sip_types::sdp::SessionDescription;

/// One session's signaling leg. A real implementation sits on top of a SIP
/// transaction/dialog layer (INVITE, re-INVITE, BYE, response codes); tests
/// and the local reference binary can use a recording stub instead.
pub trait DialogHandle: Send + Sync {
    /// Sends an INVITE or re-INVITE carrying `sdp` as the offer.
    fn send_offer(&self, sdp: &SessionDescription);

    /// Sends a 2xx response carrying `sdp` as the answer.
    fn send_answer(&self, sdp: &SessionDescription);

    /// Sends a final non-2xx response with no body (reject/failure).
    fn send_response(&self, code: u16);

    /// Sends a BYE (or equivalent) and releases the dialog.
    fn terminate(&self);
}
