//! A reference [`DialogHandle`] implementation that wires two in-process
//! [`Session`]s directly together instead of going through a real SIP
//! transaction/dialog layer.
//!
//! `rvoip-session-core`'s `DialogHandle` doc comment calls this out
//! explicitly: "tests and the local reference binary can use a recording
//! stub instead" of the real SIP stack, which is an external collaborator
//! this workspace never implements (spec §1). [`LoopbackBridge`] is that
//! stub, upgraded from merely recording to actually delivering, so the two
//! parties of a call can run the full offer/answer/ICE/RTP pipeline
//! end-to-end in this crate's own tests and in `examples/p2p_call.rs`
//! without a real transport underneath.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use rvoip_session_core::session::Session;
use rvoip_session_core::DialogHandle;
use rvoip_sip_types::sdp::SessionDescription;

/// Which party of a bridged pair a [`LoopbackDialog`] speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// Shared slot pair binding two sessions together. Each side is filled in
/// once, right after its [`Session`] is constructed (mirroring the
/// construction order constraint [`Session::new`] already has: the dialog
/// handle must exist before the session does, so the session itself can't
/// be the one to bind the slot).
#[derive(Default)]
pub struct LoopbackBridge {
    a: Mutex<Option<Weak<Session>>>,
    b: Mutex<Option<Weak<Session>>>,
}

impl LoopbackBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, side: Side, session: &Arc<Session>) {
        let slot = match side {
            Side::A => &self.a,
            Side::B => &self.b,
        };
        *slot.lock() = Some(Arc::downgrade(session));
    }

    fn peer_of(&self, side: Side) -> Option<Arc<Session>> {
        let slot = match side {
            Side::A => &self.b,
            Side::B => &self.a,
        };
        slot.lock().as_ref().and_then(Weak::upgrade)
    }
}

/// One party's [`DialogHandle`], forwarding directly into the other party's
/// [`Session`] through a shared [`LoopbackBridge`].
pub struct LoopbackDialog {
    bridge: Arc<LoopbackBridge>,
    side: Side,
}

impl LoopbackDialog {
    pub fn new(bridge: Arc<LoopbackBridge>, side: Side) -> Arc<Self> {
        Arc::new(Self { bridge, side })
    }
}

impl DialogHandle for LoopbackDialog {
    fn send_offer(&self, sdp: &SessionDescription) {
        if let Some(peer) = self.bridge.peer_of(self.side) {
            if let Err(err) = peer.on_remote_offer(sdp) {
                tracing::warn!(%err, "peer rejected offer delivered over loopback dialog");
            }
        }
    }

    fn send_answer(&self, sdp: &SessionDescription) {
        if let Some(peer) = self.bridge.peer_of(self.side) {
            if let Err(err) = peer.on_remote_answer(sdp) {
                tracing::warn!(%err, "peer rejected answer delivered over loopback dialog");
            }
        }
    }

    fn send_response(&self, code: u16) {
        // A final non-2xx ends the call attempt on both sides; the peer has
        // no separate "received a failure response" entry point, so this
        // collapses to the same outcome a BYE on an early dialog would
        // produce for it.
        if code >= 300 {
            if let Some(peer) = self.bridge.peer_of(self.side) {
                peer.on_remote_terminate();
            }
        }
    }

    fn terminate(&self) {
        if let Some(peer) = self.bridge.peer_of(self.side) {
            peer.on_remote_terminate();
        }
    }
}
