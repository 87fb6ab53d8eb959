//! A [`DialogHandle`] that goes nowhere: it records what the session asked
//! the (absent) SIP transport to send, for inspection, and logs the rest.
//! This is the default dialog for sessions created straight off the JSON
//! command bus with no peer [`crate::agent::UserAgent`] to bridge to —
//! useful for exercising the offer/answer and ICE/RTP state machine in
//! isolation (spec §8 scenario 1-3 only need the local side's behavior).

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use parking_lot::Mutex;

use rvoip_session_core::DialogHandle;
use rvoip_sip_types::sdp::SessionDescription;

#[derive(Default)]
pub struct NullDialogHandle {
    last_offer: Mutex<Option<SessionDescription>>,
    last_answer: Mutex<Option<SessionDescription>>,
    last_response: AtomicU16,
    terminated: AtomicBool,
}

impl NullDialogHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_offer(&self) -> Option<SessionDescription> {
        self.last_offer.lock().clone()
    }

    pub fn last_answer(&self) -> Option<SessionDescription> {
        self.last_answer.lock().clone()
    }

    pub fn last_response(&self) -> Option<u16> {
        match self.last_response.load(Ordering::SeqCst) {
            0 => None,
            code => Some(code),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl DialogHandle for NullDialogHandle {
    fn send_offer(&self, sdp: &SessionDescription) {
        tracing::debug!(%sdp, "no SIP transport attached: offer not sent anywhere");
        *self.last_offer.lock() = Some(sdp.clone());
    }

    fn send_answer(&self, sdp: &SessionDescription) {
        tracing::debug!(%sdp, "no SIP transport attached: answer not sent anywhere");
        *self.last_answer.lock() = Some(sdp.clone());
    }

    fn send_response(&self, code: u16) {
        self.last_response.store(code, Ordering::SeqCst);
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}
