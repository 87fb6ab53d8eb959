//! The session state machine, the focus of this crate: it binds
//! one SIP dialog to its ICE stream and RTP media path, driving offer/answer
//! negotiation, codec and SRTP suite selection, and the established/
//! terminated lifecycle.
//!
//! Locking discipline: [`HostOnlyIceAgent::gather_candidates`] and
//! `check_connectivity` call back into this session's [`IceEventSink`] impl
//! synchronously, on the caller's own stack. Rather than the single
//! recursive lock protecting the whole session graph,
//! state here is split across independent `Mutex`/atomic fields so no lock
//! is ever held across a call into `self.ice`, `self.dialog`, or
//! `self.sink` — the same reason [`Session`] reaches `self.ice` only through
//! a `Weak` self-reference ([`SessionIceSink`]) instead of the recursive
//! `Arc` cycle a naive port of that design would produce.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::RngCore;

use rvoip_codec_core::registry::{CodecFactory, CodecRegistry};
use rvoip_ice_core::{ComponentId, IceAgent, IceEvent, IceEventSink, StreamId};
use rvoip_media_core::{AudioStream, DtmfDigit, DtmfMode, Mixer};
use rvoip_rtp_core::session::RtpSession;
use rvoip_rtp_core::socket_heap::{Family, Multiplex, SocketHandle, SocketHeap, SocketSink};
use rvoip_rtp_core::srtp::{decode_key_salt, encode_key_salt, SrtpKeySalt, SrtpSession, SrtpSuite};
use rvoip_rtp_core::stats::StatsSnapshot;
use rvoip_sip_types::sdp::{
    AddrType, ConnectionInfo, CryptoAttribute, CryptoSuite, MediaDescription, MediaDirection, Origin,
    RtpProfile, SessionDescription,
};
use rvoip_sip_types::uri::SipUri;

use crate::config::MasterProfile;
use crate::dialog::DialogHandle;
use crate::error::{Result, SessionError};
use crate::provider::{AudioProvider, MediaProvider};

/// Telephone-event payload type this stack advertises for RFC 2833 DTMF.
/// Not in the dynamic range conflict with a second audio codec in practice
/// since only one audio codec is active per call (the static priority
/// list picks exactly one).
const TELEPHONE_EVENT_PT: u8 = 101;

/// Rough ITU-T G.107 R-factor baseline used for MOS estimation. G.711 is
/// effectively transparent at the codec layer, so
/// this is the commonly cited baseline R for an otherwise lossless path.
const DEFAULT_CODEC_R_FACTOR: f64 = 93.2;

/// Which side of the offer/answer exchange this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// This session originates the initial offer.
    Initiator,
    /// This session answers an offer it did not originate.
    Acceptor,
}

/// The session's lifecycle state. Two state-machine shapes unified into one
/// enum: `Offering`/`Early` only ever occur for [`SessionRole::Initiator`],
/// `Offered`/`Accepting` only for [`SessionRole::Acceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Offering,
    Early,
    Offered,
    Accepting,
    Connected,
    Terminated,
}

/// What established connectivity for the active media path: a no-ICE call
/// reaches `Connected` off the SIP answer alone, an ICE call waits for a
/// nominated pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishedKind {
    Sip,
    Ice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatedReason {
    LocalBye,
    RemoteBye,
    Rejected(u16),
    Error,
}

/// Notifications the session pushes up to its owner (an account/UA layer,
/// or a command/event bus fronting it).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Established { session_id: u64, kind: EstablishedKind },
    ConnectivityFailed { session_id: u64 },
    Terminated { session_id: u64, reason: TerminatedReason },
    /// A REFER landed on this dialog. Spec §1 Non-goals: "no call transfer
    /// logic beyond propagating REFER to the application" — the session
    /// does nothing but hand this upward.
    Referred { session_id: u64, target: SipUri, refer_id: Option<String> },
}

pub trait SessionEventSink: Send + Sync {
    fn on_session_event(&self, event: SessionEvent);
}

/// State for one media line. One per session for
/// now — multiple `m=` lines would just mean a longer `Vec`.
pub struct MediaStream {
    provider: Option<Arc<dyn MediaProvider>>,
    audio_stream: Option<Arc<AudioStream>>,
    codec: Option<Arc<dyn CodecFactory>>,

    ice_stream: Option<StreamId>,
    rtp_component: Option<ComponentId>,
    rtcp_component: Option<ComponentId>,
    rtp_socket: Option<SocketHandle>,
    rtcp_socket: Option<SocketHandle>,
    local_rtp_port: u16,
    local_rtcp_port: u16,

    direction: MediaDirection,

    /// Crypto suites/keys this session offered, keyed by the tag it used,
    /// so the answer can be matched back to the local key once the peer
    /// picks one.
    pending_local_crypto: Vec<(u32, SrtpSuite, SrtpKeySalt)>,
    /// The suite/key this session chose when answering an SRTP offer,
    /// carried forward into the answer's `a=crypto` line.
    answer_crypto: Option<(u32, CryptoSuite, SrtpKeySalt)>,
}

impl MediaStream {
    fn placeholder() -> Self {
        Self {
            provider: None,
            audio_stream: None,
            codec: None,
            ice_stream: None,
            rtp_component: None,
            rtcp_component: None,
            rtp_socket: None,
            rtcp_socket: None,
            local_rtp_port: 0,
            local_rtcp_port: 0,
            direction: MediaDirection::SendRecv,
            pending_local_crypto: Vec::new(),
            answer_crypto: None,
        }
    }
}

/// Forwards ICE events into a [`Session`] without holding a strong
/// reference to it — the session owns its ICE agent, so the agent's sink
/// must not own the session back.
struct SessionIceSink(Weak<Session>);

impl IceEventSink for SessionIceSink {
    fn on_ice_event(&self, event: IceEvent) {
        if let Some(session) = self.0.upgrade() {
            session.on_ice_event(event);
        }
    }
}

/// Demuxes datagrams the socket heap read off this stream's RTP/RTCP
/// socket(s) to whatever provider currently owns the stream. Looked up
/// through a `Weak<Session>` for the same reason [`SessionIceSink`] is.
struct MediaSocketSink {
    session: Weak<Session>,
    stream_index: usize,
}

impl SocketSink for MediaSocketSink {
    fn on_received_data(&self, _handle: SocketHandle, src: SocketAddr, data: &[u8]) {
        let Some(session) = self.session.upgrade() else { return };
        if !rvoip_rtp_core::packet::looks_like_rtp_or_rtcp(data) {
            // A real ICE engine processes STUN binding requests/responses
            // over this same socket; the host-only reference agent never
            // sends any, so anything else here is noise.
            tracing::trace!(%src, len = data.len(), "dropping non-RTP/RTCP datagram on media socket");
            return;
        }
        let provider = session.streams.lock().get(self.stream_index).and_then(|s| s.provider.clone());
        if let Some(provider) = provider {
            provider.on_incoming_datagram(src, data);
        }
    }
}

/// One SIP user-agent session: a signaling dialog bound to an ICE stream
/// and a media provider, driven through the offer/answer lifecycle.
pub struct Session {
    id: u64,
    account_id: u64,
    role: SessionRole,
    self_weak: Weak<Session>,

    local_uri: SipUri,
    local_ip: String,
    remote_uri: Mutex<Option<SipUri>>,

    state: Mutex<SessionState>,
    terminated: AtomicBool,

    origin: Mutex<Origin>,
    /// The highest `o=` `sess-version` seen from the peer: a retransmitted
    /// offer at the same
    /// version re-sends the last answer rather than renegotiating.
    remote_origin_version: AtomicU64,
    last_answer: Mutex<Option<SessionDescription>>,

    /// Gates re-offers so at most one is ever outstanding at a time.
    has_to_send_offer: AtomicBool,
    awaiting_gather_for_offer: AtomicBool,
    gather_complete: AtomicBool,
    /// Set once the application (or, for a re-offer, this session itself)
    /// is ready to answer; the answer fires once this and
    /// `gather_complete` (when ICE is enabled) both hold.
    user_ready: AtomicBool,

    streams: Mutex<Vec<MediaStream>>,

    ice: Arc<dyn IceAgent>,
    dialog: Arc<dyn DialogHandle>,
    socket_heap: Arc<SocketHeap>,
    codecs: Arc<CodecRegistry>,
    config: Arc<MasterProfile>,
    mixer: Arc<Mixer>,
    sink: Arc<dyn SessionEventSink>,

    /// Cumulative stats baseline carried across `refresh_media_path`
    /// so counters continue across a network-path change instead of resetting.
    stats_baseline: Mutex<Option<StatsSnapshot>>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        account_id: u64,
        role: SessionRole,
        local_uri: SipUri,
        local_ip: String,
        config: Arc<MasterProfile>,
        codecs: Arc<CodecRegistry>,
        socket_heap: Arc<SocketHeap>,
        dialog: Arc<dyn DialogHandle>,
        mixer: Arc<Mixer>,
        sink: Arc<dyn SessionEventSink>,
    ) -> Arc<Session> {
        let mut sess_id_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut sess_id_bytes);

        Arc::new_cyclic(|weak| {
            let ice: Arc<dyn IceAgent> =
                Arc::new(rvoip_ice_core::HostOnlyIceAgent::new(local_ip.clone(), Arc::new(SessionIceSink(weak.clone()))));

            Session {
                id,
                account_id,
                role,
                self_weak: weak.clone(),
                local_uri,
                local_ip: local_ip.clone(),
                remote_uri: Mutex::new(None),
                state: Mutex::new(SessionState::Created),
                terminated: AtomicBool::new(false),
                origin: Mutex::new(Origin {
                    username: "-".to_string(),
                    sess_id: u64::from_be_bytes(sess_id_bytes),
                    sess_version: 0,
                    addr_type: AddrType::Ip4,
                    address: local_ip,
                }),
                remote_origin_version: AtomicU64::new(0),
                last_answer: Mutex::new(None),
                has_to_send_offer: AtomicBool::new(false),
                awaiting_gather_for_offer: AtomicBool::new(false),
                gather_complete: AtomicBool::new(false),
                user_ready: AtomicBool::new(false),
                streams: Mutex::new(Vec::new()),
                ice,
                dialog,
                socket_heap,
                codecs,
                config,
                mixer,
                sink,
                stats_baseline: Mutex::new(None),
            }
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn account_id(&self) -> u64 {
        self.account_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn remote_uri(&self) -> Option<SipUri> {
        self.remote_uri.lock().clone()
    }

    // ---- Initiator API --------------------------------------------------

    /// Starts an outgoing session to `peer` (Created -> Offering). The offer
    /// is built and handed to the dialog layer once
    /// ICE gathering completes, or immediately if ICE is disabled.
    pub fn start(&self, peer: SipUri) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, SessionState::Created) {
                return Err(SessionError::InvalidState { state: "Created" });
            }
            *state = SessionState::Offering;
        }
        *self.remote_uri.lock() = Some(peer);

        self.allocate_media_stream()?;

        if self.config.ice_enabled {
            self.awaiting_gather_for_offer.store(true, Ordering::SeqCst);
            if let Some(stream_id) = self.stream_ice_id(0) {
                self.ice.gather_candidates(stream_id);
            }
        } else {
            self.schedule_offer()?;
        }
        Ok(())
    }

    // ---- Acceptor API -----------------------------------------------------

    /// Processes an incoming offer or re-offer (Created -> Offered on the
    /// first one; any later one renegotiates in place).
    pub fn on_remote_offer(&self, remote: &SessionDescription) -> Result<()> {
        let last_remote_version = self.remote_origin_version.load(Ordering::SeqCst);
        let incoming_version = remote.origin.sess_version;
        let seen_before = self.remote_origin_version.swap(incoming_version, Ordering::SeqCst) != 0
            || last_remote_version != 0;

        if seen_before && incoming_version == last_remote_version {
            // Retransmission at an unchanged version: resend the standing
            // answer rather than renegotiating: a non-decreasing peer version
            // that repeats means nothing changed.
            if let Some(prev) = self.last_answer.lock().clone() {
                self.dialog.send_answer(&prev);
            }
            return Ok(());
        }

        let is_first_offer = matches!(*self.state.lock(), SessionState::Created);
        if is_first_offer {
            *self.state.lock() = SessionState::Offered;
        }

        let media = remote.media.first().ok_or(SessionError::MissingConnectionInfo)?;
        if media.is_rejected() {
            self.release_stream(0);
            return Ok(());
        }

        let stream_idx = self.allocate_media_stream()?;
        let remote_ip = media
            .connection
            .as_ref()
            .or(remote.connection.as_ref())
            .ok_or(SessionError::MissingConnectionInfo)?
            .address
            .clone();

        let codec = self.codecs.negotiate(&media.payload_types).ok_or(SessionError::NoCommonCodec)?;
        let srtp = if matches!(media.profile, RtpProfile::Savp) {
            Some(self.finalize_srtp_as_acceptor(stream_idx, media)?)
        } else {
            None
        };
        self.finalize_rtp_and_provider(stream_idx, codec)?;

        if self.config.ice_enabled {
            if let Some(stream_id) = self.stream_ice_id(stream_idx) {
                self.ice.process_sdp_offer(
                    stream_id,
                    media.ice_ufrag.as_deref().unwrap_or(""),
                    media.ice_pwd.as_deref().unwrap_or(""),
                    &media.candidates,
                    &remote_ip,
                    media.port,
                    self.config.defer_relayed_candidates,
                )?;
            }
        } else {
            self.set_remote_rtp_address(stream_idx, &remote_ip, media.port)?;
        }
        let _ = srtp;

        if !is_first_offer {
            // Re-offers auto-answer once ICE/codec state is ready; only the
            // initial offer waits on an explicit `accept()`.
            self.user_ready.store(true, Ordering::SeqCst);
        }

        if self.config.ice_enabled {
            if let Some(stream_id) = self.stream_ice_id(stream_idx) {
                self.ice.gather_candidates(stream_id);
            }
        } else {
            self.maybe_finish_answer();
        }
        Ok(())
    }

    /// Accepts an offer left pending in [`SessionState::Offered`]
    /// (Offered -> Accepting -> Connected).
    pub fn accept(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, SessionState::Offered) {
                return Err(SessionError::InvalidState { state: "Offered" });
            }
            *state = SessionState::Accepting;
        }
        self.user_ready.store(true, Ordering::SeqCst);
        self.maybe_finish_answer();
        Ok(())
    }

    /// Rejects an offer pending in `Offered`/`Early` with a final response
    /// code; this is the application-driven rejection, e.g. 486 Busy Here.
    pub fn reject(&self, code: u16) -> Result<()> {
        {
            let state = *self.state.lock();
            if !matches!(state, SessionState::Offered | SessionState::Early) {
                return Err(SessionError::InvalidState { state: "Offered or Early" });
            }
        }
        self.dialog.send_response(code);
        self.force_terminate(TerminatedReason::Rejected(code));
        Ok(())
    }

    // ---- Shared API -------------------------------------------------------

    /// Processes the peer's answer to an offer this session sent
    /// (Offering/Early -> Connected).
    pub fn on_remote_answer(&self, remote: &SessionDescription) -> Result<()> {
        self.remote_origin_version.store(remote.origin.sess_version, Ordering::SeqCst);

        let media = remote.media.first().ok_or(SessionError::MissingConnectionInfo)?;
        if media.is_rejected() {
            self.release_stream(0);
            self.has_to_send_offer.store(false, Ordering::SeqCst);
            return Ok(());
        }

        let remote_ip = media
            .connection
            .as_ref()
            .or(remote.connection.as_ref())
            .ok_or(SessionError::MissingConnectionInfo)?
            .address
            .clone();

        let codec = self.codecs.negotiate(&media.payload_types).ok_or(SessionError::NoCommonCodec)?;
        if matches!(media.profile, RtpProfile::Savp) {
            let srtp = self.finalize_srtp_as_offerer(0, media)?;
            self.finalize_rtp_with_srtp(0, codec, Some(srtp))?;
        } else {
            self.finalize_rtp_and_provider(0, codec)?;
        }

        if self.config.ice_enabled {
            if let Some(stream_id) = self.stream_ice_id(0) {
                self.ice.process_sdp_offer(
                    stream_id,
                    media.ice_ufrag.as_deref().unwrap_or(""),
                    media.ice_pwd.as_deref().unwrap_or(""),
                    &media.candidates,
                    &remote_ip,
                    media.port,
                    self.config.defer_relayed_candidates,
                )?;
                self.ice.check_connectivity(stream_id);
            } else {
                self.set_remote_rtp_address(0, &remote_ip, media.port)?;
                self.mark_established(EstablishedKind::Sip);
            }
        } else {
            self.set_remote_rtp_address(0, &remote_ip, media.port)?;
            self.mark_established(EstablishedKind::Sip);
        }

        self.has_to_send_offer.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Ends the session locally (any state -> Terminated). Idempotent.
    pub fn stop(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = SessionState::Terminated;
        self.release_providers();
        self.free_all_sockets();
        if let Some(id) = self.stream_ice_id(0) {
            self.ice.remove_stream(id);
        }
        self.dialog.terminate();
        self.sink.on_session_event(SessionEvent::Terminated { session_id: self.id, reason: TerminatedReason::LocalBye });
    }

    /// Records the peer having torn down the dialog (BYE) without sending
    /// one ourselves.
    pub fn on_remote_terminate(&self) {
        self.force_terminate(TerminatedReason::RemoteBye);
    }

    /// A REFER arrived for this dialog. Per spec §1 Non-goals this session
    /// does no transfer logic of its own (no new INVITE to `target`, no
    /// NOTIFY bookkeeping) — it only forwards the request to whoever owns
    /// it, once, as a [`SessionEvent::Referred`]. A terminated session
    /// drops the REFER silently, same as every other post-terminate call.
    pub fn on_remote_refer(&self, target: SipUri, refer_id: Option<String>) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        self.sink.on_session_event(SessionEvent::Referred { session_id: self.id, target, refer_id });
    }

    /// Disables the send direction and re-offers: hold via `a=recvonly`,
    /// the receive side keeps running.
    pub fn pause(&self) -> Result<()> {
        self.set_stream_direction(|d| d.with_send_disabled())
    }

    /// Re-enables the send direction and re-offers.
    pub fn resume(&self) -> Result<()> {
        self.set_stream_direction(|d| d.with_send_enabled())
    }

    /// Reallocates the media socket pair and ICE candidates in place after a
    /// network change: statistics counters are carried
    /// forward rather than reset.
    pub fn refresh_media_path(&self) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyTerminated);
        }
        if let Some(snapshot) = self.streams.lock().first().and_then(|s| s.provider.clone()).map(|p| p.statistics()) {
            self.merge_stats_baseline(snapshot);
        }

        self.free_all_sockets();
        if let Some(id) = self.stream_ice_id(0) {
            self.ice.remove_stream(id);
        }
        self.streams.lock().clear();
        self.allocate_media_stream()?;

        if self.config.ice_enabled {
            if let Some(id) = self.stream_ice_id(0) {
                self.ice.refresh_pwd_ufrag(id);
                self.awaiting_gather_for_offer.store(true, Ordering::SeqCst);
                self.ice.gather_candidates(id);
            }
        } else {
            self.schedule_offer()?;
        }
        Ok(())
    }

    pub fn queue_dtmf(&self, digit: DtmfDigit) {
        if let Some(stream) = self.streams.lock().first().and_then(|s| s.audio_stream.clone()) {
            stream.queue_dtmf(digit);
        }
    }

    pub fn set_mirror_enabled(&self, enabled: bool) {
        if let Some(stream) = self.streams.lock().first().and_then(|s| s.audio_stream.clone()) {
            stream.set_mirror_enabled(enabled);
        }
    }

    pub fn statistics(&self) -> Vec<StatsSnapshot> {
        let baseline = self.stats_baseline.lock().clone();
        self.streams
            .lock()
            .iter()
            .filter_map(|s| s.provider.as_ref().map(|p| p.statistics()))
            .map(|snapshot| match &baseline {
                Some(base) => StatsSnapshot {
                    packets_sent: base.packets_sent + snapshot.packets_sent,
                    bytes_sent: base.bytes_sent + snapshot.bytes_sent,
                    packets_received: base.packets_received + snapshot.packets_received,
                    bytes_received: base.bytes_received + snapshot.bytes_received,
                    rtcp_packets_sent: base.rtcp_packets_sent + snapshot.rtcp_packets_sent,
                    rtcp_packets_received: base.rtcp_packets_received + snapshot.rtcp_packets_received,
                    packets_lost: base.packets_lost + snapshot.packets_lost,
                    ..snapshot
                },
                None => snapshot,
            })
            .collect()
    }

    /// Feeds one frame of microphone PCM into the active media stream, if any.
    pub fn on_capture_frame(&self, pcm: &[i16]) {
        if let Some(provider) = self.streams.lock().first().and_then(|s| s.provider.clone()) {
            provider.process_send_frame(pcm);
        }
    }

    /// Pulls one frame of mixed speaker PCM from the active media stream.
    pub fn pull_speaker_frame(&self, len: usize) -> Vec<i16> {
        if let Some(stream) = self.streams.lock().first().and_then(|s| s.audio_stream.clone()) {
            stream.pull_speaker_frame(len)
        } else {
            vec![0i16; len]
        }
    }

    // ---- ICE event handling ------------------------------------------------

    fn on_ice_event(&self, event: IceEvent) {
        match event {
            IceEvent::GatheringComplete { .. } => {
                self.gather_complete.store(true, Ordering::SeqCst);
                if self.awaiting_gather_for_offer.swap(false, Ordering::SeqCst) {
                    if let Err(err) = self.schedule_offer() {
                        tracing::warn!(session = self.id, %err, "failed building offer after ICE gather");
                    }
                } else {
                    self.maybe_finish_answer();
                }
            }
            IceEvent::ConnectivityEstablished { stream, component, remote } => {
                self.apply_nominated_address(stream, component, remote);
                self.mark_established(EstablishedKind::Ice);
            }
            IceEvent::ConnectivityFailed { .. } => {
                self.sink.on_session_event(SessionEvent::ConnectivityFailed { session_id: self.id });
            }
        }
    }

    // ---- Internal helpers ---------------------------------------------------

    fn schedule_offer(&self) -> Result<()> {
        if self.has_to_send_offer.swap(true, Ordering::SeqCst) {
            tracing::debug!(session = self.id, "re-offer already pending, dropping");
            return Ok(());
        }
        match self.build_offer() {
            Ok(sdp) => {
                self.dialog.send_offer(&sdp);
                if matches!(self.role, SessionRole::Initiator) && matches!(*self.state.lock(), SessionState::Offering) {
                    *self.state.lock() = SessionState::Early;
                }
                Ok(())
            }
            Err(err) => {
                self.has_to_send_offer.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn maybe_finish_answer(&self) {
        let ready = self.user_ready.load(Ordering::SeqCst) && (!self.config.ice_enabled || self.gather_complete.load(Ordering::SeqCst));
        if !ready {
            return;
        }
        match self.build_answer() {
            Ok(sdp) => {
                *self.last_answer.lock() = Some(sdp.clone());
                self.dialog.send_answer(&sdp);
                if self.config.ice_enabled {
                    if let Some(stream_id) = self.stream_ice_id(0) {
                        self.ice.check_connectivity(stream_id);
                    }
                } else {
                    *self.state.lock() = SessionState::Connected;
                    self.mark_established(EstablishedKind::Sip);
                }
            }
            Err(err) => {
                self.dialog.send_response(err.to_sip_status());
                self.force_terminate(TerminatedReason::Error);
            }
        }
    }

    fn set_stream_direction(&self, f: impl Fn(MediaDirection) -> MediaDirection) -> Result<()> {
        {
            let mut streams = self.streams.lock();
            let stream = streams.get_mut(0).ok_or(SessionError::MissingConnectionInfo)?;
            stream.direction = f(stream.direction);
            if stream.direction.can_send() {
                if let Some(rtp) = stream.audio_stream.as_ref().map(|s| s.rtp_session().clone()) {
                    rtp.mark_next_as_talkspurt_start();
                }
            }
        }
        self.schedule_offer()
    }

    fn mark_established(&self, kind: EstablishedKind) {
        *self.state.lock() = SessionState::Connected;
        self.has_to_send_offer.store(false, Ordering::SeqCst);
        self.sink.on_session_event(SessionEvent::Established { session_id: self.id, kind });
    }

    fn force_terminate(&self, reason: TerminatedReason) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = SessionState::Terminated;
        self.release_providers();
        self.free_all_sockets();
        if let Some(id) = self.stream_ice_id(0) {
            self.ice.remove_stream(id);
        }
        self.sink.on_session_event(SessionEvent::Terminated { session_id: self.id, reason });
    }

    fn stream_ice_id(&self, idx: usize) -> Option<StreamId> {
        self.streams.lock().get(idx).and_then(|s| s.ice_stream)
    }

    fn apply_nominated_address(&self, stream_id: StreamId, component: ComponentId, addr: SocketAddr) {
        let streams = self.streams.lock();
        if let Some(stream) = streams.iter().find(|s| s.ice_stream == Some(stream_id)) {
            if Some(component) == stream.rtp_component {
                if let Some(audio) = &stream.audio_stream {
                    audio.rtp_session().set_remote_address(addr);
                }
            }
        }
    }

    fn set_remote_rtp_address(&self, idx: usize, ip: &str, port: u16) -> Result<()> {
        let addr: SocketAddr = SocketAddr::from_str(&format!("{ip}:{port}")).map_err(|_| SessionError::MissingConnectionInfo)?;
        if let Some(audio) = self.streams.lock().get(idx).and_then(|s| s.audio_stream.clone()) {
            audio.rtp_session().set_remote_address(addr);
        }
        Ok(())
    }

    fn allocate_media_stream(&self) -> Result<usize> {
        {
            let streams = self.streams.lock();
            if !streams.is_empty() {
                return Ok(0);
            }
        }

        let stream_id = self.ice.add_stream();
        let family = if self.config.ipv6_enabled { Family::V6 } else { Family::V4 };
        let multiplex = if self.config.rtcp_mux { Multiplex::Do } else { Multiplex::Dont };
        let sink: Arc<dyn SocketSink> = Arc::new(MediaSocketSink { session: self.self_weak.clone(), stream_index: 0 });

        let ((rtp_handle, rtp_port), (rtcp_handle, rtcp_port)) = self
            .socket_heap
            .alloc_socket_pair(family, sink, multiplex)
            .map_err(|e| SessionError::SocketAllocationFailed(e.to_string()))?;

        let rtp_component = self.ice.add_component(stream_id, rtp_port, None)?;
        let rtcp_component = if matches!(multiplex, Multiplex::Do) {
            rtp_component
        } else {
            self.ice.add_component(stream_id, rtcp_port, None)?
        };

        let mut stream = MediaStream::placeholder();
        stream.ice_stream = Some(stream_id);
        stream.rtp_component = Some(rtp_component);
        stream.rtcp_component = Some(rtcp_component);
        stream.rtp_socket = Some(rtp_handle);
        stream.rtcp_socket = Some(rtcp_handle);
        stream.local_rtp_port = rtp_port;
        stream.local_rtcp_port = rtcp_port;

        self.streams.lock().push(stream);
        Ok(0)
    }

    fn release_stream(&self, idx: usize) {
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.get_mut(idx) {
            if let Some(provider) = stream.provider.take() {
                provider.session_terminated();
            }
            stream.audio_stream = None;
            stream.codec = None;
            if let (Some(a), Some(b)) = (stream.rtp_socket.take(), stream.rtcp_socket.take()) {
                self.socket_heap.free_socket_pair(a, b);
            }
            if let Some(id) = stream.ice_stream.take() {
                self.ice.remove_stream(id);
            }
            // Port numbers are zeroed but the placeholder entry is kept so
            // a later re-offer can re-add media symmetrically.
            stream.local_rtp_port = 0;
            stream.local_rtcp_port = 0;
        }
    }

    fn release_providers(&self) {
        for stream in self.streams.lock().iter() {
            if let Some(provider) = &stream.provider {
                provider.session_terminated();
            }
        }
    }

    fn free_all_sockets(&self) {
        for stream in self.streams.lock().iter() {
            if let (Some(a), Some(b)) = (stream.rtp_socket, stream.rtcp_socket) {
                self.socket_heap.free_socket_pair(a, b);
            }
        }
    }

    fn merge_stats_baseline(&self, snapshot: StatsSnapshot) {
        let mut baseline = self.stats_baseline.lock();
        let merged = match baseline.take() {
            Some(prev) => StatsSnapshot {
                packets_sent: prev.packets_sent + snapshot.packets_sent,
                bytes_sent: prev.bytes_sent + snapshot.bytes_sent,
                packets_received: prev.packets_received + snapshot.packets_received,
                bytes_received: prev.bytes_received + snapshot.bytes_received,
                rtcp_packets_sent: prev.rtcp_packets_sent + snapshot.rtcp_packets_sent,
                rtcp_packets_received: prev.rtcp_packets_received + snapshot.rtcp_packets_received,
                packets_lost: prev.packets_lost + snapshot.packets_lost,
                ..snapshot
            },
            None => snapshot,
        };
        *baseline = Some(merged);
    }

    // ---- SDP construction ---------------------------------------------------

    fn build_offer(&self) -> Result<SessionDescription> {
        self.allocate_media_stream()?;

        let origin_snapshot = {
            let mut origin = self.origin.lock();
            origin.sess_version += 1;
            origin.clone()
        };

        let mut sdp = SessionDescription::new(origin_snapshot);
        sdp.connection = Some(ConnectionInfo { addr_type: AddrType::Ip4, address: self.local_ip.clone() });

        let (rtp_port, rtcp_port, ice_stream, rtp_component, direction) = {
            let streams = self.streams.lock();
            let s = &streams[0];
            (s.local_rtp_port, s.local_rtcp_port, s.ice_stream, s.rtp_component, s.direction)
        };

        let profile = if self.config.srtp_enabled { RtpProfile::Savp } else { RtpProfile::Avp };
        let mut media = MediaDescription::new_audio(rtp_port, profile);

        for factory in self.codecs.factories() {
            let d = factory.descriptor();
            media.payload_types.push(d.payload_type);
            media.rtpmap.push((d.payload_type, format!("{}/{}", d.name, d.clock_rate)));
        }
        if let Some(first) = self.codecs.factories().first() {
            media.payload_types.push(TELEPHONE_EVENT_PT);
            media.rtpmap.push((TELEPHONE_EVENT_PT, format!("telephone-event/{}", first.descriptor().clock_rate)));
        }
        media.direction = direction;
        if self.config.rtcp_mux {
            media.rtcp_mux = true;
        } else {
            media.rtcp_port = Some(rtcp_port);
        }

        if self.config.ice_enabled {
            if let Some(id) = ice_stream {
                let (ufrag, pwd) = self.ice.local_credentials(id)?;
                media.ice_ufrag = Some(ufrag);
                media.ice_pwd = Some(pwd);
                if let Some(rtp_c) = rtp_component {
                    media.candidates.extend(self.ice.fill_candidate_list(id, rtp_c)?);
                }
            }
        }

        if self.config.srtp_enabled {
            media.crypto = self.build_local_crypto_offer(0)?;
        }

        sdp.media.push(media);
        Ok(sdp)
    }

    fn build_answer(&self) -> Result<SessionDescription> {
        let origin_snapshot = {
            let mut origin = self.origin.lock();
            origin.sess_version += 1;
            origin.clone()
        };

        let mut sdp = SessionDescription::new(origin_snapshot);
        sdp.connection = Some(ConnectionInfo { addr_type: AddrType::Ip4, address: self.local_ip.clone() });

        let (rtp_port, rtcp_port, ice_stream, rtp_component, direction, codec, answer_crypto, telephone_event) = {
            let streams = self.streams.lock();
            let s = &streams[0];
            (
                s.local_rtp_port,
                s.local_rtcp_port,
                s.ice_stream,
                s.rtp_component,
                s.direction,
                s.codec.clone(),
                s.answer_crypto.clone(),
                s.audio_stream.is_some(),
            )
        };

        let profile = if answer_crypto.is_some() { RtpProfile::Savp } else { RtpProfile::Avp };
        let mut media = MediaDescription::new_audio(rtp_port, profile);

        if let Some(codec) = &codec {
            let d = codec.descriptor();
            media.payload_types.push(d.payload_type);
        }
        if telephone_event {
            media.payload_types.push(TELEPHONE_EVENT_PT);
        }
        if let Some(provider) = self.streams.lock()[0].provider.as_ref() {
            provider.build_sdp(&mut media);
        }
        if telephone_event {
            if let Some(first_rate) = codec.as_ref().map(|c| c.descriptor().clock_rate) {
                media.rtpmap.push((TELEPHONE_EVENT_PT, format!("telephone-event/{first_rate}")));
            }
        }

        media.direction = direction;
        if self.config.rtcp_mux {
            media.rtcp_mux = true;
        } else {
            media.rtcp_port = Some(rtcp_port);
        }

        if self.config.ice_enabled {
            if let Some(id) = ice_stream {
                let (ufrag, pwd) = self.ice.local_credentials(id)?;
                media.ice_ufrag = Some(ufrag);
                media.ice_pwd = Some(pwd);
                if let Some(rtp_c) = rtp_component {
                    media.candidates.extend(self.ice.fill_candidate_list(id, rtp_c)?);
                }
            }
        }

        if let Some((tag, suite, key_salt)) = answer_crypto {
            media.crypto.push(CryptoAttribute { tag, suite, key_salt_base64: encode_key_salt(&key_salt) });
        }

        sdp.media.push(media);
        Ok(sdp)
    }

    fn build_local_crypto_offer(&self, idx: usize) -> Result<Vec<CryptoAttribute>> {
        let suites = [CryptoSuite::Aes128CmHmacSha1_80, CryptoSuite::Aes256CmHmacSha1_80];
        let mut attrs = Vec::new();
        let mut pending = Vec::new();
        for (i, suite) in suites.iter().enumerate() {
            let tag = (i + 1) as u32;
            let key_salt = random_key_salt(suite.key_len());
            attrs.push(CryptoAttribute { tag, suite: *suite, key_salt_base64: encode_key_salt(&key_salt) });
            pending.push((tag, to_rtp_suite(*suite), key_salt));
        }
        self.streams.lock()[idx].pending_local_crypto = pending;
        Ok(attrs)
    }

    fn finalize_srtp_as_acceptor(&self, idx: usize, media: &MediaDescription) -> Result<(SrtpSuite, SrtpKeySalt, SrtpKeySalt)> {
        let chosen = media.crypto.first().ok_or(SessionError::MissingConnectionInfo)?;
        let rtp_suite = to_rtp_suite(chosen.suite);
        let incoming = decode_key_salt(rtp_suite, &chosen.key_salt_base64)?;
        let outgoing = random_key_salt(rtp_suite.key_len());
        self.streams.lock()[idx].answer_crypto = Some((chosen.tag, chosen.suite, outgoing.clone()));
        Ok((rtp_suite, outgoing, incoming))
    }

    fn finalize_srtp_as_offerer(&self, idx: usize, media: &MediaDescription) -> Result<(SrtpSuite, SrtpKeySalt, SrtpKeySalt)> {
        let chosen = media.crypto.first().ok_or(SessionError::MissingConnectionInfo)?;
        let rtp_suite = to_rtp_suite(chosen.suite);
        let incoming = decode_key_salt(rtp_suite, &chosen.key_salt_base64)?;
        let outgoing = {
            let streams = self.streams.lock();
            streams[idx]
                .pending_local_crypto
                .iter()
                .find(|(tag, suite, _)| *tag == chosen.tag && *suite == rtp_suite)
                .map(|(_, _, key)| key.clone())
                .ok_or(SessionError::NoCommonCryptoSuite)?
        };
        Ok((rtp_suite, outgoing, incoming))
    }

    fn finalize_rtp_and_provider(&self, idx: usize, codec: Arc<dyn CodecFactory>) -> Result<()> {
        self.finalize_rtp_with_srtp(idx, codec, None)
    }

    fn finalize_rtp_with_srtp(
        &self,
        idx: usize,
        codec: Arc<dyn CodecFactory>,
        srtp_keys: Option<(SrtpSuite, SrtpKeySalt, SrtpKeySalt)>,
    ) -> Result<()> {
        let (rtp_handle, rtcp_handle) = {
            let streams = self.streams.lock();
            let s = &streams[idx];
            (s.rtp_socket.ok_or(SessionError::MissingConnectionInfo)?, s.rtcp_socket.ok_or(SessionError::MissingConnectionInfo)?)
        };

        let srtp_session = srtp_keys.map(|(suite, outgoing, incoming)| Arc::new(SrtpSession::new(suite, outgoing, incoming)));

        let descriptor = codec.descriptor();
        let rtp = Arc::new(RtpSession::new(self.socket_heap.clone(), rtp_handle, rtcp_handle, descriptor.payload_type, descriptor.clock_rate, srtp_session));

        let context = self.id ^ ((idx as u64) << 32);
        let audio_stream = Arc::new(AudioStream::new(
            context,
            codec.clone(),
            codec.clone(),
            rtp,
            self.mixer.clone(),
            self.config.device_sample_rate,
            DtmfMode::Rfc2833,
        ));
        let provider: Arc<dyn MediaProvider> = Arc::new(AudioProvider::new(audio_stream.clone(), descriptor.name, codec_r_factor(descriptor.name)));

        let mut streams = self.streams.lock();
        let stream = &mut streams[idx];
        stream.audio_stream = Some(audio_stream);
        stream.provider = Some(provider);
        stream.codec = Some(codec);
        Ok(())
    }
}

fn random_key_salt(key_len: usize) -> SrtpKeySalt {
    let mut key = vec![0u8; key_len];
    rand::thread_rng().fill_bytes(&mut key);
    let mut salt = [0u8; rvoip_rtp_core::srtp::SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    SrtpKeySalt::new(key, salt)
}

/// Maps the SDP-layer [`CryptoSuite`] to the runtime [`SrtpSuite`] — two
/// distinct enums with the same variant names because the wire-format type
/// lives in `rvoip-sip-types` (no crypto dependency) and the runtime type
/// lives in `rvoip-rtp-core` (no SDP dependency).
fn to_rtp_suite(suite: CryptoSuite) -> SrtpSuite {
    match suite {
        CryptoSuite::Aes128CmHmacSha1_80 => SrtpSuite::Aes128CmHmacSha1_80,
        CryptoSuite::Aes256CmHmacSha1_80 => SrtpSuite::Aes256CmHmacSha1_80,
    }
}

/// ITU-T G.107-ish baseline R-factor per codec name, used only for the MOS
/// estimate in `statistics()`. Codecs this
/// registry doesn't recognize get a conservative generic baseline.
fn codec_r_factor(codec_name: &str) -> f64 {
    match codec_name {
        "PCMU" | "PCMA" => DEFAULT_CODEC_R_FACTOR,
        _ => 80.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterProfile;
    use rvoip_codec_core::g711::G711Factory;
    use rvoip_codec_core::registry::CodecRegistry;
    use std::sync::Mutex as StdMutex;

    struct RecordingDialog {
        offers: StdMutex<Vec<SessionDescription>>,
        answers: StdMutex<Vec<SessionDescription>>,
        responses: StdMutex<Vec<u16>>,
        terminated: AtomicBool,
    }

    impl RecordingDialog {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                offers: StdMutex::new(Vec::new()),
                answers: StdMutex::new(Vec::new()),
                responses: StdMutex::new(Vec::new()),
                terminated: AtomicBool::new(false),
            })
        }
    }

    impl DialogHandle for RecordingDialog {
        fn send_offer(&self, sdp: &SessionDescription) {
            self.offers.lock().unwrap().push(sdp.clone());
        }
        fn send_answer(&self, sdp: &SessionDescription) {
            self.answers.lock().unwrap().push(sdp.clone());
        }
        fn send_response(&self, code: u16) {
            self.responses.lock().unwrap().push(code);
        }
        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
        }
    }

    struct RecordingSink {
        events: StdMutex<Vec<SessionEvent>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: StdMutex::new(Vec::new()) })
        }
    }

    impl SessionEventSink for RecordingSink {
        fn on_session_event(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn test_codecs() -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::new().with_priority(Arc::new(G711Factory::pcmu())))
    }

    fn test_session(role: SessionRole, ice_enabled: bool, port_base: u16) -> (Arc<Session>, Arc<RecordingDialog>, Arc<RecordingSink>) {
        let heap = Arc::new(SocketHeap::new(port_base, port_base + 200).unwrap());
        let mut config = MasterProfile::default();
        config.ice_enabled = ice_enabled;
        let dialog = RecordingDialog::new();
        let sink = RecordingSink::new();
        let mixer = Arc::new(Mixer::new(4, 8000));

        let session = Session::new(
            1,
            1,
            role,
            SipUri::new("192.0.2.1").with_user("alice"),
            "192.0.2.1".to_string(),
            Arc::new(config),
            test_codecs(),
            heap,
            dialog.clone(),
            mixer,
            sink.clone(),
        );
        (session, dialog, sink)
    }

    #[test]
    fn initiator_without_ice_sends_offer_immediately() {
        let (session, dialog, _sink) = test_session(SessionRole::Initiator, false, 31800);
        session.start(SipUri::new("192.0.2.2").with_user("bob")).unwrap();
        assert_eq!(dialog.offers.lock().unwrap().len(), 1);
        assert_eq!(session.state(), SessionState::Early);
    }

    #[test]
    fn initiator_with_ice_waits_for_gather_before_offering() {
        let (session, dialog, _sink) = test_session(SessionRole::Initiator, true, 31802);
        session.start(SipUri::new("192.0.2.2").with_user("bob")).unwrap();
        // HostOnlyIceAgent completes gathering synchronously inside start().
        assert_eq!(dialog.offers.lock().unwrap().len(), 1);
    }

    #[test]
    fn acceptor_answers_only_after_explicit_accept() {
        let (session, dialog, sink) = test_session(SessionRole::Acceptor, false, 31804);
        let offer = sample_offer(1, 40000);
        session.on_remote_offer(&offer).unwrap();
        assert_eq!(session.state(), SessionState::Offered);
        assert!(dialog.answers.lock().unwrap().is_empty());

        session.accept().unwrap();
        assert_eq!(dialog.answers.lock().unwrap().len(), 1);
        assert_eq!(session.state(), SessionState::Connected);
        assert!(sink.events.lock().unwrap().iter().any(|e| matches!(e, SessionEvent::Established { kind: EstablishedKind::Sip, .. })));
    }

    #[test]
    fn retransmitted_offer_at_same_version_resends_prior_answer() {
        let (session, dialog, _sink) = test_session(SessionRole::Acceptor, false, 31806);
        let offer = sample_offer(1, 40010);
        session.on_remote_offer(&offer).unwrap();
        session.accept().unwrap();
        assert_eq!(dialog.answers.lock().unwrap().len(), 1);

        session.on_remote_offer(&offer).unwrap();
        assert_eq!(dialog.answers.lock().unwrap().len(), 2);
    }

    #[test]
    fn rejecting_media_line_releases_the_stream_without_error() {
        let (session, _dialog, _sink) = test_session(SessionRole::Acceptor, false, 31808);
        let offer = sample_offer(1, 40020);
        session.on_remote_offer(&offer).unwrap();
        session.accept().unwrap();

        let mut reoffer = sample_offer(2, 40020);
        reoffer.media[0].port = 0;
        session.on_remote_offer(&reoffer).unwrap();
        assert!(session.streams.lock()[0].provider.is_none());
    }

    #[test]
    fn stop_is_idempotent() {
        let (session, dialog, sink) = test_session(SessionRole::Initiator, false, 31810);
        session.start(SipUri::new("192.0.2.2").with_user("bob")).unwrap();
        session.stop();
        session.stop();
        assert!(dialog.terminated.load(Ordering::SeqCst));
        assert_eq!(sink.events.lock().unwrap().iter().filter(|e| matches!(e, SessionEvent::Terminated { .. })).count(), 1);
    }

    #[test]
    fn refer_propagates_as_a_single_event_and_does_not_end_the_call() {
        let (session, _dialog, sink) = test_session(SessionRole::Initiator, false, 31820);
        session.start(SipUri::new("192.0.2.2").with_user("bob")).unwrap();
        let target = SipUri::new("192.0.2.3").with_user("carol");
        session.on_remote_refer(target.clone(), Some("refer-1".to_string()));
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Referred { target: got, refer_id, .. } => {
                assert_eq!(got.user.as_deref(), target.user.as_deref());
                assert_eq!(refer_id.as_deref(), Some("refer-1"));
            }
            other => panic!("expected Referred, got {other:?}"),
        }
        assert_ne!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn refer_after_terminate_is_dropped() {
        let (session, _dialog, sink) = test_session(SessionRole::Initiator, false, 31821);
        session.start(SipUri::new("192.0.2.2").with_user("bob")).unwrap();
        session.stop();
        session.on_remote_refer(SipUri::new("192.0.2.3").with_user("carol"), None);
        let referred_count = sink.events.lock().unwrap().iter().filter(|e| matches!(e, SessionEvent::Referred { .. })).count();
        assert_eq!(referred_count, 0);
    }

    fn sample_offer(version: u64, remote_port: u16) -> SessionDescription {
        let origin = Origin {
            username: "-".to_string(),
            sess_id: 555,
            sess_version: version,
            addr_type: AddrType::Ip4,
            address: "198.51.100.9".to_string(),
        };
        let mut sdp = SessionDescription::new(origin);
        sdp.connection = Some(ConnectionInfo { addr_type: AddrType::Ip4, address: "198.51.100.9".to_string() });
        let mut media = MediaDescription::new_audio(remote_port, RtpProfile::Avp);
        media.payload_types = vec![0];
        media.rtpmap.push((0, "PCMU/8000".to_string()));
        sdp.media.push(media);
        sdp
    }
}
