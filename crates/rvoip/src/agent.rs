//! The user agent: accounts, the session map, and the JSON command
//! dispatcher/event queue of spec §4.7, wiring together the signaling,
//! media I/O, device, and command "threads" of spec §5 (the signaling
//! thread here is nominal — the SIP transport it would drive is an
//! external collaborator this workspace doesn't implement; see
//! [`crate::dialog_null`] and [`crate::dialog_loopback`]).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use rvoip_codec_core::g711::G711Factory;
use rvoip_codec_core::registry::CodecRegistry;
use rvoip_media_core::{DtmfDigit, Mixer};
use rvoip_rtp_core::socket_heap::SocketHeap;
use rvoip_session_core::session::{EstablishedKind, Session, SessionEvent, SessionEventSink, SessionRole, TerminatedReason};
use rvoip_session_core::{Account, CachedChallenge, Credentials, MasterProfile};
use rvoip_sip_types::sdp::parse_sdp;
use rvoip_sip_types::uri::{format_sip_address, parse_sip_address, SipUri};

use crate::device::NullAudioDevice;
use crate::dialog_loopback::{LoopbackBridge, LoopbackDialog, Side};
use crate::dialog_null::NullDialogHandle;
use crate::error::{Result, UaError};
use crate::queue::{CommandQueue, EventQueue};
use crate::wire::{Answer, Command, Event, CODE_ERROR, CODE_TIMEOUT};

/// Forwards a [`Session`]'s lifecycle notifications onto the event bus as
/// the `session_established` / `connectivity_failed` / `session_terminated`
/// events of spec §4.7.
struct UaSessionSink {
    account_id: u64,
    events: Arc<EventQueue>,
}

impl SessionEventSink for UaSessionSink {
    fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Established { session_id, kind } => {
                let kind = match kind {
                    EstablishedKind::Sip => "sip",
                    EstablishedKind::Ice => "ice",
                };
                self.events.push(
                    Event::new("session_established")
                        .with_field("session_id", session_id)
                        .with_field("account_id", self.account_id)
                        .with_field("kind", kind),
                );
            }
            SessionEvent::ConnectivityFailed { session_id } => {
                self.events.push(
                    Event::new("connectivity_failed")
                        .with_field("session_id", session_id)
                        .with_field("account_id", self.account_id),
                );
            }
            SessionEvent::Terminated { session_id, reason } => {
                let (reason_str, code) = match reason {
                    TerminatedReason::LocalBye => ("local_bye", 0),
                    TerminatedReason::RemoteBye => ("remote_bye", 0),
                    TerminatedReason::Rejected(code) => ("rejected", code as i64),
                    TerminatedReason::Error => ("error", 500),
                };
                self.events.push(
                    Event::new("session_terminated")
                        .with_field("session_id", session_id)
                        .with_field("account_id", self.account_id)
                        .with_field("reason", reason_str)
                        .with_field("code", code),
                );
            }
            SessionEvent::Referred { session_id, target, refer_id } => {
                let mut event = Event::new("session_referred")
                    .with_field("session_id", session_id)
                    .with_field("account_id", self.account_id)
                    .with_field("target", format_sip_address(&target));
                if let Some(refer_id) = refer_id {
                    event = event.with_field("refer_id", refer_id);
                }
                self.events.push(event);
            }
        }
    }
}

/// One process's worth of registered accounts and active call sessions,
/// fronted by the JSON command/event bus (spec §3 "Ownership": "The user
/// agent exclusively owns accounts and sessions").
pub struct UserAgent {
    config: RwLock<Arc<MasterProfile>>,
    local_ip: String,

    accounts: Mutex<HashMap<u64, Account>>,
    next_account_id: AtomicU64,

    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_session_id: AtomicU64,

    codecs: Arc<CodecRegistry>,
    mixer: Arc<Mixer>,
    socket_heap: Mutex<Option<Arc<SocketHeap>>>,
    device: Mutex<Option<NullAudioDevice>>,

    running: AtomicBool,

    commands: Arc<CommandQueue>,
    events: Arc<EventQueue>,
}

impl UserAgent {
    pub fn new(local_ip: impl Into<String>) -> Arc<Self> {
        Self::with_config(local_ip, MasterProfile::default())
    }

    pub fn with_config(local_ip: impl Into<String>, config: MasterProfile) -> Arc<Self> {
        let codecs = Arc::new(CodecRegistry::new().with_priority(Arc::new(G711Factory::pcmu())).with_priority(Arc::new(G711Factory::pcma())));
        let config = Arc::new(config);
        Arc::new(Self {
            mixer: Arc::new(Mixer::new(config.mixer_channel_capacity, config.device_sample_rate)),
            config: RwLock::new(config),
            local_ip: local_ip.into(),
            accounts: Mutex::new(HashMap::new()),
            next_account_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            codecs,
            socket_heap: Mutex::new(None),
            device: Mutex::new(None),
            running: AtomicBool::new(false),
            commands: Arc::new(CommandQueue::new()),
            events: Arc::new(EventQueue::new()),
        })
    }

    pub fn config(&self) -> Arc<MasterProfile> {
        self.config.read().clone()
    }

    pub fn command_queue(&self) -> Arc<CommandQueue> {
        self.commands.clone()
    }

    pub fn event_queue(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---- Command/event bus entry point ------------------------------------

    /// Dispatches one JSON command synchronously and returns its answer
    /// (spec §6: "in-process string API"). [`Self::push_command`] /
    /// `command_queue` offer the asynchronous FIFO shape of spec §3 for a
    /// caller that wants to decouple submission from the reply.
    pub fn handle_command(&self, value: Value) -> Value {
        let Some(command) = Command::from_json(value) else {
            return Answer::unsupported("<malformed>").to_json();
        };
        self.dispatch(command).to_json()
    }

    pub fn push_command(&self, value: Value) {
        if let Some(command) = Command::from_json(value) {
            self.commands.push(command);
        }
    }

    fn dispatch(&self, command: Command) -> Answer {
        let result = match command.name.as_str() {
            "config" => self.cmd_config(&command),
            "start" => self.cmd_start(&command),
            "stop" => self.cmd_stop(&command),
            "create_account" => self.cmd_create_account(&command),
            "start_account" => self.cmd_start_account(&command),
            "stop_account" => self.cmd_stop_account(&command),
            "set_user_info" => self.cmd_set_user_info(&command),
            "create_session" => self.cmd_create_session(&command),
            "start_session" => self.cmd_start_session(&command),
            "accept_session" => self.cmd_accept_session(&command),
            "reject_session" => self.cmd_reject_session(&command),
            "stop_session" => self.cmd_stop_session(&command),
            "destroy_session" => self.cmd_destroy_session(&command),
            "pause_session" => self.cmd_pause_session(&command),
            "resume_session" => self.cmd_resume_session(&command),
            "deliver_offer" => self.cmd_deliver_offer(&command),
            "deliver_refer" => self.cmd_deliver_refer(&command),
            "queue_dtmf" => self.cmd_queue_dtmf(&command),
            "use_stream_for_session" => self.cmd_use_stream_for_session(&command),
            "network_changed" => self.cmd_network_changed(&command),
            "add_root_cert" => self.cmd_add_root_cert(&command),
            "log_message" => self.cmd_log_message(&command),
            "wait_for_event" => return self.cmd_wait_for_event(&command),
            "get_media_stats" => self.cmd_get_media_stats(&command),
            _ => return Answer::unsupported(&command.name),
        };
        match result {
            Ok(answer) => answer,
            Err(err) => Answer::error(&command, err.code(), err.to_string()),
        }
    }

    // ---- UA lifecycle -------------------------------------------------------

    fn cmd_config(&self, command: &Command) -> Result<Answer> {
        let patch = Value::Object(command.fields.clone());
        let mut profile = (*self.config.read()).clone();
        profile.merge_json(&patch)?;
        *self.config.write() = Arc::new(profile);
        Ok(Answer::ok(command))
    }

    fn cmd_start(&self, command: &Command) -> Result<Answer> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(Answer::ok(command));
        }
        let profile = self.config();
        let heap = SocketHeap::new(profile.rtp_port_start, profile.rtp_port_finish)?;
        *self.socket_heap.lock() = Some(Arc::new(heap));
        self.events.push(Event::new("ua_start").with_field("code", 0));
        Ok(Answer::ok(command))
    }

    fn cmd_stop(&self, command: &Command) -> Result<Answer> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(Answer::ok(command));
        }
        for session in self.sessions.lock().values() {
            session.stop();
        }
        self.sessions.lock().clear();
        if let Some(device) = self.device.lock().as_mut() {
            device.stop();
        }
        *self.device.lock() = None;
        if let Some(heap) = self.socket_heap.lock().take() {
            heap.shutdown();
        }
        for account in self.accounts.lock().values_mut() {
            account.mark_unregistered();
        }
        self.events.push(Event::new("ua_stop").with_field("code", 0));
        Ok(Answer::ok(command))
    }

    // ---- Accounts -------------------------------------------------------------

    fn cmd_create_account(&self, command: &Command) -> Result<Answer> {
        let username = command.str_field("username").ok_or(UaError::InvalidField("username"))?;
        let domain = command.str_field("domain").ok_or(UaError::InvalidField("domain"))?;
        let password = command.str_field("password").unwrap_or_default();
        let realm = command.str_field("realm").map(str::to_string);
        let proxy = command.str_field("proxy").map(parse_sip_address).transpose()?;

        let id = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        let account = Account::new(
            id,
            SipUri::new(domain).with_user(username),
            proxy,
            Credentials { username: username.to_string(), password: password.to_string(), realm },
        );
        self.accounts.lock().insert(id, account);
        Ok(Answer::ok(command).with_field("account_id", id))
    }

    fn cmd_start_account(&self, command: &Command) -> Result<Answer> {
        let id = command.u64_field("account_id").ok_or(UaError::InvalidField("account_id"))?;
        let mut accounts = self.accounts.lock();
        let account = accounts.get_mut(&id).ok_or(UaError::UnknownAccount(id))?;
        // The registrar round-trip is the SIP transport's job (spec §1,
        // external collaborator); absent a real one, registration
        // completes locally and immediately.
        account.start_registering();
        account.cache_challenge(CachedChallenge { realm: account.address_of_record().host.clone(), nonce: String::new(), qop: None });
        account.mark_registered();
        drop(accounts);
        self.events.push(Event::new("account_start").with_field("account_id", id).with_field("code", 0));
        Ok(Answer::ok(command).with_field("account_id", id))
    }

    fn cmd_stop_account(&self, command: &Command) -> Result<Answer> {
        let id = command.u64_field("account_id").ok_or(UaError::InvalidField("account_id"))?;
        let mut accounts = self.accounts.lock();
        let account = accounts.get_mut(&id).ok_or(UaError::UnknownAccount(id))?;
        account.start_unregistering();
        account.mark_unregistered();
        drop(accounts);
        self.events.push(Event::new("account_stop").with_field("account_id", id).with_field("code", 0));
        Ok(Answer::ok(command).with_field("account_id", id))
    }

    fn cmd_set_user_info(&self, command: &Command) -> Result<Answer> {
        let id = command.u64_field("account_id").ok_or(UaError::InvalidField("account_id"))?;
        let uri = command.str_field("address_of_record").ok_or(UaError::InvalidField("address_of_record"))?;
        let parsed = parse_sip_address(uri)?;
        let mut accounts = self.accounts.lock();
        let account = accounts.get_mut(&id).ok_or(UaError::UnknownAccount(id))?;
        account.set_user_info(parsed);
        Ok(Answer::ok(command))
    }

    fn account_uri(&self, account_id: u64) -> Result<SipUri> {
        self.accounts
            .lock()
            .get(&account_id)
            .map(|a| a.address_of_record().clone())
            .ok_or(UaError::UnknownAccount(account_id))
    }

    // ---- Sessions ---------------------------------------------------------

    /// Builds a new [`Session`] on a [`NullDialogHandle`] (no real SIP
    /// transport attached) and registers it, emitting `session_new`.
    fn cmd_create_session(&self, command: &Command) -> Result<Answer> {
        if !self.is_running() {
            return Err(UaError::NotStarted);
        }
        let account_id = command.u64_field("account_id").ok_or(UaError::InvalidField("account_id"))?;
        let local_uri = self.account_uri(account_id)?;
        let role = match command.str_field("role").unwrap_or("initiate") {
            "accept" => SessionRole::Acceptor,
            _ => SessionRole::Initiator,
        };

        let dialog = Arc::new(NullDialogHandle::new());
        let (session, id) = self.build_session(account_id, role, local_uri, dialog);
        self.sessions.lock().insert(id, session.clone());
        self.events.push(Event::new("session_new").with_field("session_id", id).with_field("account_id", account_id));

        if let (SessionRole::Acceptor, Some(remote_sdp)) = (role, command.str_field("remote_sdp")) {
            let sdp = parse_sdp(remote_sdp)?;
            session.on_remote_offer(&sdp)?;
            self.events.push(Event::new("session_provisional").with_field("session_id", id).with_field("account_id", account_id));
        }

        Ok(Answer::ok(command).with_field("session_id", id))
    }

    fn build_session(&self, account_id: u64, role: SessionRole, local_uri: SipUri, dialog: Arc<dyn rvoip_session_core::DialogHandle>) -> (Arc<Session>, u64) {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let sink = Arc::new(UaSessionSink { account_id, events: self.events.clone() });
        let session = Session::new(
            id,
            account_id,
            role,
            local_uri,
            self.local_ip.clone(),
            self.config(),
            self.codecs.clone(),
            self.socket_heap.lock().clone().expect("socket heap present while running"),
            dialog,
            self.mixer.clone(),
            sink,
        );
        (session, id)
    }

    fn lookup_session(&self, command: &Command) -> Result<Arc<Session>> {
        let id = command.u64_field("session_id").ok_or(UaError::InvalidField("session_id"))?;
        self.sessions.lock().get(&id).cloned().ok_or(UaError::UnknownSession(id))
    }

    fn cmd_start_session(&self, command: &Command) -> Result<Answer> {
        let session = self.lookup_session(command)?;
        let peer = command.str_field("peer_uri").ok_or(UaError::InvalidField("peer_uri"))?;
        session.start(parse_sip_address(peer)?)?;
        Ok(Answer::ok(command))
    }

    fn cmd_accept_session(&self, command: &Command) -> Result<Answer> {
        self.lookup_session(command)?.accept()?;
        Ok(Answer::ok(command))
    }

    fn cmd_reject_session(&self, command: &Command) -> Result<Answer> {
        let code = command.u64_field("code").unwrap_or(486) as u16;
        self.lookup_session(command)?.reject(code)?;
        Ok(Answer::ok(command))
    }

    fn cmd_stop_session(&self, command: &Command) -> Result<Answer> {
        self.lookup_session(command)?.stop();
        Ok(Answer::ok(command))
    }

    fn cmd_destroy_session(&self, command: &Command) -> Result<Answer> {
        let id = command.u64_field("session_id").ok_or(UaError::InvalidField("session_id"))?;
        if let Some(session) = self.sessions.lock().remove(&id) {
            session.stop();
        }
        Ok(Answer::ok(command))
    }

    fn cmd_pause_session(&self, command: &Command) -> Result<Answer> {
        self.lookup_session(command)?.pause()?;
        Ok(Answer::ok(command))
    }

    fn cmd_resume_session(&self, command: &Command) -> Result<Answer> {
        self.lookup_session(command)?.resume()?;
        Ok(Answer::ok(command))
    }

    /// Feeds a raw SDP offer to an acceptor session after creation —
    /// exists because the real SIP dialog layer (out of scope) is normally
    /// what calls `on_remote_offer` directly; this gives the command bus an
    /// equivalent entry point for acceptor sessions not seeded at
    /// `create_session` time, e.g. a re-offer simulated from a test.
    fn cmd_deliver_offer(&self, command: &Command) -> Result<Answer> {
        let session = self.lookup_session(command)?;
        let remote_sdp = command.str_field("remote_sdp").ok_or(UaError::InvalidField("remote_sdp"))?;
        session.on_remote_offer(&parse_sdp(remote_sdp)?)?;
        Ok(Answer::ok(command))
    }

    /// Feeds a REFER to a session — same rationale as `deliver_offer`: the
    /// real dialog layer (out of scope) is normally what calls
    /// `on_remote_refer` directly. Spec §1 Non-goals: the session does no
    /// transfer logic of its own, it only emits `session_referred`.
    fn cmd_deliver_refer(&self, command: &Command) -> Result<Answer> {
        let session = self.lookup_session(command)?;
        let target = command.str_field("target").ok_or(UaError::InvalidField("target"))?;
        let target = parse_sip_address(target)?;
        let refer_id = command.str_field("refer_id").map(str::to_string);
        session.on_remote_refer(target, refer_id);
        Ok(Answer::ok(command))
    }

    fn cmd_queue_dtmf(&self, command: &Command) -> Result<Answer> {
        let session = self.lookup_session(command)?;
        let digit = command.str_field("digit").ok_or(UaError::InvalidField("digit"))?;
        let digit = parse_dtmf_digit(digit).ok_or(UaError::InvalidField("digit"))?;
        session.queue_dtmf(digit);
        Ok(Answer::ok(command))
    }

    fn cmd_use_stream_for_session(&self, command: &Command) -> Result<Answer> {
        let session = self.lookup_session(command)?;
        if let Some(mirror) = command.bool_field("mirror") {
            session.set_mirror_enabled(mirror);
        }
        Ok(Answer::ok(command))
    }

    fn cmd_network_changed(&self, command: &Command) -> Result<Answer> {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        for session in &sessions {
            if let Err(err) = session.refresh_media_path() {
                tracing::warn!(%err, "refresh_media_path failed during network_changed");
            }
        }
        self.events.push(Event::new("network_change").with_field("code", 0).with_field("session_count", sessions.len() as u64));
        Ok(Answer::ok(command))
    }

    fn cmd_add_root_cert(&self, command: &Command) -> Result<Answer> {
        let pem = command.str_field("pem").ok_or(UaError::InvalidField("pem"))?;
        let mut profile = (*self.config.read()).clone();
        profile.root_certs_pem.push(pem.to_string());
        *self.config.write() = Arc::new(profile);
        Ok(Answer::ok(command))
    }

    fn cmd_log_message(&self, command: &Command) -> Result<Answer> {
        let message = command.str_field("message").unwrap_or_default();
        let level = command.str_field("level").unwrap_or("info");
        match level {
            "error" => tracing::error!(%message, "application log"),
            "warn" => tracing::warn!(%message, "application log"),
            "debug" => tracing::debug!(%message, "application log"),
            _ => tracing::info!(%message, "application log"),
        }
        self.events.push(Event::new("log").with_field("level", level).with_field("message", message));
        Ok(Answer::ok(command))
    }

    fn cmd_wait_for_event(&self, command: &Command) -> Answer {
        let timeout_ms = command.u64_field("timeout_ms").unwrap_or(0);
        match self.events.wait_for(Duration::from_millis(timeout_ms)) {
            Some(event) => {
                let mut answer = Answer::ok(command);
                answer.fields = event.fields;
                answer.fields.insert("event".to_string(), Value::String(event.name));
                answer
            }
            None => Answer { command: command.name.clone(), code: CODE_TIMEOUT, fields: Default::default(), fingerprint: command.fingerprint.clone() },
        }
    }

    fn cmd_get_media_stats(&self, command: &Command) -> Result<Answer> {
        let session = self.lookup_session(command)?;
        let stats: Vec<Value> = session
            .statistics()
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "packets_sent": s.packets_sent,
                    "bytes_sent": s.bytes_sent,
                    "packets_received": s.packets_received,
                    "bytes_received": s.bytes_received,
                    "rtcp_packets_sent": s.rtcp_packets_sent,
                    "rtcp_packets_received": s.rtcp_packets_received,
                    "packets_lost": s.packets_lost,
                    "jitter_samples": s.jitter_samples,
                    "rtt_ms": s.rtt_ms,
                    "mos": s.mos,
                    "remote_address": s.remote_address.map(|a: SocketAddr| a.to_string()),
                    "codec_name": s.codec_name,
                    "ssrc": s.ssrc,
                })
            })
            .collect();
        Ok(Answer::ok(command).with_field("streams", Value::Array(stats)))
    }

    // ---- Loopback pairing (local reference binary / tests) ----------------

    /// Places an outbound call from `account_id` on this UA to
    /// `peer_account_id` on `peer`, bridging both sessions directly with a
    /// [`LoopbackDialog`] pair (spec §8 scenario 1/2 driven end to end with
    /// no real SIP transport underneath — see [`crate::dialog_loopback`]).
    pub fn dial(&self, account_id: u64, peer: &Arc<UserAgent>, peer_account_id: u64) -> Result<(u64, u64)> {
        if !self.is_running() || !peer.is_running() {
            return Err(UaError::NotStarted);
        }
        let local_uri = self.account_uri(account_id)?;
        let peer_uri = peer.account_uri(peer_account_id)?;

        let bridge = LoopbackBridge::new();
        let dialog_a = LoopbackDialog::new(bridge.clone(), Side::A);
        let (session_a, id_a) = self.build_session(account_id, SessionRole::Initiator, local_uri.clone(), dialog_a);
        bridge.bind(Side::A, &session_a);
        self.sessions.lock().insert(id_a, session_a.clone());
        self.events.push(Event::new("session_new").with_field("session_id", id_a).with_field("account_id", account_id));

        let dialog_b = LoopbackDialog::new(bridge.clone(), Side::B);
        let (session_b, id_b) = peer.build_session(peer_account_id, SessionRole::Acceptor, peer_uri.clone(), dialog_b);
        bridge.bind(Side::B, &session_b);
        peer.sessions.lock().insert(id_b, session_b.clone());
        peer.events.push(Event::new("session_new").with_field("session_id", id_b).with_field("account_id", peer_account_id));

        session_a.start(peer_uri)?;
        Ok((id_a, id_b))
    }

    /// Starts the silence-in/silence-out reference audio device (spec §5
    /// "Device threads") feeding `session_id`'s capture/speaker path.
    pub fn attach_null_audio_device(&self, session_id: u64) -> Result<()> {
        let session = self.sessions.lock().get(&session_id).cloned().ok_or(UaError::UnknownSession(session_id))?;
        let profile = self.config();
        let sink: Arc<dyn crate::device::AudioDeviceSink> = Arc::new(SessionDeviceSink { session });
        *self.device.lock() = Some(NullAudioDevice::start(sink, profile.device_sample_rate, profile.packet_time_ms));
        Ok(())
    }
}

struct SessionDeviceSink {
    session: Arc<Session>,
}

impl crate::device::AudioDeviceSink for SessionDeviceSink {
    fn on_capture_frame(&self, pcm: &[i16]) {
        self.session.on_capture_frame(pcm);
    }

    fn on_speaker_pull(&self, len: usize) {
        let _ = self.session.pull_speaker_frame(len);
    }
}

fn parse_dtmf_digit(s: &str) -> Option<DtmfDigit> {
    Some(match s {
        "0" => DtmfDigit::D0,
        "1" => DtmfDigit::D1,
        "2" => DtmfDigit::D2,
        "3" => DtmfDigit::D3,
        "4" => DtmfDigit::D4,
        "5" => DtmfDigit::D5,
        "6" => DtmfDigit::D6,
        "7" => DtmfDigit::D7,
        "8" => DtmfDigit::D8,
        "9" => DtmfDigit::D9,
        "*" => DtmfDigit::Star,
        "#" => DtmfDigit::Pound,
        "A" | "a" => DtmfDigit::A,
        "B" | "b" => DtmfDigit::B,
        "C" | "c" => DtmfDigit::C,
        "D" | "d" => DtmfDigit::D,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_ua(ip: &str) -> Arc<UserAgent> {
        let ua = UserAgent::new(ip);
        assert_eq!(ua.handle_command(serde_json::json!({ "command": "start" }))["code"], 0);
        ua
    }

    fn account(ua: &Arc<UserAgent>, user: &str, domain: &str) -> u64 {
        let answer = ua.handle_command(serde_json::json!({
            "command": "create_account",
            "username": user,
            "domain": domain,
            "password": "secret",
        }));
        assert_eq!(answer["code"], 0);
        answer["account_id"].as_u64().unwrap()
    }

    #[test]
    fn unknown_command_is_unsupported() {
        let ua = UserAgent::new("192.0.2.10");
        let answer = ua.handle_command(serde_json::json!({ "command": "not_a_real_command" }));
        assert_eq!(answer["code"], -1);
    }

    #[test]
    fn create_session_before_start_fails() {
        let ua = UserAgent::new("192.0.2.10");
        let acc = account(&ua, "alice", "192.0.2.10");
        let answer = ua.handle_command(serde_json::json!({ "command": "create_session", "account_id": acc }));
        assert_ne!(answer["code"], 0);
    }

    #[test]
    fn offerer_without_ice_sends_offer_and_reaches_established_on_loopback_answer() {
        let ua = started_ua("192.0.2.11");
        ua.handle_command(serde_json::json!({ "command": "config", "ice_enabled": false }));
        let acc = account(&ua, "alice", "192.0.2.11");

        let create = ua.handle_command(serde_json::json!({ "command": "create_session", "account_id": acc }));
        assert_eq!(create["code"], 0);
        let session_id = create["session_id"].as_u64().unwrap();

        let start = ua.handle_command(serde_json::json!({
            "command": "start_session",
            "session_id": session_id,
            "peer_uri": "sip:bob@192.0.2.12",
        }));
        assert_eq!(start["code"], 0);

        let event = ua.handle_command(serde_json::json!({ "command": "wait_for_event", "timeout_ms": 10 }));
        assert_eq!(event["event"], "session_new");
        ua.handle_command(serde_json::json!({ "command": "stop" }));
    }

    #[test]
    fn two_uas_bridged_over_loopback_dialog_reach_established() {
        let ua_a = started_ua("192.0.2.21");
        let ua_b = started_ua("192.0.2.22");
        ua_a.handle_command(serde_json::json!({ "command": "config", "ice_enabled": false }));
        ua_b.handle_command(serde_json::json!({ "command": "config", "ice_enabled": false }));

        let acc_a = account(&ua_a, "alice", "192.0.2.21");
        let acc_b = account(&ua_b, "bob", "192.0.2.22");

        let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();

        // The acceptor auto-accepts re-offers but the *first* offer needs
        // an explicit accept() from the application.
        let accept = ua_b.handle_command(serde_json::json!({ "command": "accept_session", "session_id": id_b }));
        assert_eq!(accept["code"], 0);

        assert_eq!(ua_a.sessions.lock().get(&id_a).unwrap().state(), rvoip_session_core::SessionState::Connected);
        assert_eq!(ua_b.sessions.lock().get(&id_b).unwrap().state(), rvoip_session_core::SessionState::Connected);

        ua_a.handle_command(serde_json::json!({ "command": "stop" }));
        ua_b.handle_command(serde_json::json!({ "command": "stop" }));
    }
}
