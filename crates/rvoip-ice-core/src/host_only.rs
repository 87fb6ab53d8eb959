//! A host-candidate-only [`IceAgent`] reference implementation.
//!
//! No STUN/TURN transactions, no priority-ordered pair checking: gathering
//! produces one host candidate per registered component and completes
//! synchronously; "connectivity checking" nominates the peer's advertised
//! default address outright. This is enough to drive the session state
//! machine's offer/answer and media-path wiring end to end — exactly the
//! amount of ICE behavior spec §1 asks the core to assume of its collaborator,
//! no more.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rvoip_sip_types::sdp::{Candidate, CandidateType};

use crate::agent::{ComponentId, IceAgent, IceEvent, IceEventSink, StreamId};
use crate::error::{IceError, Result};

struct StreamState {
    ufrag: String,
    pwd: String,
    local_ports: HashMap<ComponentId, u16>,
    remote_candidates: Vec<Candidate>,
    remote_default: Option<(String, u16)>,
    nominated: HashMap<ComponentId, SocketAddr>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            ufrag: random_ice_token(4),
            pwd: random_ice_token(22),
            local_ports: HashMap::new(),
            remote_candidates: Vec::new(),
            remote_default: None,
            nominated: HashMap::new(),
        }
    }
}

fn random_ice_token(len: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

pub struct HostOnlyIceAgent {
    local_ip: String,
    sink: Arc<dyn IceEventSink>,
    streams: Mutex<HashMap<StreamId, StreamState>>,
    next_id: AtomicU32,
}

impl HostOnlyIceAgent {
    pub fn new(local_ip: impl Into<String>, sink: Arc<dyn IceEventSink>) -> Self {
        Self {
            local_ip: local_ip.into(),
            sink,
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    fn with_stream<T>(&self, id: StreamId, f: impl FnOnce(&mut StreamState) -> Result<T>) -> Result<T> {
        let mut streams = self.streams.lock();
        let state = streams.get_mut(&id).ok_or(IceError::UnknownStream(id))?;
        f(state)
    }
}

impl IceAgent for HostOnlyIceAgent {
    fn add_stream(&self) -> StreamId {
        let id = StreamId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.streams.lock().insert(id, StreamState::new());
        id
    }

    fn add_component(&self, stream: StreamId, local_port4: u16, _local_port6: Option<u16>) -> Result<ComponentId> {
        self.with_stream(stream, |state| {
            let component = if state.local_ports.is_empty() {
                ComponentId::RTP
            } else {
                ComponentId::RTCP
            };
            state.local_ports.insert(component, local_port4);
            Ok(component)
        })
    }

    fn gather_candidates(&self, stream: StreamId) {
        // Host-only gathering is instantaneous; report completion inline.
        if self.streams.lock().contains_key(&stream) {
            tracing::debug!(?stream, "host-only ICE gather complete");
            self.sink.on_ice_event(IceEvent::GatheringComplete { stream });
        } else {
            tracing::warn!(?stream, "gather_candidates on unknown stream");
        }
    }

    fn fill_candidate_list(&self, stream: StreamId, component: ComponentId) -> Result<Vec<Candidate>> {
        self.with_stream(stream, |state| {
            let port = *state
                .local_ports
                .get(&component)
                .ok_or(IceError::UnknownComponent(component, stream))?;
            Ok(vec![Candidate {
                foundation: "1".to_string(),
                component: component.0,
                transport: "UDP".to_string(),
                priority: 2_130_706_431 - u32::from(component.0),
                address: self.local_ip.clone(),
                port,
                typ: CandidateType::Host,
                related_address: None,
                related_port: None,
            }])
        })
    }

    fn local_credentials(&self, stream: StreamId) -> Result<(String, String)> {
        self.with_stream(stream, |state| Ok((state.ufrag.clone(), state.pwd.clone())))
    }

    fn process_sdp_offer(
        &self,
        stream: StreamId,
        remote_ufrag: &str,
        remote_pwd: &str,
        remote_candidates: &[Candidate],
        default_ip: &str,
        default_port: u16,
        _defer_relayed: bool,
    ) -> Result<()> {
        self.with_stream(stream, |state| {
            let restarted = !state.ufrag.is_empty() && (remote_ufrag.is_empty() || remote_pwd.is_empty());
            if restarted {
                tracing::debug!(?stream, "ICE restart detected on incoming offer");
                state.nominated.clear();
            }
            state.remote_candidates = remote_candidates.to_vec();
            state.remote_default = Some((default_ip.to_string(), default_port));
            Ok(())
        })
    }

    fn check_connectivity(&self, stream: StreamId) {
        let outcome = self.with_stream(stream, |state| {
            let target = state
                .remote_candidates
                .iter()
                .find(|c| c.component == ComponentId::RTP.0)
                .map(|c| (c.address.clone(), c.port))
                .or_else(|| state.remote_default.clone());

            match target.and_then(|(ip, port)| SocketAddr::from_str(&format!("{ip}:{port}")).ok()) {
                Some(addr) => {
                    for component in state.local_ports.keys().copied().collect::<Vec<_>>() {
                        state.nominated.insert(component, addr);
                    }
                    Ok(Some(addr))
                }
                None => Ok(None),
            }
        });

        match outcome {
            Ok(Some(addr)) => {
                let components: Vec<ComponentId> = {
                    let streams = self.streams.lock();
                    streams
                        .get(&stream)
                        .map(|s| s.local_ports.keys().copied().collect())
                        .unwrap_or_default()
                };
                for component in components {
                    self.sink.on_ice_event(IceEvent::ConnectivityEstablished { stream, component, remote: addr });
                }
            }
            Ok(None) => {
                tracing::warn!(?stream, "ICE connectivity check found no remote candidates");
                self.sink.on_ice_event(IceEvent::ConnectivityFailed { stream });
            }
            Err(err) => {
                tracing::warn!(?stream, %err, "ICE connectivity check on unknown stream");
            }
        }
    }

    fn remote_address(&self, stream: StreamId, component: ComponentId) -> Option<SocketAddr> {
        self.streams.lock().get(&stream)?.nominated.get(&component).copied()
    }

    fn refresh_pwd_ufrag(&self, stream: StreamId) {
        if let Some(state) = self.streams.lock().get_mut(&stream) {
            state.ufrag = random_ice_token(4);
            state.pwd = random_ice_token(22);
            state.nominated.clear();
        }
    }

    fn remove_stream(&self, stream: StreamId) {
        self.streams.lock().remove(&stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        events: StdMutex<Vec<IceEvent>>,
    }

    impl IceEventSink for RecordingSink {
        fn on_ice_event(&self, event: IceEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn gather_then_check_nominates_peer_default_address() {
        let sink = Arc::new(RecordingSink { events: StdMutex::new(Vec::new()) });
        let agent = HostOnlyIceAgent::new("198.51.100.1", sink.clone());

        let stream = agent.add_stream();
        let rtp = agent.add_component(stream, 20000, None).unwrap();
        agent.gather_candidates(stream);
        let candidates = agent.fill_candidate_list(stream, rtp).unwrap();
        assert_eq!(candidates[0].typ, CandidateType::Host);

        agent
            .process_sdp_offer(stream, "remoteufrag", "remotepasswordremotepassword", &[], "203.0.113.9", 40000, false)
            .unwrap();
        agent.check_connectivity(stream);

        let addr = agent.remote_address(stream, rtp).unwrap();
        assert_eq!(addr.port(), 40000);

        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, IceEvent::GatheringComplete { .. })));
        assert!(events.iter().any(|e| matches!(e, IceEvent::ConnectivityEstablished { .. })));
    }

    #[test]
    fn check_connectivity_with_no_candidates_fails() {
        let sink = Arc::new(RecordingSink { events: StdMutex::new(Vec::new()) });
        let agent = HostOnlyIceAgent::new("198.51.100.1", sink.clone());
        let stream = agent.add_stream();
        agent.add_component(stream, 20000, None).unwrap();
        agent.check_connectivity(stream);
        let events = sink.events.lock().unwrap();
        assert!(matches!(events[0], IceEvent::ConnectivityFailed { .. }));
    }
}
