//! Immutable configuration record handed at construction (spec §9: "Global
//! mixer constants... are an immutable configuration record... never
//! process globals"). Merged via the `config` bus command (spec §4.7).

/// Preferred SIP transport (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSelector {
    All,
    Udp,
    Tcp,
    Tls,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StunServer {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TurnServer {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// The master configuration profile: transport/network enables, RTP port
/// range, mixer sizing, codec priority, and defer/relay policy (spec §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MasterProfile {
    pub transport: TransportSelector,
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
    pub stun: Option<StunServer>,
    pub turn: Option<TurnServer>,
    pub registration_duration_secs: u32,
    pub keepalive_interval_secs: u32,
    pub dns_cache_ttl_secs: u32,
    pub rtp_port_start: u16,
    pub rtp_port_finish: u16,
    pub rtcp_mux: bool,
    /// Whether sessions run candidate gathering/checks at all. With this
    /// off, the first offer is sent immediately and media goes straight to
    /// the peer's advertised `c=`/`m=` address (spec §4.1 "First offer is
    /// sent only after ICE candidate gathering completes (or immediately
    /// if ICE is disabled)").
    pub ice_enabled: bool,
    pub defer_relayed_candidates: bool,
    pub mixer_channel_capacity: usize,
    pub device_sample_rate: u32,
    pub packet_time_ms: u32,
    pub srtp_enabled: bool,
    pub root_certs_pem: Vec<String>,
    pub user_agent: String,
}

impl Default for MasterProfile {
    fn default() -> Self {
        Self {
            transport: TransportSelector::All,
            ipv4_enabled: true,
            ipv6_enabled: false,
            stun: None,
            turn: None,
            registration_duration_secs: 3600,
            keepalive_interval_secs: 30,
            dns_cache_ttl_secs: 300,
            rtp_port_start: 20000,
            rtp_port_finish: 30000,
            rtcp_mux: false,
            ice_enabled: true,
            defer_relayed_candidates: false,
            mixer_channel_capacity: 8,
            device_sample_rate: 8000,
            packet_time_ms: 20,
            srtp_enabled: false,
            root_certs_pem: Vec::new(),
            user_agent: "rvoip".to_string(),
        }
    }
}

impl MasterProfile {
    /// Applies a partial JSON `config` command over this profile, leaving
    /// unspecified fields untouched (spec §4.7 "Merge configuration").
    pub fn merge_json(&mut self, patch: &serde_json::Value) -> Result<(), serde_json::Error> {
        let mut value = serde_json::to_value(&*self)?;
        merge_json_objects(&mut value, patch);
        *self = serde_json::from_value(value)?;
        Ok(())
    }
}

fn merge_json_objects(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) = (base.clone(), patch) {
        let mut merged = base_map;
        for (key, value) in patch_map {
            match (merged.get_mut(key), value) {
                (Some(existing), serde_json::Value::Object(_)) => merge_json_objects(existing, value),
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        *base = serde_json::Value::Object(merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_only_named_fields() {
        let mut profile = MasterProfile::default();
        profile.merge_json(&serde_json::json!({ "rtp_port_start": 40000 })).unwrap();
        assert_eq!(profile.rtp_port_start, 40000);
        assert_eq!(profile.rtp_port_finish, 30000);
    }
}
