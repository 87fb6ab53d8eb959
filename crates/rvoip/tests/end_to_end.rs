//! End-to-end scenarios driven entirely through the JSON command bus, two
//! `UserAgent`s bridged over a loopback dialog (spec §8).

use rvoip_session_core::config::MasterProfile;
use rvoip::UserAgent;
use serde_json::json;

fn started(ip: &str, config: MasterProfile) -> std::sync::Arc<UserAgent> {
    let ua = UserAgent::with_config(ip, config);
    assert_eq!(ua.handle_command(json!({ "command": "start" }))["code"], 0);
    ua
}

fn account(ua: &std::sync::Arc<UserAgent>, user: &str, domain: &str) -> u64 {
    let answer = ua.handle_command(json!({
        "command": "create_account",
        "username": user,
        "domain": domain,
        "password": "secret",
    }));
    assert_eq!(answer["code"], 0);
    answer["account_id"].as_u64().unwrap()
}

#[test]
fn offerer_without_ice_reaches_connected_and_acceptor_auto_answers_reoffer() {
    let mut config = MasterProfile::default();
    config.ice_enabled = false;
    let ua_a = started("192.0.2.101", config.clone());
    let ua_b = started("192.0.2.102", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.101");
    let acc_b = account(&ua_b, "bob", "192.0.2.102");

    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();

    let accept = ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));
    assert_eq!(accept["code"], 0);

    let established_a = ua_a.handle_command(json!({ "command": "wait_for_event", "timeout_ms": 50 }));
    assert_eq!(established_a["event"], "session_new");

    let stats = ua_a.handle_command(json!({ "command": "get_media_stats", "session_id": id_a }));
    assert_eq!(stats["code"], 0);
    assert!(stats["streams"].is_array());

    ua_a.handle_command(json!({ "command": "stop_session", "session_id": id_a }));
    ua_b.handle_command(json!({ "command": "stop_session", "session_id": id_b }));
    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

#[test]
fn acceptor_with_ice_and_rtcp_mux_negotiates_to_established() {
    let mut config = MasterProfile::default();
    config.ice_enabled = true;
    config.rtcp_mux = true;
    let ua_a = started("192.0.2.111", config.clone());
    let ua_b = started("192.0.2.112", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.111");
    let acc_b = account(&ua_b, "bob", "192.0.2.112");

    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();
    let accept = ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));
    assert_eq!(accept["code"], 0);

    ua_a.handle_command(json!({ "command": "stop_session", "session_id": id_a }));
    ua_b.handle_command(json!({ "command": "stop_session", "session_id": id_b }));
    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

#[test]
fn srtp_suite_negotiation_end_to_end() {
    let mut config = MasterProfile::default();
    config.ice_enabled = false;
    config.srtp_enabled = true;
    let ua_a = started("192.0.2.121", config.clone());
    let ua_b = started("192.0.2.122", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.121");
    let acc_b = account(&ua_b, "bob", "192.0.2.122");

    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();
    let accept = ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));
    assert_eq!(accept["code"], 0);

    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

#[test]
fn network_changed_refreshes_every_active_session() {
    let mut config = MasterProfile::default();
    config.ice_enabled = false;
    let ua_a = started("192.0.2.131", config.clone());
    let ua_b = started("192.0.2.132", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.131");
    let acc_b = account(&ua_b, "bob", "192.0.2.132");
    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();
    ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));

    let changed = ua_a.handle_command(json!({ "command": "network_changed" }));
    assert_eq!(changed["code"], 0);

    ua_a.handle_command(json!({ "command": "stop_session", "session_id": id_a }));
    ua_b.handle_command(json!({ "command": "stop_session", "session_id": id_b }));
    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

#[test]
fn dtmf_digit_is_accepted_once_connected() {
    let mut config = MasterProfile::default();
    config.ice_enabled = false;
    let ua_a = started("192.0.2.141", config.clone());
    let ua_b = started("192.0.2.142", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.141");
    let acc_b = account(&ua_b, "bob", "192.0.2.142");
    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();
    ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));

    let digit = ua_a.handle_command(json!({ "command": "queue_dtmf", "session_id": id_a, "digit": "5" }));
    assert_eq!(digit["code"], 0);

    let bad = ua_a.handle_command(json!({ "command": "queue_dtmf", "session_id": id_a, "digit": "Z" }));
    assert_ne!(bad["code"], 0);

    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

#[test]
fn pause_then_resume_round_trips_through_the_bus() {
    let mut config = MasterProfile::default();
    config.ice_enabled = false;
    let ua_a = started("192.0.2.151", config.clone());
    let ua_b = started("192.0.2.152", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.151");
    let acc_b = account(&ua_b, "bob", "192.0.2.152");
    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();
    ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));

    assert_eq!(ua_a.handle_command(json!({ "command": "pause_session", "session_id": id_a }))["code"], 0);
    assert_eq!(ua_a.handle_command(json!({ "command": "resume_session", "session_id": id_a }))["code"], 0);

    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

#[test]
fn unknown_session_id_answers_with_error_code() {
    let ua = started("192.0.2.161", MasterProfile::default());
    let answer = ua.handle_command(json!({ "command": "stop_session", "session_id": 9999 }));
    assert_eq!(answer["code"], -2);
}

#[test]
fn refer_is_forwarded_to_the_application_without_transfer_logic() {
    let mut config = MasterProfile::default();
    config.ice_enabled = false;
    let ua_a = started("192.0.2.171", config.clone());
    let ua_b = started("192.0.2.172", config);

    let acc_a = account(&ua_a, "alice", "192.0.2.171");
    let acc_b = account(&ua_b, "bob", "192.0.2.172");
    let (id_a, id_b) = ua_a.dial(acc_a, &ua_b, acc_b).unwrap();
    ua_b.handle_command(json!({ "command": "accept_session", "session_id": id_b }));

    // Drain the `session_new` event `dial()` pushed before asserting on the
    // refer event below.
    let drained = ua_a.handle_command(json!({ "command": "wait_for_event", "timeout_ms": 50 }));
    assert_eq!(drained["event"], "session_new");

    let refer = ua_a.handle_command(json!({
        "command": "deliver_refer",
        "session_id": id_a,
        "target": "sip:carol@192.0.2.200",
        "refer_id": "xfer-1",
    }));
    assert_eq!(refer["code"], 0);

    let event = ua_a.handle_command(json!({ "command": "wait_for_event", "timeout_ms": 50 }));
    assert_eq!(event["event"], "session_referred");
    assert_eq!(event["session_id"], id_a);
    assert_eq!(event["refer_id"], "xfer-1");
    assert!(event["target"].as_str().unwrap().contains("carol"));

    // No new session was created and the original call is still up — the
    // session only propagates the REFER, it never performs the transfer.
    let stats = ua_a.handle_command(json!({ "command": "get_media_stats", "session_id": id_a }));
    assert_eq!(stats["code"], 0);

    ua_a.handle_command(json!({ "command": "stop" }));
    ua_b.handle_command(json!({ "command": "stop" }));
}

