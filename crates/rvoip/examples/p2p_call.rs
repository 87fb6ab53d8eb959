//! Two in-process user agents placing and answering a call over a
//! [`rvoip::LoopbackBridge`] instead of a real SIP transport — the
//! runnable counterpart to `tests/end_to_end.rs`, driven entirely through
//! the JSON command bus.

use rvoip_session_core::config::MasterProfile;
use rvoip::UserAgent;
use serde_json::json;

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let mut config = MasterProfile::default();
    config.ice_enabled = false;

    let alice = UserAgent::with_config("192.0.2.10", config.clone());
    let bob = UserAgent::with_config("192.0.2.20", config);

    alice.handle_command(json!({ "command": "start" }));
    bob.handle_command(json!({ "command": "start" }));

    let alice_account = alice.handle_command(json!({
        "command": "create_account",
        "username": "alice",
        "domain": "192.0.2.10",
        "password": "secret",
    }))["account_id"]
        .as_u64()
        .unwrap();

    let bob_account = bob.handle_command(json!({
        "command": "create_account",
        "username": "bob",
        "domain": "192.0.2.20",
        "password": "secret",
    }))["account_id"]
        .as_u64()
        .unwrap();

    let (alice_session, bob_session) = alice.dial(alice_account, &bob, bob_account).expect("dial");
    println!("alice placed session {alice_session}, bob received session {bob_session}");

    let accept = bob.handle_command(json!({ "command": "accept_session", "session_id": bob_session }));
    println!("bob accept_session -> {accept}");

    let event = alice.handle_command(json!({ "command": "wait_for_event", "timeout_ms": 200 }));
    println!("alice observed event -> {event}");

    bob.attach_null_audio_device(bob_session).expect("attach device");
    alice.attach_null_audio_device(alice_session).expect("attach device");
    std::thread::sleep(std::time::Duration::from_millis(100));

    let stats = alice.handle_command(json!({ "command": "get_media_stats", "session_id": alice_session }));
    println!("alice media stats -> {stats}");

    alice.handle_command(json!({ "command": "stop_session", "session_id": alice_session }));
    bob.handle_command(json!({ "command": "stop_session", "session_id": bob_session }));
    alice.handle_command(json!({ "command": "stop" }));
    bob.handle_command(json!({ "command": "stop" }));
}
