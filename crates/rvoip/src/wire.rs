//! JSON command/event wire format (spec §4.7, §6).
//!
//! Commands and events are loosely-typed JSON objects with a small fixed
//! envelope (`command`/`event` plus `code`) and a bag of command-specific
//! fields, matching spec §6 ("Every answer carries integer `code`... and
//! echoes the `command` field. Events carry `event` string and typed
//! payload fields"). A `serde_json::Map` carries the variable part rather
//! than one struct per command — the set of commands is open-ended (spec
//! §4.7's table is "recognises", not exhaustive) and a map avoids an enum
//! variant explosion for what is, on the wire, just an object.

use serde_json::{Map, Value};

/// `code = 0` on every successful answer (spec §6).
pub const CODE_SUCCESS: i64 = 0;
/// Answer code for a command name the dispatcher does not recognise
/// (spec §6: "Unknown commands answer with `code` = unsupported").
pub const CODE_UNSUPPORTED: i64 = -1;
/// Answer code for a command whose fields/id referred to something that
/// does not exist (unknown account/session id) or was otherwise invalid.
pub const CODE_ERROR: i64 = -2;
/// Answer code for `wait_for_event` when no event arrived before the
/// caller's timeout elapsed.
pub const CODE_TIMEOUT: i64 = -3;

/// One command read off the JSON command queue.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub fields: Map<String, Value>,
    /// Opaque application id propagated into the matching answer/event,
    /// glossary "Fingerprint", if the caller supplied one.
    pub fingerprint: Option<Value>,
}

impl Command {
    pub fn from_json(value: Value) -> Option<Self> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            _ => return None,
        };
        let name = match obj.remove("command") {
            Some(Value::String(s)) => s,
            _ => return None,
        };
        let fingerprint = obj.remove("fingerprint");
        Some(Command { name, fields: obj, fingerprint })
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.field(key).and_then(Value::as_u64)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.field(key).and_then(Value::as_bool)
    }
}

/// The answer handed back for one [`Command`] (spec §6).
#[derive(Debug, Clone)]
pub struct Answer {
    pub command: String,
    pub code: i64,
    pub fields: Map<String, Value>,
    pub fingerprint: Option<Value>,
}

impl Answer {
    pub fn ok(command: &Command) -> Self {
        Answer { command: command.name.clone(), code: CODE_SUCCESS, fields: Map::new(), fingerprint: command.fingerprint.clone() }
    }

    pub fn error(command: &Command, code: i64, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String(message.into()));
        Answer { command: command.name.clone(), code, fields, fingerprint: command.fingerprint.clone() }
    }

    pub fn unsupported(name: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String(format!("unrecognised command '{name}'")));
        Answer { command: name.to_string(), code: CODE_UNSUPPORTED, fields, fingerprint: None }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("command".to_string(), Value::String(self.command.clone()));
        obj.insert("code".to_string(), Value::from(self.code));
        if let Some(fp) = &self.fingerprint {
            obj.insert("fingerprint".to_string(), fp.clone());
        }
        Value::Object(obj)
    }
}

/// One entry on the JSON event queue (spec §3, §4.7).
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(name: &str) -> Self {
        Event { name: name.to_string(), fields: Map::new() }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("event".to_string(), Value::String(self.name.clone()));
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_roundtrips_into_the_answer_under_its_own_key() {
        let cmd = Command::from_json(serde_json::json!({
            "command": "create_account",
            "fingerprint": "corr-1",
        }))
        .unwrap();
        assert_eq!(cmd.name, "create_account");
        let answer = Answer::ok(&cmd).with_field("account_id", 7u64);
        let json = answer.to_json();
        assert_eq!(json["code"], 0);
        assert_eq!(json["account_id"], 7);
        assert_eq!(json["fingerprint"], "corr-1");
    }

    #[test]
    fn non_object_command_is_rejected() {
        assert!(Command::from_json(serde_json::json!("start")).is_none());
    }
}
