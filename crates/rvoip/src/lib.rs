//! The facade crate: accounts, sessions, the media/device wiring, and the
//! JSON command/event bus (spec §3, §4.7, §6) sitting on top of
//! `rvoip-sip-types`, `rvoip-ice-core`, `rvoip-rtp-core`, `rvoip-codec-core`
//! and `rvoip-session-core`.
//!
//! Everything below `UserAgent` is borrowed wholesale from those crates;
//! what this crate adds is the one missing external collaborator the
//! session state machine needs to actually run end to end without a real
//! SIP stack or sound card underneath: [`dialog_null`]/[`dialog_loopback`]
//! stand in for signaling, [`device`] stands in for the audio device.

pub mod agent;
pub mod device;
pub mod dialog_loopback;
pub mod dialog_null;
pub mod error;
pub mod queue;
pub mod wire;

pub use agent::UserAgent;
pub use device::{AudioDeviceSink, NullAudioDevice};
pub use dialog_loopback::{LoopbackBridge, LoopbackDialog, Side};
pub use dialog_null::NullDialogHandle;
pub use error::{Result, UaError};
pub use queue::{CommandQueue, EventQueue};
pub use wire::{Answer, Command, Event, CODE_ERROR, CODE_SUCCESS, CODE_TIMEOUT, CODE_UNSUPPORTED};
