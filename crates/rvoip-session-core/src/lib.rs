//! Accounts, sessions, and the call state machine that binds SIP signaling
//! to ICE and RTP media. See [`session::Session`] for the state machine
//! itself; the other modules are its supporting collaborators.

pub mod account;
pub mod config;
pub mod dialog;
pub mod error;
pub mod provider;
pub mod session;

pub use account::{Account, CachedChallenge, Credentials, RegistrationState};
pub use config::{MasterProfile, StunServer, TransportSelector, TurnServer};
pub use dialog::DialogHandle;
pub use error::{Result, SessionError};
pub use provider::{AudioProvider, MediaProvider};
pub use session::{
    EstablishedKind, MediaStream, Session, SessionEvent, SessionEventSink, SessionRole, SessionState,
    TerminatedReason,
};
