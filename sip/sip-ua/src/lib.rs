//! # SIP User Agent engine
//!
//! Registration, call state machines and the event contract of the dialtone user agent.
//!
//! Notable types are
//!
//! - [`UserAgent`] the sans-IO engine, driven with [`Command`]s, received messages and the current time
//! - [`Event`] everything the engine reports, drained with [`UserAgent::poll_event`]
//! - [`SessionDirectory`] the registration and live calls, published as immutable [`DirectorySnapshot`]s
//! - [`MediaBackend`] the external media subsystem the engine negotiates sessions with
//!
//! The modules [`dialog`], [`sdp`] and [`util`] contain implementation details used inside the
//! engine and can be used for more specialized use cases.

pub mod account;
pub mod dialog;
pub mod directory;
pub mod event;
pub mod media;
pub mod sdp;
pub mod util;

mod agent;
mod call;
mod registration;

pub use account::Account;
pub use agent::{
    Command, DEFAULT_MAX_CALLS, DEFAULT_NO_ANSWER_TIMEOUT, DEFAULT_REFRESH_FRACTION, UserAgent,
    UserAgentConfig,
};
pub use call::{DEFAULT_DECLINE_CODE, validate_dtmf};
pub use directory::{CallSnapshot, DirectorySnapshot, RegistrationSnapshot, SessionDirectory};
pub use event::{
    CallId, CallIds, CallState, CloseReason, Direction, Event, EventKind, Failure, RegistrationState,
    UpdateOperation,
};
pub use media::{MediaBackend, MediaError, NullMedia};

/// A control operation was refused, no message was sent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("operation `{0}` is not possible in the current state")]
    InvalidState(&'static str),
    #[error("invalid uri `{0}`")]
    InvalidUri(String),
    #[error("invalid DTMF digit `{0}`")]
    InvalidDtmf(char),
    #[error("too many calls")]
    TooManyCalls,
    #[error("unknown call {0}")]
    UnknownCall(CallId),
    #[error("Call-ID `{0}` is already in use")]
    DuplicateCallId(String),
}
