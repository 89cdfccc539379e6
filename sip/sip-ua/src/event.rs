//! Events produced by the user agent and the payload types they carry

use sip_core::TransportError;
use sip_types::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Reference to a call, stable for the lifetime of the call and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub fn into_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Allocates [`CallId`]s, shared between the engine and its host so that outgoing calls can
/// be referenced before the engine has seen them
#[derive(Debug, Clone, Default)]
pub struct CallIds(Arc<AtomicU64>);

impl CallIds {
    pub fn next(&self) -> CallId {
        CallId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// INVITE sent, no ringing indication yet
    Calling,
    /// INVITE received, not yet ringing
    Incoming,
    Ringing,
    Established,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    /// Registered and renewing the binding
    Refreshing,
    Unregistering,
    Failed,
}

impl RegistrationState {
    /// A binding exists on the registrar
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered | Self::Refreshing)
    }
}

/// Terminal failure of a transaction, reported to its owner
#[derive(Debug, Clone, thiserror::Error)]
pub enum Failure {
    #[error("transaction timed out")]
    TransactionTimeout,
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("rejected with {code}{}", .reason.as_ref().map(|r| format!(" {r}")).unwrap_or_default())]
    Rejected {
        code: StatusCode,
        reason: Option<String>,
    },
}

/// Why a call was closed
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// BYE sent by us
    LocalHangup,
    /// BYE received
    RemoteHangup,
    /// Outgoing call cancelled by us before it was answered
    Cancelled,
    /// Incoming call cancelled by the caller before it was answered
    RemoteCancelled,
    /// Incoming call declined by us with the given code
    Declined(StatusCode),
    /// Outgoing call rejected by the callee
    Rejected {
        code: StatusCode,
        reason: Option<String>,
    },
    /// Outgoing call got no final response in time
    NoAnswer,
    Failed(Failure),
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::TransactionTimeout, Self::TransactionTimeout)
            | (Self::AuthenticationFailed, Self::AuthenticationFailed) => true,
            (Self::Transport(a), Self::Transport(b)) => a.to_string() == b.to_string(),
            (
                Self::Rejected { code, reason },
                Self::Rejected {
                    code: other_code,
                    reason: other_reason,
                },
            ) => code == other_code && reason == other_reason,
            _ => false,
        }
    }
}

/// Session modification which failed without changing the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperation {
    Hold,
    Resume,
}

/// Everything the user agent reports to its host
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WillRegister,
    DidRegister {
        /// Expiry of the binding, the smaller one of requested and granted
        expires: Duration,
    },
    FailedRegister {
        failure: Failure,
    },
    WillUnregister,
    DidUnregister,

    CallOutgoing {
        call: CallId,
        remote: String,
    },
    CallIncoming {
        call: CallId,
        remote: String,
        display_name: Option<String>,
    },
    CallRinging {
        call: CallId,
    },
    CallProcess {
        call: CallId,
        code: StatusCode,
    },
    CallEstablished {
        call: CallId,
    },
    CallClosed {
        call: CallId,
        reason: CloseReason,
    },
    CallHeld {
        call: CallId,
        /// `true` if the hold was requested by us
        local: bool,
    },
    CallResumed {
        call: CallId,
        local: bool,
    },
    CallUpdateFailed {
        call: CallId,
        operation: UpdateOperation,
        failure: Failure,
    },
    CallTransferAccepted {
        call: CallId,
    },
    CallTransferFailed {
        call: CallId,
        failure: Failure,
    },
    CallDtmfStart {
        call: CallId,
        digit: char,
        /// `true` if the digit was received from the peer
        remote: bool,
    },
    CallDtmfEnd {
        call: CallId,
        digit: char,
        remote: bool,
    },
}

/// Discriminant of [`Event`], used to subscribe to a subset of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WillRegister,
    DidRegister,
    FailedRegister,
    WillUnregister,
    DidUnregister,
    CallOutgoing,
    CallIncoming,
    CallRinging,
    CallProcess,
    CallEstablished,
    CallClosed,
    CallHeld,
    CallResumed,
    CallUpdateFailed,
    CallTransferAccepted,
    CallTransferFailed,
    CallDtmfStart,
    CallDtmfEnd,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::WillRegister => EventKind::WillRegister,
            Event::DidRegister { .. } => EventKind::DidRegister,
            Event::FailedRegister { .. } => EventKind::FailedRegister,
            Event::WillUnregister => EventKind::WillUnregister,
            Event::DidUnregister => EventKind::DidUnregister,
            Event::CallOutgoing { .. } => EventKind::CallOutgoing,
            Event::CallIncoming { .. } => EventKind::CallIncoming,
            Event::CallRinging { .. } => EventKind::CallRinging,
            Event::CallProcess { .. } => EventKind::CallProcess,
            Event::CallEstablished { .. } => EventKind::CallEstablished,
            Event::CallClosed { .. } => EventKind::CallClosed,
            Event::CallHeld { .. } => EventKind::CallHeld,
            Event::CallResumed { .. } => EventKind::CallResumed,
            Event::CallUpdateFailed { .. } => EventKind::CallUpdateFailed,
            Event::CallTransferAccepted { .. } => EventKind::CallTransferAccepted,
            Event::CallTransferFailed { .. } => EventKind::CallTransferFailed,
            Event::CallDtmfStart { .. } => EventKind::CallDtmfStart,
            Event::CallDtmfEnd { .. } => EventKind::CallDtmfEnd,
        }
    }

    /// The call this event belongs to, `None` for registration events
    pub fn call(&self) -> Option<CallId> {
        match self {
            Event::WillRegister
            | Event::DidRegister { .. }
            | Event::FailedRegister { .. }
            | Event::WillUnregister
            | Event::DidUnregister => None,
            Event::CallOutgoing { call, .. }
            | Event::CallIncoming { call, .. }
            | Event::CallRinging { call }
            | Event::CallProcess { call, .. }
            | Event::CallEstablished { call }
            | Event::CallClosed { call, .. }
            | Event::CallHeld { call, .. }
            | Event::CallResumed { call, .. }
            | Event::CallUpdateFailed { call, .. }
            | Event::CallTransferAccepted { call }
            | Event::CallTransferFailed { call, .. }
            | Event::CallDtmfStart { call, .. }
            | Event::CallDtmfEnd { call, .. } => Some(*call),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn call_ids_are_unique_across_clones() {
        let ids = CallIds::default();
        let other = ids.clone();

        let a = ids.next();
        let b = other.next();

        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn failure_display() {
        let failure = Failure::Rejected {
            code: StatusCode::BUSY_HERE,
            reason: Some("Busy Here".into()),
        };

        assert_eq!(failure.to_string(), "rejected with 486 Busy Here");
        assert_eq!(Failure::TransactionTimeout.to_string(), "transaction timed out");
    }

    #[test]
    fn event_call_reference() {
        let call = CallIds::default().next();

        assert_eq!(Event::CallRinging { call }.call(), Some(call));
        assert_eq!(Event::WillRegister.call(), None);
        assert_eq!(
            Event::CallClosed {
                call,
                reason: CloseReason::NoAnswer
            }
            .kind(),
            EventKind::CallClosed
        );
    }
}
