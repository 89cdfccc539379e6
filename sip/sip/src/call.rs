use crate::{Client, Error};
use sip_ua::account::parse_uri;
use sip_ua::{AgentError, CallId, CallState, Command, Direction, validate_dtmf};
use sip_types::StatusCode;
use std::fmt;

/// Handle to a call of a [`Client`]
///
/// Operations are checked against the call's last known state and refused synchronously
/// with [`AgentError::InvalidState`] when they cannot apply. Everything else is reported
/// with events.
#[derive(Clone)]
pub struct Call {
    id: CallId,
    client: Client,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call").field("id", &self.id).finish()
    }
}

impl Call {
    pub(crate) fn new(id: CallId, client: Client) -> Self {
        Self { id, client }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    /// `Closed` once the call is gone
    pub fn state(&self) -> CallState {
        self.client
            .call_state(self.id)
            .map_or(CallState::Closed, |(_, state)| state)
    }

    /// Accept an incoming call
    pub fn answer(&self) -> Result<(), Error> {
        self.check("answer", |direction, state| {
            direction == Direction::Incoming
                && matches!(state, CallState::Incoming | CallState::Ringing)
        })?;

        self.client.command(Command::Answer(self.id))
    }

    /// End the call: declines an incoming call with `code` (486 by default), cancels an
    /// unanswered outgoing call, sends BYE otherwise
    pub fn hangup(&self, code: Option<StatusCode>, reason: Option<&str>) -> Result<(), Error> {
        self.check("hangup", |_, state| state != CallState::Closed)?;

        self.client.command(Command::Hangup {
            call: self.id,
            code,
            reason: reason.map(str::to_owned),
        })
    }

    pub fn hold(&self) -> Result<(), Error> {
        self.check_established("hold")?;
        self.client.command(Command::Hold(self.id))
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.check_established("resume")?;
        self.client.command(Command::Resume(self.id))
    }

    pub fn is_mic_muted(&self) -> bool {
        self.client
            .local()
            .lock()
            .muted
            .get(&self.id)
            .copied()
            .unwrap_or_default()
    }

    /// Mute or unmute the local audio, no signaling takes place
    pub fn set_mic_muted(&self, muted: bool) -> Result<(), Error> {
        self.check("set_mic_muted", |_, state| state != CallState::Closed)?;

        self.client.local().lock().muted.insert(self.id, muted);

        self.client.command(Command::SetMuted {
            call: self.id,
            muted,
        })
    }

    /// Returns the new mute state
    pub fn toggle_mic_muted(&self) -> Result<bool, Error> {
        let muted = !self.is_mic_muted();
        self.set_mic_muted(muted)?;
        Ok(muted)
    }

    /// Send a DTMF digit (`0-9`, `*`, `#`, `A-D`) with SIP INFO
    pub fn send_dtmf(&self, digit: char) -> Result<(), Error> {
        let digit = validate_dtmf(digit)?;

        self.check_established("send_dtmf")?;

        self.client.command(Command::SendDtmf {
            call: self.id,
            digit,
        })
    }

    /// Ask the peer to call `uri` instead (blind transfer)
    pub fn transfer(&self, uri: &str) -> Result<(), Error> {
        parse_uri(uri)?;

        self.check_established("transfer")?;

        self.client.command(Command::Transfer {
            call: self.id,
            target: uri.to_owned(),
        })
    }

    fn check_established(&self, operation: &'static str) -> Result<(), Error> {
        self.check(operation, |_, state| state == CallState::Established)
    }

    fn check<F>(&self, operation: &'static str, allowed: F) -> Result<(), Error>
    where
        F: FnOnce(Direction, CallState) -> bool,
    {
        let (direction, state) = self
            .client
            .call_state(self.id)
            .ok_or(AgentError::UnknownCall(self.id))?;

        if allowed(direction, state) {
            Ok(())
        } else {
            Err(AgentError::InvalidState(operation).into())
        }
    }
}
