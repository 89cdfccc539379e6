//! The sans-IO user agent engine
//!
//! [`UserAgent`] owns the transaction layer, the registration, every call and the session
//! directory. It never touches a socket or a clock: the host feeds it commands, received
//! messages and the current time, and drains [`Transmit`]s and [`Event`]s from it.

use crate::account::{Account, parse_uri};
use crate::call::Call;
use crate::dialog::{ALLOWED_METHODS, Dialog};
use crate::directory::{DirectorySnapshot, SessionDirectory};
use crate::event::{CallId, CallIds, Event, Failure, RegistrationState};
use crate::media::MediaBackend;
use crate::registration::Registration;
use crate::sdp::CONTENT_TYPE_SDP;
use crate::util::random_string;
use crate::AgentError;
use bytes::Bytes;
use sip_auth::DigestAuthenticator;
use sip_core::timer::TimerQueue;
use sip_core::transport::TransportKind;
use sip_core::{
    IncomingRequest, Message, Request, Response, TimerConfig, Transactions, Transmit, TransportError,
    TsxEvent, TsxKey, parse_message,
};
use sip_types::header::typed::{Contact, UserAgent as UserAgentHeader};
use sip_types::uri::{NameAddr, Param, SipUri};
use sip_types::{Method, Name, StatusCode};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default fraction of the registration expiry after which the binding is refreshed
pub const DEFAULT_REFRESH_FRACTION: f64 = 0.9;

/// Default upper bound of concurrent calls
pub const DEFAULT_MAX_CALLS: usize = 8;

/// Default time an incoming call rings before it is refused with `480`
pub const DEFAULT_NO_ANSWER_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
pub struct UserAgentConfig {
    pub account: Account,

    /// Fraction of the effective expiry after which the registration is refreshed, in (0, 1)
    pub refresh_fraction: f64,

    /// Calls (outgoing and incoming) which may exist at the same time
    pub max_calls: usize,

    /// Incoming calls neither answered nor declined within this time are closed with
    /// [`CloseReason::NoAnswer`](crate::CloseReason::NoAnswer)
    pub no_answer_timeout: Duration,

    pub timers: TimerConfig,

    /// Value of the `User-Agent` header added to every request
    pub user_agent: Option<String>,
}

impl UserAgentConfig {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            refresh_fraction: DEFAULT_REFRESH_FRACTION,
            max_calls: DEFAULT_MAX_CALLS,
            no_answer_timeout: DEFAULT_NO_ANSWER_TIMEOUT,
            timers: TimerConfig::default(),
            user_agent: Some(concat!("dialtone/", env!("CARGO_PKG_VERSION")).into()),
        }
    }
}

/// Control operation, executed in submission order
#[derive(Debug, Clone)]
pub enum Command {
    Register,
    Unregister,
    SetPassword(Option<String>),
    /// Call `target`, the id is allocated by the caller using the shared [`CallIds`]
    MakeCall {
        call: CallId,
        target: String,
    },
    Answer(CallId),
    Hangup {
        call: CallId,
        /// Response code when declining an incoming call, `486` when absent
        code: Option<StatusCode>,
        reason: Option<String>,
    },
    Hold(CallId),
    Resume(CallId),
    SetMuted {
        call: CallId,
        muted: bool,
    },
    SendDtmf {
        call: CallId,
        digit: char,
    },
    Transfer {
        call: CallId,
        target: String,
    },
    /// Hang up every call and remove the registration
    Shutdown,
}

/// Owner of a client transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    Registration,
    Call(CallId),
}

#[derive(Debug)]
pub(crate) enum AgentTimer {
    RegistrationRefresh,
    NoAnswer(CallId),
}

/// Everything a registration or call needs to act, borrowed from the [`UserAgent`]
pub(crate) struct Ctx<'a> {
    pub(crate) now: Instant,
    pub(crate) transactions: &'a mut Transactions<Owner>,
    pub(crate) timers: &'a mut TimerQueue<AgentTimer>,
    pub(crate) events: &'a mut VecDeque<Event>,
    pub(crate) media: &'a mut dyn MediaBackend,
    pub(crate) contact: &'a Contact,
    pub(crate) user_agent: Option<&'a str>,
}

impl Ctx<'_> {
    pub(crate) fn emit(&mut self, event: Event) {
        log::debug!("event {event:?}");
        self.events.push_back(event);
    }

    /// Start a client transaction for `request`
    pub(crate) fn send(&mut self, mut request: Request, target: SocketAddr, owner: Owner) -> TsxKey {
        if let Some(user_agent) = self.user_agent {
            request
                .headers
                .insert_named(&UserAgentHeader::new(user_agent.to_owned()));
        }

        self.transactions
            .send_request(self.now, request, target, owner)
    }

    pub(crate) fn respond(&mut self, key: &TsxKey, response: Response) {
        self.transactions.respond(self.now, key, response);
    }
}

// Borrow the fields making up a `Ctx` separately, so calls and the registration stay accessible
macro_rules! ctx {
    ($this:ident, $now:expr) => {
        Ctx {
            now: $now,
            transactions: &mut $this.transactions,
            timers: &mut $this.timers,
            events: &mut $this.events,
            media: &mut $this.media,
            contact: &$this.contact,
            user_agent: $this.config.user_agent.as_deref(),
        }
    };
}

/// SIP user agent: one registration and any number of calls
pub struct UserAgent<M> {
    config: UserAgentConfig,

    transactions: Transactions<Owner>,
    timers: TimerQueue<AgentTimer>,
    events: VecDeque<Event>,
    media: M,

    contact: Contact,
    /// Registrar or outbound proxy, every request is sent there
    target: SocketAddr,

    registration: Registration,
    calls: BTreeMap<CallId, Call>,
    call_ids: CallIds,
    directory: SessionDirectory,

    shutting_down: bool,
}

impl<M: MediaBackend> UserAgent<M> {
    pub fn new(
        config: UserAgentConfig,
        media: M,
        kind: TransportKind,
        sent_by: SocketAddr,
        target: SocketAddr,
        call_ids: CallIds,
    ) -> Result<Self, AgentError> {
        let registration = Registration::new(&config.account, config.refresh_fraction, target)?;
        let contact = create_contact(&config.account, kind, sent_by);

        let mut directory = SessionDirectory::new();
        directory.set_registration(registration.snapshot());

        Ok(Self {
            transactions: Transactions::new(config.timers, kind, sent_by),
            timers: TimerQueue::new(),
            events: VecDeque::new(),
            media,
            contact,
            target,
            registration,
            calls: BTreeMap::new(),
            call_ids,
            directory,
            shutting_down: false,
            config,
        })
    }

    pub fn config(&self) -> &UserAgentConfig {
        &self.config
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    pub fn call_ids(&self) -> &CallIds {
        &self.call_ids
    }

    /// The transport was reopened, possibly with a new local address
    pub fn set_transport(&mut self, kind: TransportKind, sent_by: SocketAddr) {
        self.transactions.set_transport(kind, sent_by);
        self.contact = create_contact(&self.config.account, kind, sent_by);
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state()
    }

    /// Immutable view of the registration and all live calls
    pub fn snapshot(&mut self) -> Arc<DirectorySnapshot> {
        self.directory.snapshot()
    }

    /// Nothing left to wait for: no calls, no pending registration transaction
    pub fn is_idle(&self) -> bool {
        self.calls.is_empty() && !self.registration.is_busy()
    }

    #[tracing::instrument(level = "debug", skip(self, now))]
    pub fn handle_command(&mut self, now: Instant, command: Command) -> Result<(), AgentError> {
        let result = self.execute(now, command);

        if let Err(e) = &result {
            log::warn!("command refused, {e}");
        }

        self.process(now);

        result
    }

    fn execute(&mut self, now: Instant, command: Command) -> Result<(), AgentError> {
        match command {
            Command::Register => {
                if self.shutting_down {
                    return Err(AgentError::InvalidState("register"));
                }

                self.registration.register(&mut ctx!(self, now));
                Ok(())
            }
            Command::Unregister => {
                self.registration.unregister(&mut ctx!(self, now));
                Ok(())
            }
            Command::SetPassword(password) => {
                self.config.account.password = password;
                self.registration.set_password(&self.config.account);
                Ok(())
            }
            Command::MakeCall { call, target } => self.make_call(now, call, &target),
            Command::Answer(call) => self.with_call(now, call, |call, ctx| call.answer(ctx)),
            Command::Hangup { call, code, reason } => self.with_call(now, call, |call, ctx| {
                call.hangup(ctx, code, reason.as_deref())
            }),
            Command::Hold(call) => self.with_call(now, call, |call, ctx| call.hold(ctx)),
            Command::Resume(call) => self.with_call(now, call, |call, ctx| call.resume(ctx)),
            Command::SetMuted { call, muted } => {
                self.with_call(now, call, |call, ctx| call.set_muted(ctx, muted))
            }
            Command::SendDtmf { call, digit } => {
                self.with_call(now, call, |call, ctx| call.send_dtmf(ctx, digit))
            }
            Command::Transfer { call, target } => {
                let target = parse_uri(&target)?;
                self.with_call(now, call, |call, ctx| call.transfer(ctx, target))
            }
            Command::Shutdown => {
                self.shutdown(now);
                Ok(())
            }
        }
    }

    fn with_call<F>(&mut self, now: Instant, id: CallId, f: F) -> Result<(), AgentError>
    where
        F: FnOnce(&mut Call, &mut Ctx<'_>) -> Result<(), AgentError>,
    {
        let call = self.calls.get_mut(&id).ok_or(AgentError::UnknownCall(id))?;

        f(call, &mut ctx!(self, now))
    }

    fn active_calls(&self) -> usize {
        self.calls.values().filter(|call| !call.is_closed()).count()
    }

    fn make_call(&mut self, now: Instant, id: CallId, target: &str) -> Result<(), AgentError> {
        if self.shutting_down {
            return Err(AgentError::InvalidState("make_call"));
        }

        if self.calls.contains_key(&id) {
            return Err(AgentError::InvalidState("make_call with a used call id"));
        }

        if self.active_calls() >= self.config.max_calls {
            return Err(AgentError::TooManyCalls);
        }

        let target = parse_uri(target)?;

        let dialog = Dialog::new_client(
            self.config.account.identity()?,
            target,
            self.contact.clone(),
            self.target,
        );

        let sip_call_id = dialog.call_id.0.as_str().to_owned();

        if self.directory.lookup(&sip_call_id).is_some() {
            return Err(AgentError::DuplicateCallId(sip_call_id));
        }

        let authenticator = DigestAuthenticator::new(self.config.account.credentials());

        let call = Call::outgoing(&mut ctx!(self, now), id, dialog, authenticator);

        self.directory.insert_call(&sip_call_id, call.snapshot())?;
        self.calls.insert(id, call);

        Ok(())
    }

    fn shutdown(&mut self, now: Instant) {
        log::info!("shutting down");

        self.shutting_down = true;

        for call in self.calls.values_mut() {
            if call.is_closed() {
                continue;
            }

            if let Err(e) = call.hangup(&mut ctx!(self, now), None, None) {
                log::debug!("{}: not hung up, {e}", call.id());
            }
        }

        self.registration.unregister(&mut ctx!(self, now));
    }

    /// Feed a raw message received from `source`, malformed messages are dropped
    pub fn handle_datagram(&mut self, now: Instant, bytes: Bytes, source: SocketAddr) {
        match parse_message(bytes) {
            Ok(message) => self.handle_message(now, message, source),
            Err(e) => log::warn!("dropping malformed message from {source}, {e}"),
        }
    }

    pub fn handle_message(&mut self, now: Instant, message: Message, source: SocketAddr) {
        if let Some(incoming) = self.transactions.receive(now, message, source) {
            self.handle_request(now, incoming);
        }

        self.process(now);
    }

    /// Process all timers expired at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        self.transactions.handle_timeout(now);

        while let Some(timer) = self.timers.pop_expired(now) {
            match timer {
                AgentTimer::RegistrationRefresh => {
                    self.registration.refresh_due(&mut ctx!(self, now));
                }
                AgentTimer::NoAnswer(id) => {
                    if let Some(call) = self.calls.get_mut(&id) {
                        call.no_answer_expired(&mut ctx!(self, now));
                    }
                }
            }
        }

        self.process(now);
    }

    /// Sending a [`Transmit`] failed
    pub fn handle_send_failure(&mut self, now: Instant, tsx: Option<TsxKey>, error: TransportError) {
        match tsx {
            Some(key) => self.transactions.transport_failed(&key, error),
            None => log::warn!("failed to send stateless message, {error}"),
        }

        self.process(now);
    }

    /// The connection of a stream transport is gone, everything in flight is lost
    pub fn handle_connection_lost(&mut self, now: Instant, error: TransportError) {
        log::warn!("connection lost, {error}");

        self.transactions.fail_all(error.clone());
        self.process(now);

        self.registration
            .connection_lost(&mut ctx!(self, now), Failure::Transport(error));
        self.process(now);
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transactions.poll_transmit()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Earliest point in time [`UserAgent::handle_timeout`] must be called
    pub fn next_deadline(&mut self) -> Option<Instant> {
        match (self.transactions.next_deadline(), self.timers.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_request(&mut self, now: Instant, incoming: IncomingRequest) {
        let method = incoming.request.line.method.clone();

        if method == Method::CANCEL {
            match self
                .calls
                .values_mut()
                .find(|call| call.is_cancelled_by(&incoming.key))
            {
                Some(call) => call.receive_cancel(&mut ctx!(self, now), incoming),
                None => self.reject(now, &incoming, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST),
            }

            return;
        }

        if incoming.base.to.tag.is_some() {
            match self
                .calls
                .values_mut()
                .find(|call| call.dialog().matches(&incoming.base, true))
            {
                Some(call) => call.receive_request(&mut ctx!(self, now), incoming),
                None if method == Method::ACK => {
                    log::debug!("dropping ACK outside of any dialog");
                }
                None => {
                    log::debug!("no dialog for {}", incoming.request);
                    self.reject(
                        now,
                        &incoming,
                        StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
                    );
                }
            }

            return;
        }

        match method {
            Method::INVITE => self.receive_invite(now, incoming),
            Method::ACK => log::debug!("dropping ACK without To tag"),
            Method::OPTIONS => {
                let mut response = self.out_of_dialog_response(&incoming, StatusCode::OK);
                response.headers.insert(Name::ALLOW, ALLOWED_METHODS);
                response.headers.insert(Name::ACCEPT, CONTENT_TYPE_SDP);
                self.transactions.respond(now, &incoming.key, response);
            }
            Method::BYE | Method::INFO | Method::NOTIFY => self.reject(
                now,
                &incoming,
                StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
            ),
            _ => {
                let mut response = self.out_of_dialog_response(&incoming, StatusCode::NOT_IMPLEMENTED);
                response.headers.insert(Name::ALLOW, ALLOWED_METHODS);
                self.transactions.respond(now, &incoming.key, response);
            }
        }
    }

    fn receive_invite(&mut self, now: Instant, invite: IncomingRequest) {
        let sip_call_id = invite.base.call_id.0.as_str().to_owned();

        let refusal = if self.shutting_down {
            Some(StatusCode::TEMPORARILY_UNAVAILABLE)
        } else if self.directory.lookup(&sip_call_id).is_some() {
            // same Call-ID, reached us a second time over another path
            Some(StatusCode::LOOP_DETECTED)
        } else if self.active_calls() >= self.config.max_calls {
            Some(StatusCode::BUSY_HERE)
        } else {
            None
        };

        if let Some(code) = refusal {
            log::info!("refusing {} with {code}", invite.request);
            self.reject(now, &invite, code);
            return;
        }

        let dialog = Dialog::new_server(
            &invite.request,
            &invite.base,
            self.contact.clone(),
            invite.source,
        );
        let authenticator = DigestAuthenticator::new(self.config.account.credentials());

        let id = self.call_ids.next();
        let no_answer = self.config.no_answer_timeout;
        let call = Call::incoming(
            &mut ctx!(self, now),
            id,
            dialog,
            authenticator,
            invite,
            no_answer,
        );

        if let Err(e) = self.directory.insert_call(&sip_call_id, call.snapshot()) {
            log::error!("{id}: {e}");
        }

        self.calls.insert(id, call);
    }

    /// Response outside any dialog, with a To tag for final responses
    fn out_of_dialog_response(&self, incoming: &IncomingRequest, code: StatusCode) -> Response {
        let mut response = incoming.request.create_response(code, None);

        if code != StatusCode::TRYING {
            let mut to = incoming.base.to.clone();
            to.tag = Some(random_string());

            response.headers.remove(&Name::TO);
            response.headers.insert_type(Name::TO, &to);
        }

        response
    }

    fn reject(&mut self, now: Instant, incoming: &IncomingRequest, code: StatusCode) {
        let response = self.out_of_dialog_response(incoming, code);
        self.transactions.respond(now, &incoming.key, response);
    }

    /// Route transaction outcomes to their owners and publish the resulting state
    fn process(&mut self, now: Instant) {
        while let Some(event) = self.transactions.poll_event() {
            match event {
                TsxEvent::Response {
                    key,
                    owner,
                    response,
                } => match owner {
                    Owner::Registration => {
                        self.registration
                            .receive_response(&mut ctx!(self, now), &key, response);
                    }
                    Owner::Call(id) => {
                        if let Some(call) = self.calls.get_mut(&id) {
                            call.receive_response(&mut ctx!(self, now), &key, response);
                        }
                    }
                },
                TsxEvent::Timeout { key, owner } => {
                    self.transaction_failed(now, &key, owner, Failure::TransactionTimeout);
                }
                TsxEvent::TransportFailed { key, owner, error } => {
                    self.transaction_failed(now, &key, owner, Failure::Transport(error));
                }
                TsxEvent::AckTimeout { key } => {
                    if let Some(call) = self
                        .calls
                        .values_mut()
                        .find(|call| call.is_answered_by(&key))
                    {
                        call.ack_timeout(&mut ctx!(self, now));
                    }
                }
                TsxEvent::Terminated { key, owner } => {
                    if let Owner::Call(id) = owner {
                        if let Some(call) = self.calls.get_mut(&id) {
                            call.transaction_terminated(&key);
                        }
                    }
                }
            }
        }

        self.publish();
    }

    fn transaction_failed(&mut self, now: Instant, key: &TsxKey, owner: Owner, failure: Failure) {
        log::debug!("{key}: {failure}");

        match owner {
            Owner::Registration => {
                self.registration
                    .transaction_failed(&mut ctx!(self, now), key, failure);
            }
            Owner::Call(id) => {
                if let Some(call) = self.calls.get_mut(&id) {
                    call.transaction_failed(&mut ctx!(self, now), key, failure);
                }
            }
        }
    }

    fn publish(&mut self) {
        self.directory.set_registration(self.registration.snapshot());

        for call in self.calls.values() {
            if call.is_closed() {
                self.directory.remove_call(call.id());
            } else {
                self.directory.update_call(call.snapshot());
            }
        }

        self.calls.retain(|id, call| {
            let drained = call.is_drained();

            if drained {
                log::debug!("{id}: drained");
            }

            !drained
        });
    }
}

/// Contact of the user agent, the user at the transport's public address
fn create_contact(account: &Account, kind: TransportKind, sent_by: SocketAddr) -> Contact {
    let mut uri = SipUri::new(sent_by.into()).user(account.username.as_str());

    if kind != TransportKind::Udp {
        uri.params.push(Param::value("transport", kind.name().to_ascii_lowercase()));
    }

    Contact::new(NameAddr::uri(uri))
}
