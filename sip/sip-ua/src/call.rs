//! Call state machine
//!
//! Outgoing: `Calling -> Ringing -> Established -> Closed`
//! Incoming: `Incoming -> Ringing -> Established -> Closed`
//!
//! `Closed` is reachable from every state. A closed call lingers until all of its client
//! transactions terminated, so late responses (a 2xx racing a CANCEL) can still be handled.

use crate::agent::{AgentTimer, Ctx, Owner};
use crate::dialog::Dialog;
use crate::directory::CallSnapshot;
use crate::event::{
    CallId, CallState, CloseReason, Direction, Event, Failure, UpdateOperation,
};
use crate::sdp::{self, CONTENT_TYPE_SDP, MediaDirection};
use crate::AgentError;
use bytes::Bytes;
use sip_auth::{ClientAuthenticator, DigestAuthenticator, RequestParts, ResponseParts};
use sip_core::timer::TimerId;
use sip_core::{IncomingRequest, Request, Response, TsxKey};
use sip_types::header::typed::{
    CSeq, ContentType, Event as EventHeader, ReferTo, SubscriptionState,
};
use sip_types::msg::MessageLine;
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{CodeKind, Method, Name, StatusCode};
use std::collections::HashSet;
use std::str::from_utf8;
use std::time::Duration;

const CONTENT_TYPE_DTMF_RELAY: &str = "application/dtmf-relay";
const CONTENT_TYPE_DTMF: &str = "application/dtmf";
const CONTENT_TYPE_SIPFRAG: &str = "message/sipfrag";

/// Duration announced for DTMF digits sent with INFO, in milliseconds
const DTMF_DURATION: u32 = 160;

/// Default response code when an unanswered incoming call is hung up
pub const DEFAULT_DECLINE_CODE: StatusCode = StatusCode::BUSY_HERE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Initial,
    Update(UpdateOperation),
}

/// INVITE sent by us which has not received a final response
#[derive(Debug)]
struct OutgoingInvite {
    key: TsxKey,
    purpose: Purpose,
    /// Sent request without `Via`, kept to answer authentication challenges
    request: Request,
    auth_retried: bool,
}

/// INVITE received from the peer, waiting for our final response
#[derive(Debug)]
struct IncomingInvite {
    key: TsxKey,
    request: Request,
}

/// ACK sent for a 2xx, repeated for every retransmission of that 2xx
#[derive(Debug)]
struct SentAck {
    invite: TsxKey,
    ack: Request,
}

pub(crate) struct Call {
    id: CallId,
    direction: Direction,
    state: CallState,
    dialog: Dialog,
    authenticator: DigestAuthenticator,

    muted: bool,
    held: bool,
    remote_held: bool,

    invite: Option<OutgoingInvite>,
    incoming: Option<IncomingInvite>,
    /// Gives up on an incoming call nobody answers
    no_answer: Option<TimerId>,
    ack: Option<SentAck>,

    /// Our 2xx to an INVITE of the peer, waiting for the ACK
    answered: Option<TsxKey>,
    /// The answered INVITE carried no offer, the answer arrives with the ACK
    answer_in_ack: bool,

    cancelling: bool,
    bye: Option<TsxKey>,
    refer: Option<TsxKey>,
    /// The peer accepted our REFER and reports progress with NOTIFY
    transfer_subscribed: bool,
    dtmf: Vec<(TsxKey, char)>,

    /// Client transactions that did not terminate yet
    live: HashSet<TsxKey>,
}

impl Call {
    /// Start an outgoing call by sending the INVITE
    pub(crate) fn outgoing(
        ctx: &mut Ctx<'_>,
        id: CallId,
        mut dialog: Dialog,
        mut authenticator: DigestAuthenticator,
    ) -> Self {
        let offer = ctx.media.create_offer(id, MediaDirection::SendRecv);

        let mut request = dialog.create_request(Method::INVITE);
        request.headers.insert_named(&ContentType::new(CONTENT_TYPE_SDP));
        request.body = offer;

        authenticator.authorize_request(&mut request.headers);

        let key = ctx.send(request.clone(), dialog.target, Owner::Call(id));

        ctx.emit(Event::CallOutgoing {
            call: id,
            remote: dialog.peer_target.to_string(),
        });

        let mut live = HashSet::new();
        live.insert(key.clone());

        Self {
            id,
            direction: Direction::Outgoing,
            state: CallState::Calling,
            dialog,
            authenticator,
            muted: false,
            held: false,
            remote_held: false,
            invite: Some(OutgoingInvite {
                key,
                purpose: Purpose::Initial,
                request,
                auth_retried: false,
            }),
            incoming: None,
            no_answer: None,
            ack: None,
            answered: None,
            answer_in_ack: false,
            cancelling: false,
            bye: None,
            refer: None,
            transfer_subscribed: false,
            dtmf: vec![],
            live,
        }
    }

    /// Accept an incoming INVITE as new call, which starts ringing immediately
    pub(crate) fn incoming(
        ctx: &mut Ctx<'_>,
        id: CallId,
        dialog: Dialog,
        authenticator: DigestAuthenticator,
        invite: IncomingRequest,
        no_answer: Duration,
    ) -> Self {
        let remote = &invite.base.from.uri;

        ctx.emit(Event::CallIncoming {
            call: id,
            remote: remote.uri.to_string(),
            display_name: remote.name.as_ref().map(|name| name.to_string()),
        });

        let mut call = Self {
            id,
            direction: Direction::Incoming,
            state: CallState::Incoming,
            dialog,
            authenticator,
            muted: false,
            held: false,
            remote_held: false,
            invite: None,
            incoming: Some(IncomingInvite {
                key: invite.key,
                request: invite.request,
            }),
            no_answer: None,
            ack: None,
            answered: None,
            answer_in_ack: false,
            cancelling: false,
            bye: None,
            refer: None,
            transfer_subscribed: false,
            dtmf: vec![],
            live: HashSet::new(),
        };

        if let Some(incoming) = &call.incoming {
            let ringing = call
                .dialog
                .create_response(&incoming.request, StatusCode::RINGING, None);
            ctx.respond(&incoming.key, ringing);

            call.state = CallState::Ringing;
            ctx.emit(Event::CallRinging { call: id });

            call.no_answer = Some(
                ctx.timers
                    .insert(ctx.now + no_answer, AgentTimer::NoAnswer(id)),
            );
        }

        call
    }

    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    pub(crate) fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == CallState::Closed
    }

    /// Closed and no transaction left that could still deliver something for this call
    pub(crate) fn is_drained(&self) -> bool {
        self.is_closed() && self.live.is_empty()
    }

    /// The call is alive and not shutting down, new operations may start
    fn is_usable(&self) -> bool {
        self.state == CallState::Established && self.bye.is_none()
    }

    pub(crate) fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            id: self.id,
            direction: self.direction,
            state: self.state,
            remote: self.dialog.peer_target.to_string(),
            muted: self.muted,
            held: self.held,
            remote_held: self.remote_held,
        }
    }

    /// Is `key` our 2xx to an INVITE still waiting for the ACK
    pub(crate) fn is_answered_by(&self, key: &TsxKey) -> bool {
        self.answered.as_ref() == Some(key)
    }

    /// Is `key` the CANCEL for the INVITE this call is waiting to answer
    pub(crate) fn is_cancelled_by(&self, key: &TsxKey) -> bool {
        self.incoming
            .as_ref()
            .is_some_and(|incoming| incoming.key.branch() == key.branch())
    }

    fn send(&mut self, ctx: &mut Ctx<'_>, mut request: Request) -> TsxKey {
        self.authenticator.authorize_request(&mut request.headers);

        let key = ctx.send(request, self.dialog.target, Owner::Call(self.id));
        self.live.insert(key.clone());
        key
    }

    fn close(&mut self, ctx: &mut Ctx<'_>, reason: CloseReason) {
        if self.is_closed() {
            return;
        }

        log::info!("{}: closed, {reason:?}", self.id);

        self.cancel_no_answer(ctx);
        self.state = CallState::Closed;
        self.refer = None;
        self.transfer_subscribed = false;

        ctx.media.release(self.id);
        ctx.emit(Event::CallClosed {
            call: self.id,
            reason,
        });
    }

    // === Control operations

    pub(crate) fn answer(&mut self, ctx: &mut Ctx<'_>) -> Result<(), AgentError> {
        let answerable = self.direction == Direction::Incoming
            && matches!(self.state, CallState::Incoming | CallState::Ringing);

        let Some(incoming) = self.incoming.take_if(|_| answerable) else {
            return Err(AgentError::InvalidState("answer"));
        };

        self.cancel_no_answer(ctx);

        let body = if incoming.request.body.is_empty() {
            self.answer_in_ack = true;
            ctx.media.create_offer(self.id, MediaDirection::SendRecv)
        } else {
            match ctx
                .media
                .receive_offer(self.id, &incoming.request.body, MediaDirection::SendRecv)
            {
                Ok(answer) => answer,
                Err(e) => {
                    log::warn!("{}: {e}", self.id);

                    let response = self.dialog.create_response(
                        &incoming.request,
                        StatusCode::NOT_ACCEPTABLE_HERE,
                        None,
                    );
                    ctx.respond(&incoming.key, response);

                    self.close(ctx, CloseReason::Declined(StatusCode::NOT_ACCEPTABLE_HERE));
                    return Ok(());
                }
            }
        };

        let mut response = self
            .dialog
            .create_response(&incoming.request, StatusCode::OK, None);
        response
            .headers
            .insert_named(&ContentType::new(CONTENT_TYPE_SDP));
        response.body = body;

        ctx.respond(&incoming.key, response);

        self.answered = Some(incoming.key);

        Ok(())
    }

    pub(crate) fn hangup(
        &mut self,
        ctx: &mut Ctx<'_>,
        code: Option<StatusCode>,
        reason: Option<&str>,
    ) -> Result<(), AgentError> {
        if self.is_closed() || self.bye.is_some() || self.cancelling {
            return Err(AgentError::InvalidState("hangup"));
        }

        // unanswered incoming call, decline it
        if let Some(incoming) = self.incoming.take() {
            let code = code
                .filter(|code| code.into_u16() >= 300)
                .unwrap_or(DEFAULT_DECLINE_CODE);

            let response = self.dialog.create_response(&incoming.request, code, reason);
            ctx.respond(&incoming.key, response);

            self.close(ctx, CloseReason::Declined(code));
            return Ok(());
        }

        // outgoing call without final response, cancel it
        if self.direction == Direction::Outgoing
            && matches!(self.state, CallState::Calling | CallState::Ringing)
        {
            let cancel = self
                .invite
                .as_ref()
                .and_then(|invite| ctx.transactions.cancel(ctx.now, &invite.key));

            match cancel {
                Some(cancel) => {
                    log::debug!("{}: cancelling", self.id);
                    self.live.insert(cancel);
                    self.cancelling = true;
                }
                None => self.close(ctx, CloseReason::Cancelled),
            }

            return Ok(());
        }

        let bye = self.dialog.create_request(Method::BYE);
        self.bye = Some(self.send(ctx, bye));

        Ok(())
    }

    pub(crate) fn hold(&mut self, ctx: &mut Ctx<'_>) -> Result<(), AgentError> {
        if !self.is_usable() || self.invite.is_some() || self.held {
            return Err(AgentError::InvalidState("hold"));
        }

        self.reinvite(ctx, UpdateOperation::Hold, MediaDirection::SendOnly);
        Ok(())
    }

    pub(crate) fn resume(&mut self, ctx: &mut Ctx<'_>) -> Result<(), AgentError> {
        if !self.is_usable() || self.invite.is_some() || !self.held {
            return Err(AgentError::InvalidState("resume"));
        }

        self.reinvite(ctx, UpdateOperation::Resume, MediaDirection::SendRecv);
        Ok(())
    }

    fn reinvite(&mut self, ctx: &mut Ctx<'_>, operation: UpdateOperation, direction: MediaDirection) {
        let mut request = self.dialog.create_request(Method::INVITE);
        request
            .headers
            .insert_named(&ContentType::new(CONTENT_TYPE_SDP));
        request.body = ctx.media.create_offer(self.id, direction);

        let key = self.send(ctx, request.clone());

        self.invite = Some(OutgoingInvite {
            key,
            purpose: Purpose::Update(operation),
            request,
            auth_retried: false,
        });
    }

    pub(crate) fn set_muted(&mut self, ctx: &mut Ctx<'_>, muted: bool) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::InvalidState("set_muted"));
        }

        self.muted = muted;
        ctx.media.set_muted(self.id, muted);

        Ok(())
    }

    pub(crate) fn send_dtmf(&mut self, ctx: &mut Ctx<'_>, digit: char) -> Result<(), AgentError> {
        let digit = validate_dtmf(digit)?;

        if !self.is_usable() {
            return Err(AgentError::InvalidState("send_dtmf"));
        }

        let mut request = self.dialog.create_request(Method::INFO);
        request
            .headers
            .insert_named(&ContentType::new(CONTENT_TYPE_DTMF_RELAY));
        request.body = format!("Signal={digit}\r\nDuration={DTMF_DURATION}\r\n").into();

        let key = self.send(ctx, request);
        self.dtmf.push((key, digit));

        ctx.emit(Event::CallDtmfStart {
            call: self.id,
            digit,
            remote: false,
        });

        Ok(())
    }

    pub(crate) fn transfer(&mut self, ctx: &mut Ctx<'_>, target: SipUri) -> Result<(), AgentError> {
        if !self.is_usable() || self.refer.is_some() {
            return Err(AgentError::InvalidState("transfer"));
        }

        let mut request = self.dialog.create_request(Method::REFER);
        request
            .headers
            .insert_named(&ReferTo::new(NameAddr::uri(target)));
        request
            .headers
            .insert_type(Name::REFERRED_BY, &self.dialog.from.uri);

        self.refer = Some(self.send(ctx, request));
        self.transfer_subscribed = false;

        Ok(())
    }

    // === Transaction outcomes

    pub(crate) fn receive_response(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, response: Response) {
        if self.invite.as_ref().is_some_and(|invite| invite.key == *key) {
            self.receive_invite_response(ctx, key, response);
        } else if key.is_invite() {
            // retransmitted 2xx of a completed INVITE, or one racing our CANCEL
            self.receive_late_invite_response(ctx, key, response);
        } else if self.bye.as_ref() == Some(key) {
            if response.code().kind() != CodeKind::Provisional {
                self.close(ctx, CloseReason::LocalHangup);
            }
        } else if self.refer.as_ref() == Some(key) {
            self.receive_refer_response(ctx, response);
        } else if let Some(index) = self.dtmf.iter().position(|(k, _)| k == key) {
            if response.code().kind() != CodeKind::Provisional {
                let (_, digit) = self.dtmf.remove(index);
                self.dtmf_end(ctx, digit, false);
            }
        } else if self.cancelling && key.method() == Some(&Method::CANCEL) {
            if response.code().kind() != CodeKind::Provisional {
                self.close(ctx, CloseReason::Cancelled);
            }
        } else {
            log::debug!("{}: ignoring {response} for {key}", self.id);
        }
    }

    fn receive_invite_response(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, response: Response) {
        let Some(invite) = self.invite.take() else {
            return;
        };

        let code = response.code();

        match (code.kind(), invite.purpose) {
            (CodeKind::Provisional, Purpose::Initial) => {
                self.invite = Some(invite);

                if self.cancelling || self.is_closed() {
                    return;
                }

                self.dialog.update_from_response(&response);

                match code.into_u16() {
                    180..=182 if self.state == CallState::Calling => {
                        self.state = CallState::Ringing;
                        ctx.emit(Event::CallRinging { call: self.id });
                    }
                    183 => ctx.emit(Event::CallProcess {
                        call: self.id,
                        code,
                    }),
                    _ => {}
                }
            }
            (CodeKind::Provisional, Purpose::Update(_)) => {
                self.invite = Some(invite);
            }
            (CodeKind::Success, Purpose::Initial) => {
                if self.cancelling || self.is_closed() {
                    log::info!("{}: answered after cancellation, ending it", self.id);
                    self.dialog.update_from_response(&response);
                    self.dialog.confirm();
                    self.acknowledge(ctx, key, &invite);

                    let bye = self.dialog.create_request(Method::BYE);
                    self.bye = Some(self.send(ctx, bye));

                    self.close(ctx, CloseReason::Cancelled);
                    return;
                }

                self.dialog.update_from_response(&response);
                self.dialog.confirm();
                self.acknowledge(ctx, key, &invite);

                if let Err(e) = ctx.media.receive_answer(self.id, &response.body) {
                    log::warn!("{}: {e}", self.id);
                }

                self.state = CallState::Established;
                ctx.emit(Event::CallEstablished { call: self.id });
            }
            (CodeKind::Success, Purpose::Update(operation)) => {
                self.acknowledge(ctx, key, &invite);

                if let Err(e) = ctx.media.receive_answer(self.id, &response.body) {
                    log::warn!("{}: {e}", self.id);
                }

                self.apply_update(ctx, operation);
            }
            _ if (code == StatusCode::UNAUTHORIZED
                || code == StatusCode::PROXY_AUTHENTICATION_REQUIRED)
                && !invite.auth_retried
                && !self.cancelling =>
            {
                self.retry_with_credentials(ctx, invite, &response);
            }
            (_, Purpose::Initial) => {
                let reason = if self.cancelling {
                    CloseReason::Cancelled
                } else if invite.auth_retried && is_challenge(code) {
                    CloseReason::Failed(Failure::AuthenticationFailed)
                } else {
                    CloseReason::Rejected {
                        code,
                        reason: response.line.reason.as_ref().map(|r| r.to_string()),
                    }
                };

                self.close(ctx, reason);
            }
            (_, Purpose::Update(operation)) => {
                ctx.emit(Event::CallUpdateFailed {
                    call: self.id,
                    operation,
                    failure: Failure::Rejected {
                        code,
                        reason: response.line.reason.as_ref().map(|r| r.to_string()),
                    },
                });
            }
        }
    }

    fn receive_late_invite_response(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, response: Response) {
        if response.code().kind() != CodeKind::Success {
            return;
        }

        match &self.ack {
            Some(sent) if sent.invite == *key => {
                log::debug!("{}: repeating ACK for retransmitted 2xx", self.id);
                ctx.transactions
                    .send_stateless(sent.ack.clone(), self.dialog.target);
            }
            _ => log::debug!("{}: ignoring 2xx of {key}", self.id),
        }
    }

    /// ACK a 2xx, which is sent outside of any transaction
    fn acknowledge(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, invite: &OutgoingInvite) {
        let cseq = invite
            .request
            .headers
            .get_named::<CSeq>()
            .map(|cseq| cseq.cseq)
            .unwrap_or(self.dialog.local_cseq.saturating_sub(1));

        let mut ack = self.dialog.create_ack(cseq);
        self.authenticator.authorize_request(&mut ack.headers);

        ctx.transactions
            .send_stateless(ack.clone(), self.dialog.target);

        self.ack = Some(SentAck {
            invite: key.clone(),
            ack,
        });
    }

    fn apply_update(&mut self, ctx: &mut Ctx<'_>, operation: UpdateOperation) {
        match operation {
            UpdateOperation::Hold => {
                self.held = true;
                ctx.media.set_hold(self.id, true);
                ctx.emit(Event::CallHeld {
                    call: self.id,
                    local: true,
                });
            }
            UpdateOperation::Resume => {
                self.held = false;
                ctx.media.set_hold(self.id, false);
                ctx.emit(Event::CallResumed {
                    call: self.id,
                    local: true,
                });
            }
        }
    }

    fn retry_with_credentials(&mut self, ctx: &mut Ctx<'_>, invite: OutgoingInvite, response: &Response) {
        let result = self.authenticator.handle_rejection(
            RequestParts {
                line: &invite.request.line,
                headers: &invite.request.headers,
                body: &invite.request.body,
            },
            ResponseParts {
                line: &response.line,
                headers: &response.headers,
                body: &response.body,
            },
        );

        if let Err(e) = result {
            log::warn!("{}: failed to answer authentication challenge, {e}", self.id);

            match invite.purpose {
                Purpose::Initial => {
                    self.close(ctx, CloseReason::Failed(Failure::AuthenticationFailed))
                }
                Purpose::Update(operation) => ctx.emit(Event::CallUpdateFailed {
                    call: self.id,
                    operation,
                    failure: Failure::AuthenticationFailed,
                }),
            }

            return;
        }

        // same Call-ID and tags, next CSeq
        let mut request = self.dialog.create_request(Method::INVITE);
        for value in invite.request.headers.values(&Name::CONTENT_TYPE) {
            request.headers.insert(Name::CONTENT_TYPE, value.clone());
        }
        request.body = invite.request.body.clone();

        let mut sent = request.clone();
        self.authenticator.authorize_request(&mut sent.headers);

        let key = ctx.send(sent, self.dialog.target, Owner::Call(self.id));
        self.live.insert(key.clone());

        self.invite = Some(OutgoingInvite {
            key,
            purpose: invite.purpose,
            request,
            auth_retried: true,
        });
    }

    fn receive_refer_response(&mut self, ctx: &mut Ctx<'_>, response: Response) {
        match response.code().kind() {
            CodeKind::Provisional => {}
            CodeKind::Success => {
                self.refer = None;
                self.transfer_subscribed = true;
                ctx.emit(Event::CallTransferAccepted { call: self.id });
            }
            _ => {
                self.refer = None;
                ctx.emit(Event::CallTransferFailed {
                    call: self.id,
                    failure: Failure::Rejected {
                        code: response.code(),
                        reason: response.line.reason.as_ref().map(|r| r.to_string()),
                    },
                });
            }
        }
    }

    /// A client transaction of this call failed without final response
    pub(crate) fn transaction_failed(&mut self, ctx: &mut Ctx<'_>, key: &TsxKey, failure: Failure) {
        if let Some(invite) = self.invite.take_if(|invite| invite.key == *key) {
            match invite.purpose {
                Purpose::Initial => {
                    let reason = if self.cancelling {
                        CloseReason::Cancelled
                    } else if matches!(failure, Failure::TransactionTimeout) {
                        CloseReason::NoAnswer
                    } else {
                        CloseReason::Failed(failure)
                    };

                    self.close(ctx, reason);
                }
                Purpose::Update(operation) => ctx.emit(Event::CallUpdateFailed {
                    call: self.id,
                    operation,
                    failure,
                }),
            }
        } else if self.bye.as_ref() == Some(key) {
            // the peer may still think the call is up, nothing more we can do
            self.close(ctx, CloseReason::LocalHangup);
        } else if self.refer.as_ref() == Some(key) {
            self.refer = None;
            ctx.emit(Event::CallTransferFailed {
                call: self.id,
                failure,
            });
        } else if let Some(index) = self.dtmf.iter().position(|(k, _)| k == key) {
            let (_, digit) = self.dtmf.remove(index);
            self.dtmf_end(ctx, digit, false);
        } else if self.cancelling && key.method() == Some(&Method::CANCEL) {
            self.close(ctx, CloseReason::Cancelled);
        }
    }

    pub(crate) fn transaction_terminated(&mut self, key: &TsxKey) {
        self.live.remove(key);
    }

    /// Our 2xx was never acknowledged, the session cannot be trusted
    pub(crate) fn ack_timeout(&mut self, ctx: &mut Ctx<'_>) {
        self.answered = None;

        if self.is_closed() {
            return;
        }

        log::warn!("{}: no ACK received, ending the call", self.id);

        let bye = self.dialog.create_request(Method::BYE);
        self.bye = Some(self.send(ctx, bye));

        self.close(ctx, CloseReason::Failed(Failure::TransactionTimeout));
    }

    /// Nobody answered the incoming call in time
    pub(crate) fn no_answer_expired(&mut self, ctx: &mut Ctx<'_>) {
        self.no_answer = None;

        let Some(incoming) = self.incoming.take() else {
            return;
        };

        log::info!("{}: not answered in time", self.id);

        let response = self.dialog.create_response(
            &incoming.request,
            StatusCode::TEMPORARILY_UNAVAILABLE,
            None,
        );
        ctx.respond(&incoming.key, response);

        self.close(ctx, CloseReason::NoAnswer);
    }

    fn cancel_no_answer(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(id) = self.no_answer.take() {
            ctx.timers.cancel(id);
        }
    }

    // === Requests from the peer

    /// The peer cancelled its INVITE before we answered
    pub(crate) fn receive_cancel(&mut self, ctx: &mut Ctx<'_>, cancel: IncomingRequest) {
        let response = cancel.request.create_response(StatusCode::OK, None);
        ctx.respond(&cancel.key, response);

        let Some(incoming) = self.incoming.take() else {
            return;
        };

        let response = self.dialog.create_response(
            &incoming.request,
            StatusCode::REQUEST_TERMINATED,
            None,
        );
        ctx.respond(&incoming.key, response);

        self.close(ctx, CloseReason::RemoteCancelled);
    }

    /// Handle a request matching the dialog of this call
    pub(crate) fn receive_request(&mut self, ctx: &mut Ctx<'_>, incoming: IncomingRequest) {
        let method = incoming.request.line.method.clone();

        if method == Method::ACK {
            self.receive_ack(ctx, incoming);
            return;
        }

        if self.is_closed() {
            let response = self.dialog.create_response(
                &incoming.request,
                StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
                None,
            );
            ctx.respond(&incoming.key, response);
            return;
        }

        if !self.dialog.receive_cseq(incoming.base.cseq.cseq) {
            log::warn!("{}: out of order {}", self.id, incoming.request);
            let response = self.dialog.create_response(
                &incoming.request,
                StatusCode::SERVER_INTERNAL_ERROR,
                Some("CSeq out of order"),
            );
            ctx.respond(&incoming.key, response);
            return;
        }

        match method {
            Method::BYE => self.receive_bye(ctx, incoming),
            Method::INVITE => self.receive_reinvite(ctx, incoming),
            Method::INFO => self.receive_info(ctx, incoming),
            Method::NOTIFY => self.receive_notify(ctx, incoming),
            Method::OPTIONS => {
                let response = self.dialog.create_response(&incoming.request, StatusCode::OK, None);
                ctx.respond(&incoming.key, response);
            }
            _ => {
                let response = self.dialog.create_response(
                    &incoming.request,
                    StatusCode::NOT_IMPLEMENTED,
                    None,
                );
                ctx.respond(&incoming.key, response);
            }
        }
    }

    fn receive_ack(&mut self, ctx: &mut Ctx<'_>, ack: IncomingRequest) {
        if self.answered.is_none() {
            return;
        }

        self.answered = None;

        if std::mem::take(&mut self.answer_in_ack) {
            if let Err(e) = ctx.media.receive_answer(self.id, &ack.request.body) {
                log::warn!("{}: {e}", self.id);
            }
        }

        if matches!(self.state, CallState::Incoming | CallState::Ringing) {
            self.state = CallState::Established;
            ctx.emit(Event::CallEstablished { call: self.id });
        }
    }

    fn receive_bye(&mut self, ctx: &mut Ctx<'_>, bye: IncomingRequest) {
        let response = self.dialog.create_response(&bye.request, StatusCode::OK, None);
        ctx.respond(&bye.key, response);

        if let Some(incoming) = self.incoming.take() {
            let response = self.dialog.create_response(
                &incoming.request,
                StatusCode::REQUEST_TERMINATED,
                None,
            );
            ctx.respond(&incoming.key, response);
        }

        self.close(ctx, CloseReason::RemoteHangup);
    }

    fn receive_reinvite(&mut self, ctx: &mut Ctx<'_>, invite: IncomingRequest) {
        if self.state != CallState::Established {
            let response = self.dialog.create_response(
                &invite.request,
                StatusCode::REQUEST_PENDING,
                None,
            );
            ctx.respond(&invite.key, response);
            return;
        }

        // the previous re-INVITE of the peer is not acknowledged yet
        if self.answered.is_some() {
            let response = self.dialog.create_response(
                &invite.request,
                StatusCode::SERVER_INTERNAL_ERROR,
                None,
            );
            ctx.respond(&invite.key, response);
            return;
        }

        // glare, both sides sent a re-INVITE
        if self.invite.is_some() {
            let response = self.dialog.create_response(
                &invite.request,
                StatusCode::REQUEST_PENDING,
                None,
            );
            ctx.respond(&invite.key, response);
            return;
        }

        let local = if self.held {
            MediaDirection::SendOnly
        } else {
            MediaDirection::SendRecv
        };

        let (body, remote_held) = if invite.request.body.is_empty() {
            self.answer_in_ack = true;
            (ctx.media.create_offer(self.id, local), self.remote_held)
        } else {
            match ctx.media.receive_offer(self.id, &invite.request.body, local) {
                Ok(answer) => (answer, sdp::direction(&invite.request.body).is_hold()),
                Err(e) => {
                    log::warn!("{}: {e}", self.id);
                    let response = self.dialog.create_response(
                        &invite.request,
                        StatusCode::NOT_ACCEPTABLE_HERE,
                        None,
                    );
                    ctx.respond(&invite.key, response);
                    return;
                }
            }
        };

        let mut response = self.dialog.create_response(&invite.request, StatusCode::OK, None);
        response
            .headers
            .insert_named(&ContentType::new(CONTENT_TYPE_SDP));
        response.body = body;
        ctx.respond(&invite.key, response);

        self.answered = Some(invite.key);

        if remote_held != self.remote_held {
            self.remote_held = remote_held;

            ctx.emit(if remote_held {
                Event::CallHeld {
                    call: self.id,
                    local: false,
                }
            } else {
                Event::CallResumed {
                    call: self.id,
                    local: false,
                }
            });
        }
    }

    fn receive_info(&mut self, ctx: &mut Ctx<'_>, info: IncomingRequest) {
        let content_type = info.request.headers.get_named::<ContentType>().ok();

        let digit = match &content_type {
            None if info.request.body.is_empty() => None,
            Some(ty) if ty.is(CONTENT_TYPE_DTMF_RELAY) => parse_dtmf_relay(&info.request.body),
            Some(ty) if ty.is(CONTENT_TYPE_DTMF) => from_utf8(&info.request.body)
                .ok()
                .and_then(|body| body.trim().chars().next()),
            _ if info.request.body.is_empty() => None,
            _ => {
                let response = self.dialog.create_response(
                    &info.request,
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    None,
                );
                ctx.respond(&info.key, response);
                return;
            }
        };

        let response = self.dialog.create_response(&info.request, StatusCode::OK, None);
        ctx.respond(&info.key, response);

        let Some(digit) = digit.and_then(|digit| validate_dtmf(digit).ok()) else {
            return;
        };

        if self.state != CallState::Established {
            log::debug!("{}: ignoring DTMF outside of an established call", self.id);
            return;
        }

        ctx.emit(Event::CallDtmfStart {
            call: self.id,
            digit,
            remote: true,
        });
        self.dtmf_end(ctx, digit, true);
    }

    fn receive_notify(&mut self, ctx: &mut Ctx<'_>, notify: IncomingRequest) {
        let is_refer = notify
            .request
            .headers
            .get_named::<EventHeader>()
            .is_ok_and(|event| event.0.split(';').next().is_some_and(|e| e.trim() == "refer"));

        if !is_refer || !self.transfer_subscribed {
            let response = self.dialog.create_response(
                &notify.request,
                StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
                None,
            );
            ctx.respond(&notify.key, response);
            return;
        }

        let response = self.dialog.create_response(&notify.request, StatusCode::OK, None);
        ctx.respond(&notify.key, response);

        let terminated = notify
            .request
            .headers
            .get_named::<SubscriptionState>()
            .is_ok_and(|state| state.0.starts_with("terminated"));

        let is_sipfrag = notify
            .request
            .headers
            .get_named::<ContentType>()
            .is_ok_and(|ty| ty.is(CONTENT_TYPE_SIPFRAG));

        let status = if is_sipfrag {
            parse_sipfrag(&notify.request.body)
        } else {
            None
        };

        match status {
            Some((code, _)) if code.kind() == CodeKind::Provisional => {
                log::debug!("{}: transfer progressing, {code}", self.id);
            }
            Some((code, _)) if code.kind() == CodeKind::Success => {
                log::info!("{}: transfer succeeded", self.id);
                self.transfer_subscribed = false;
            }
            Some((code, reason)) => {
                self.transfer_subscribed = false;
                ctx.emit(Event::CallTransferFailed {
                    call: self.id,
                    failure: Failure::Rejected { code, reason },
                });
            }
            None if terminated => {
                self.transfer_subscribed = false;
            }
            None => {}
        }

        if terminated {
            self.transfer_subscribed = false;
        }
    }

    fn dtmf_end(&mut self, ctx: &mut Ctx<'_>, digit: char, remote: bool) {
        ctx.emit(Event::CallDtmfEnd {
            call: self.id,
            digit,
            remote,
        });
    }
}

fn is_challenge(code: StatusCode) -> bool {
    code == StatusCode::UNAUTHORIZED || code == StatusCode::PROXY_AUTHENTICATION_REQUIRED
}

/// Normalize a DTMF digit, `0-9`, `*`, `#` and `A-D`
pub fn validate_dtmf(digit: char) -> Result<char, AgentError> {
    let digit = digit.to_ascii_uppercase();

    match digit {
        '0'..='9' | '*' | '#' | 'A'..='D' => Ok(digit),
        _ => Err(AgentError::InvalidDtmf(digit)),
    }
}

/// Digit of an `application/dtmf-relay` body (`Signal=5\r\nDuration=160`)
fn parse_dtmf_relay(body: &Bytes) -> Option<char> {
    let body = from_utf8(body).ok()?;

    body.lines().find_map(|line| {
        let (name, value) = line.split_once('=')?;

        if name.trim().eq_ignore_ascii_case("signal") {
            value.trim().chars().next()
        } else {
            None
        }
    })
}

/// Status line of a `message/sipfrag` body
fn parse_sipfrag(body: &Bytes) -> Option<(StatusCode, Option<String>)> {
    let line = from_utf8(body).ok()?.lines().next()?;

    match line.trim().parse::<MessageLine>().ok()? {
        MessageLine::Response(status) => Some((
            status.code,
            status.reason.as_ref().map(|reason| reason.to_string()),
        )),
        MessageLine::Request(_) => None,
    }
}
