use super::consts::TIMER_D;
use super::{TimerKind, Timers, Transactions, TsxEvent, TsxKey, backoff};
use crate::{BaseHeaders, Request, Response};
use bytes::Bytes;
use sip_types::header::typed::CSeq;
use sip_types::{CodeKind, Method, Name};
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum State {
    /// Request sent, nothing received (Calling/Trying)
    Calling,
    Proceeding,
    /// INVITE got a 2xx, waiting for retransmitted 2xx (RFC 6026)
    Accepted,
    Completed,
}

#[derive(Debug)]
pub(super) struct ClientTsx<O> {
    pub(super) owner: O,
    request: Request,
    bytes: Bytes,
    target: SocketAddr,
    state: State,
    interval: std::time::Duration,
    cancelled: bool,
    /// ACK for a non-2xx final response, repeated for every retransmitted final response
    ack: Option<Bytes>,
    timers: Timers,
}

impl<O: Clone> Transactions<O> {
    /// Send `request` inside a new client transaction.
    ///
    /// A `Via` header with a fresh branch is prepended. Responses and the outcome are reported
    /// as [`TsxEvent`]s carrying `owner`.
    #[tracing::instrument(
        name = "tsx_send",
        level = "debug",
        skip(self, request, owner), fields(%request)
    )]
    pub fn send_request(
        &mut self,
        now: Instant,
        mut request: Request,
        target: SocketAddr,
        owner: O,
    ) -> TsxKey {
        let key = TsxKey::client(&request.line.method);

        let via = self.create_via(key.branch().clone());
        request.headers.insert_named_front(&via);

        if request.line.method == Method::ACK {
            // ACK never has a transaction
            log::warn!("{key}: ACK sent as request, sending stateless");
            request.headers.remove(&Name::VIA);
            self.send_stateless(request, target);
            return key;
        }

        self.start_client(now, key.clone(), request, target, owner);

        key
    }

    /// Cancel the pending INVITE transaction `key`.
    ///
    /// Stops retransmitting the INVITE and starts a CANCEL transaction with the same owner,
    /// returning its key. Returns `None` if the INVITE already got a final response.
    pub fn cancel(&mut self, now: Instant, key: &TsxKey) -> Option<TsxKey> {
        let tsx = self.clients.get_mut(key)?;

        if !key.is_invite()
            || tsx.cancelled
            || !matches!(tsx.state, State::Calling | State::Proceeding)
        {
            return None;
        }

        tsx.cancelled = true;
        tsx.timers.cancel_retransmit(&mut self.timers);
        tsx.timers.cancel_timeout(&mut self.timers);

        // the INVITE must still receive its 487 which is acknowledged as usual
        tsx.timers.timeout = Some(self.timers.insert(
            now + self.config.transaction_timeout(),
            (key.clone(), TimerKind::Timeout),
        ));

        let cancel = create_cancel(&tsx.request);
        let target = tsx.target;
        let owner = tsx.owner.clone();

        let cancel_key = key.cancel();

        self.start_client(now, cancel_key.clone(), cancel, target, owner);

        Some(cancel_key)
    }

    fn start_client(
        &mut self,
        now: Instant,
        key: TsxKey,
        request: Request,
        target: SocketAddr,
        owner: O,
    ) {
        let bytes = request.print();

        log::debug!("{key}: sending {request} to {target}");

        let mut timers = Timers::default();

        if !self.reliable() {
            timers.retransmit = Some(self.arm(now + self.config.t1, &key, TimerKind::Retransmit));
        }

        timers.timeout = Some(self.arm(
            now + self.config.transaction_timeout(),
            &key,
            TimerKind::Timeout,
        ));

        self.transmit(&key, target, bytes.clone());

        self.clients.insert(
            key,
            ClientTsx {
                owner,
                request,
                bytes,
                target,
                state: State::Calling,
                interval: self.config.t1,
                cancelled: false,
                ack: None,
                timers,
            },
        );
    }

    pub(super) fn receive_response(&mut self, now: Instant, response: Response, base: &BaseHeaders) {
        let key = TsxKey::client_from_response(base);

        let reliable = self.reliable();

        let Some(tsx) = self.clients.get_mut(&key) else {
            log::debug!("dropping unmatched response {response} ({key})");
            return;
        };

        match response.line.code.kind() {
            CodeKind::Provisional => {
                if !matches!(tsx.state, State::Calling | State::Proceeding) {
                    return;
                }

                tsx.state = State::Proceeding;

                if key.is_invite() {
                    tsx.timers.cancel_retransmit(&mut self.timers);

                    if !tsx.cancelled {
                        // timer C, restarted with every provisional response
                        tsx.timers.cancel_timeout(&mut self.timers);
                        tsx.timers.timeout = Some(self.timers.insert(
                            now + self.config.provisional_timeout,
                            (key.clone(), TimerKind::Timeout),
                        ));
                    }
                } else {
                    tsx.interval = self.config.t2;
                }

                self.events.push_back(TsxEvent::Response {
                    key,
                    owner: tsx.owner.clone(),
                    response,
                });
            }
            CodeKind::Success if key.is_invite() => match tsx.state {
                State::Calling | State::Proceeding => {
                    tsx.state = State::Accepted;
                    tsx.timers.cancel_retransmit(&mut self.timers);
                    tsx.timers.cancel_timeout(&mut self.timers);
                    tsx.timers.timeout = Some(self.timers.insert(
                        now + self.config.transaction_timeout(),
                        (key.clone(), TimerKind::Timeout),
                    ));

                    self.events.push_back(TsxEvent::Response {
                        key,
                        owner: tsx.owner.clone(),
                        response,
                    });
                }
                State::Accepted => {
                    self.events.push_back(TsxEvent::Response {
                        key,
                        owner: tsx.owner.clone(),
                        response,
                    });
                }
                State::Completed => {}
            },
            _ => match tsx.state {
                State::Calling | State::Proceeding => {
                    tsx.state = State::Completed;
                    tsx.timers.cancel_retransmit(&mut self.timers);
                    tsx.timers.cancel_timeout(&mut self.timers);

                    let linger = if key.is_invite() {
                        let ack = create_ack(&tsx.request, &response).print();
                        self.transmits.push_back(super::Transmit {
                            tsx: Some(key.clone()),
                            target: tsx.target,
                            bytes: ack.clone(),
                        });
                        tsx.ack = Some(ack);

                        TIMER_D
                    } else {
                        self.config.t4
                    };

                    self.events.push_back(TsxEvent::Response {
                        key: key.clone(),
                        owner: tsx.owner.clone(),
                        response,
                    });

                    if reliable {
                        self.remove_client(&key);
                    } else {
                        tsx.timers.linger = Some(
                            self.timers
                                .insert(now + linger, (key.clone(), TimerKind::Linger)),
                        );
                    }
                }
                State::Completed => {
                    if let Some(ack) = &tsx.ack {
                        self.transmits.push_back(super::Transmit {
                            tsx: Some(key.clone()),
                            target: tsx.target,
                            bytes: ack.clone(),
                        });
                    }
                }
                State::Accepted => {
                    log::debug!("{key}: ignoring {response} after 2xx");
                }
            },
        }
    }

    pub(super) fn client_timer(&mut self, now: Instant, key: TsxKey, kind: TimerKind) {
        let Some(tsx) = self.clients.get_mut(&key) else {
            return;
        };

        match kind {
            TimerKind::Retransmit => {
                tsx.timers.retransmit = None;

                if tsx.cancelled || !matches!(tsx.state, State::Calling | State::Proceeding) {
                    return;
                }

                log::trace!("{key}: retransmitting");

                self.transmits.push_back(super::Transmit {
                    tsx: Some(key.clone()),
                    target: tsx.target,
                    bytes: tsx.bytes.clone(),
                });

                tsx.interval = backoff(tsx.interval, &self.config);
                tsx.timers.retransmit = Some(
                    self.timers
                        .insert(now + tsx.interval, (key, TimerKind::Retransmit)),
                );
            }
            TimerKind::Timeout => {
                tsx.timers.timeout = None;

                if matches!(tsx.state, State::Calling | State::Proceeding) {
                    log::info!("{key}: timed out");

                    self.events.push_back(TsxEvent::Timeout {
                        key: key.clone(),
                        owner: tsx.owner.clone(),
                    });
                }

                self.remove_client(&key);
            }
            TimerKind::Linger => {
                tsx.timers.linger = None;
                self.remove_client(&key);
            }
        }
    }

    pub(super) fn remove_client(&mut self, key: &TsxKey) {
        if let Some(mut tsx) = self.clients.remove(key) {
            tsx.timers.cancel_all(&mut self.timers);

            log::trace!("{key}: terminated");

            self.events.push_back(TsxEvent::Terminated {
                key: key.clone(),
                owner: tsx.owner,
            });
        }
    }
}

/// Create the CANCEL for an INVITE (RFC 3261 section 9.1)
fn create_cancel(invite: &Request) -> Request {
    let mut cancel = Request::new(Method::CANCEL, invite.line.uri.clone());

    if let Some(via) = invite.headers.values(&Name::VIA).next() {
        cancel.headers.insert(Name::VIA, via.clone());
    }

    for name in [Name::FROM, Name::TO, Name::CALL_ID, Name::ROUTE] {
        for value in invite.headers.values(&name) {
            cancel.headers.insert(name.clone(), value.clone());
        }
    }

    if let Ok(cseq) = invite.headers.get_named::<CSeq>() {
        cancel
            .headers
            .insert_named(&CSeq::new(cseq.cseq, Method::CANCEL));
    }

    cancel.headers.insert(Name::MAX_FORWARDS, "70");

    cancel
}

/// Create the ACK for a non-2xx final response to an INVITE (RFC 3261 section 17.1.1.3)
fn create_ack(invite: &Request, response: &Response) -> Request {
    let mut ack = Request::new(Method::ACK, invite.line.uri.clone());

    if let Some(via) = invite.headers.values(&Name::VIA).next() {
        ack.headers.insert(Name::VIA, via.clone());
    }

    for value in invite.headers.values(&Name::FROM) {
        ack.headers.insert(Name::FROM, value.clone());
    }

    for value in response.headers.values(&Name::TO) {
        ack.headers.insert(Name::TO, value.clone());
    }

    for name in [Name::CALL_ID, Name::ROUTE] {
        for value in invite.headers.values(&name) {
            ack.headers.insert(name.clone(), value.clone());
        }
    }

    if let Ok(cseq) = invite.headers.get_named::<CSeq>() {
        ack.headers.insert_named(&CSeq::new(cseq.cseq, Method::ACK));
    }

    ack.headers.insert(Name::MAX_FORWARDS, "70");

    ack
}
