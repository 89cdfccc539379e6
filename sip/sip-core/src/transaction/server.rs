use super::{IncomingRequest, TimerKind, Timers, Transactions, Transmit, TsxEvent, TsxKey, backoff};
use crate::{BaseHeaders, Request, Response};
use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::{CodeKind, Method};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum State {
    Trying,
    Proceeding,
    /// Final non-2xx response sent
    Completed,
    /// 2xx to an INVITE sent, retransmitted until the ACK arrives
    Accepted,
    /// ACK to a non-2xx response received
    Confirmed,
}

#[derive(Debug)]
pub(super) struct ServerTsx {
    source: SocketAddr,
    state: State,

    // identify the ACK to a 2xx, which carries a new branch
    call_id: BytesStr,
    cseq: u32,

    response: Option<Bytes>,
    interval: Duration,
    timers: Timers,
}

impl<O: Clone> Transactions<O> {
    pub(super) fn receive_request(
        &mut self,
        now: Instant,
        request: Request,
        base: BaseHeaders,
        source: SocketAddr,
    ) -> Option<IncomingRequest> {
        let key = TsxKey::server(&base);

        if request.line.method == Method::ACK {
            return self.receive_ack(now, key, request, base, source);
        }

        if let Some(tsx) = self.servers.get(&key) {
            log::debug!("{key}: absorbed retransmitted {request}");

            if let Some(response) = &tsx.response {
                self.transmits.push_back(Transmit {
                    tsx: Some(key.clone()),
                    target: tsx.source,
                    bytes: response.clone(),
                });
            }

            return None;
        }

        self.servers.insert(
            key.clone(),
            ServerTsx {
                source,
                state: State::Trying,
                call_id: base.call_id.0.clone(),
                cseq: base.cseq.cseq,
                response: None,
                interval: self.config.t1,
                timers: Timers::default(),
            },
        );

        Some(IncomingRequest {
            key,
            source,
            base,
            request,
        })
    }

    fn receive_ack(
        &mut self,
        now: Instant,
        key: TsxKey,
        request: Request,
        base: BaseHeaders,
        source: SocketAddr,
    ) -> Option<IncomingRequest> {
        let reliable = self.reliable();

        if let Some(tsx) = self.servers.get_mut(&key) {
            match tsx.state {
                State::Completed => {
                    // ACK to a non-2xx is part of the transaction
                    tsx.state = State::Confirmed;
                    tsx.timers.cancel_retransmit(&mut self.timers);
                    tsx.timers.cancel_timeout(&mut self.timers);

                    if reliable {
                        self.remove_server(&key);
                    } else {
                        tsx.timers.linger = Some(
                            self.timers
                                .insert(now + self.config.t4, (key, TimerKind::Linger)),
                        );
                    }

                    return None;
                }
                State::Accepted => {
                    // peer reused the INVITE branch for the ACK
                    self.remove_server(&key);
                }
                _ => return None,
            }
        } else {
            let accepted = self
                .servers
                .iter()
                .find(|(k, tsx)| {
                    k.is_invite()
                        && tsx.state == State::Accepted
                        && tsx.cseq == base.cseq.cseq
                        && tsx.call_id == base.call_id.0
                })
                .map(|(k, _)| k.clone());

            if let Some(accepted) = accepted {
                self.remove_server(&accepted);
            }
        }

        Some(IncomingRequest {
            key,
            source,
            base,
            request,
        })
    }

    /// Send a response inside the server transaction `key`
    pub fn respond(&mut self, now: Instant, key: &TsxKey, response: Response) {
        let reliable = self.reliable();

        let Some(tsx) = self.servers.get_mut(key) else {
            log::warn!("{key}: no transaction to send {response} in");
            return;
        };

        if !matches!(tsx.state, State::Trying | State::Proceeding) {
            log::warn!("{key}: final response already sent, dropping {response}");
            return;
        }

        log::debug!("{key}: responding {response}");

        let bytes = response.print();

        self.transmits.push_back(Transmit {
            tsx: Some(key.clone()),
            target: tsx.source,
            bytes: bytes.clone(),
        });

        tsx.response = Some(bytes);

        let timeout = now + self.config.transaction_timeout();

        match response.line.code.kind() {
            CodeKind::Provisional => {
                tsx.state = State::Proceeding;
            }
            kind if key.is_invite() => {
                tsx.state = if kind == CodeKind::Success {
                    State::Accepted
                } else {
                    State::Completed
                };

                if !reliable {
                    tsx.timers.retransmit = Some(self.timers.insert(
                        now + self.config.t1,
                        (key.clone(), TimerKind::Retransmit),
                    ));
                }

                tsx.timers.timeout = Some(
                    self.timers
                        .insert(timeout, (key.clone(), TimerKind::Timeout)),
                );
            }
            _ => {
                tsx.state = State::Completed;

                if reliable {
                    self.remove_server(key);
                } else {
                    // timer J, absorb request retransmissions
                    tsx.timers.linger = Some(
                        self.timers
                            .insert(timeout, (key.clone(), TimerKind::Linger)),
                    );
                }
            }
        }
    }

    pub(super) fn server_timer(&mut self, now: Instant, key: TsxKey, kind: TimerKind) {
        let Some(tsx) = self.servers.get_mut(&key) else {
            return;
        };

        match kind {
            TimerKind::Retransmit => {
                tsx.timers.retransmit = None;

                if !matches!(tsx.state, State::Accepted | State::Completed) {
                    return;
                }

                if let Some(response) = &tsx.response {
                    self.transmits.push_back(Transmit {
                        tsx: Some(key.clone()),
                        target: tsx.source,
                        bytes: response.clone(),
                    });
                }

                tsx.interval = backoff(tsx.interval, &self.config);
                tsx.timers.retransmit = Some(
                    self.timers
                        .insert(now + tsx.interval, (key, TimerKind::Retransmit)),
                );
            }
            TimerKind::Timeout => {
                tsx.timers.timeout = None;

                match tsx.state {
                    State::Accepted => {
                        log::warn!("{key}: 2xx was never acknowledged");
                        self.events.push_back(TsxEvent::AckTimeout { key: key.clone() });
                    }
                    State::Completed => {
                        log::debug!("{key}: no ACK received for final response");
                    }
                    _ => {}
                }

                self.remove_server(&key);
            }
            TimerKind::Linger => {
                tsx.timers.linger = None;
                self.remove_server(&key);
            }
        }
    }

    pub(super) fn remove_server(&mut self, key: &TsxKey) {
        if let Some(mut tsx) = self.servers.remove(key) {
            tsx.timers.cancel_all(&mut self.timers);

            log::trace!("{key}: terminated");
        }
    }
}
