//! Sans-IO transaction layer (RFC 3261 section 17)
//!
//! [`Transactions`] never touches a socket or a clock. The owner feeds it received
//! messages and the current time, then drains [`Transmit`]s and [`TsxEvent`]s and sleeps until
//! [`Transactions::next_deadline`].

use crate::timer::{TimerId, TimerQueue};
use crate::transport::TransportKind;
use crate::{BaseHeaders, Message, Request, Response, TransportError};
use bytes::Bytes;
use sip_types::header::typed::Via;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

mod client;
mod key;
mod server;

pub use key::TsxKey;

use client::ClientTsx;
use server::ServerTsx;

pub mod consts {
    use std::time::Duration;

    pub const T1: Duration = Duration::from_millis(500);
    pub const T2: Duration = Duration::from_secs(4);
    pub const T4: Duration = Duration::from_secs(5);

    /// Wait time for response retransmits of a completed INVITE client transaction
    pub const TIMER_D: Duration = Duration::from_secs(32);

    /// Timer C, an INVITE without final response after this long is given up
    pub const PROVISIONAL_TIMEOUT: Duration = Duration::from_secs(180);

    pub const RFC3261_BRANCH_PREFIX: &str = "z9hG4bK";
}

/// Timer values used by all transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// RTT estimate, initial retransmit interval
    pub t1: Duration,
    /// Maximum retransmit interval
    pub t2: Duration,
    /// Maximum time a message remains in the network
    pub t4: Duration,
    pub provisional_timeout: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            t1: consts::T1,
            t2: consts::T2,
            t4: consts::T4,
            provisional_timeout: consts::PROVISIONAL_TIMEOUT,
        }
    }
}

impl TimerConfig {
    /// Timer B/F/H/J, 64*T1
    pub fn transaction_timeout(&self) -> Duration {
        self.t1 * 64
    }
}

/// Message the owner has to put on the wire
#[derive(Debug, Clone)]
pub struct Transmit {
    /// Transaction the message belongs to, `None` for stateless sends
    pub tsx: Option<TsxKey>,
    pub target: SocketAddr,
    pub bytes: Bytes,
}

/// Outcome of a transaction, reported to the owner `O` of the client transaction
#[derive(Debug)]
pub enum TsxEvent<O> {
    /// A provisional or final response was received. 2xx responses to INVITEs are
    /// reported for every retransmission, so each one can be acknowledged.
    Response {
        key: TsxKey,
        owner: O,
        response: Response,
    },

    /// No final response within the transaction timeout
    Timeout { key: TsxKey, owner: O },

    /// Sending a message of the transaction failed
    TransportFailed {
        key: TsxKey,
        owner: O,
        error: TransportError,
    },

    /// A 2xx response to a received INVITE was never acknowledged
    AckTimeout { key: TsxKey },

    /// The client transaction is gone, no further events will be emitted for it
    Terminated { key: TsxKey, owner: O },
}

/// Request received outside any ongoing transaction
#[derive(Debug)]
pub struct IncomingRequest {
    /// Server transaction created for the request, responses must be sent with [`Transactions::respond`].
    /// ACK requests never create one.
    pub key: TsxKey,
    pub source: SocketAddr,
    pub base: BaseHeaders,
    pub request: Request,
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Retransmit,
    Timeout,
    Linger,
}

#[derive(Debug, Default)]
struct Timers {
    retransmit: Option<TimerId>,
    timeout: Option<TimerId>,
    linger: Option<TimerId>,
}

impl Timers {
    fn cancel_retransmit<T>(&mut self, queue: &mut TimerQueue<T>) {
        if let Some(id) = self.retransmit.take() {
            queue.cancel(id);
        }
    }

    fn cancel_timeout<T>(&mut self, queue: &mut TimerQueue<T>) {
        if let Some(id) = self.timeout.take() {
            queue.cancel(id);
        }
    }

    fn cancel_all<T>(&mut self, queue: &mut TimerQueue<T>) {
        self.cancel_retransmit(queue);
        self.cancel_timeout(queue);

        if let Some(id) = self.linger.take() {
            queue.cancel(id);
        }
    }
}

/// All client and server transactions of one transport
#[derive(Debug)]
pub struct Transactions<O> {
    config: TimerConfig,
    kind: TransportKind,
    sent_by: SocketAddr,

    clients: HashMap<TsxKey, ClientTsx<O>>,
    servers: HashMap<TsxKey, ServerTsx>,

    timers: TimerQueue<(TsxKey, TimerKind)>,
    transmits: VecDeque<Transmit>,
    events: VecDeque<TsxEvent<O>>,
}

impl<O: Clone> Transactions<O> {
    pub fn new(config: TimerConfig, kind: TransportKind, sent_by: SocketAddr) -> Self {
        Self {
            config,
            kind,
            sent_by,
            clients: HashMap::new(),
            servers: HashMap::new(),
            timers: TimerQueue::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn sent_by(&self) -> SocketAddr {
        self.sent_by
    }

    /// Update the transport after it has been reopened
    pub fn set_transport(&mut self, kind: TransportKind, sent_by: SocketAddr) {
        self.kind = kind;
        self.sent_by = sent_by;
    }

    fn reliable(&self) -> bool {
        self.kind.reliable()
    }

    fn create_via(&self, branch: bytesstr::BytesStr) -> Via {
        Via::new(self.kind.name(), self.sent_by.into(), branch).with_rport()
    }

    /// Feed a received message into the transaction layer.
    ///
    /// Responses are reported as [`TsxEvent`]s, requests which do not belong to an ongoing
    /// transaction are returned.
    pub fn receive(
        &mut self,
        now: Instant,
        message: Message,
        source: SocketAddr,
    ) -> Option<IncomingRequest> {
        let base = match BaseHeaders::extract_from(message.headers()) {
            Ok(base) => base,
            Err(e) => {
                log::warn!("dropping message from {source}, {e}");
                return None;
            }
        };

        match message {
            Message::Response(response) => {
                self.receive_response(now, response, &base);
                None
            }
            Message::Request(request) => self.receive_request(now, request, base, source),
        }
    }

    /// Send a message outside of any transaction, used for ACKs to 2xx responses
    pub fn send_stateless(&mut self, mut request: Request, target: SocketAddr) {
        let via = self.create_via(key::generate_branch());
        request.headers.insert_named_front(&via);

        log::debug!("sending stateless {request}");

        self.transmits.push_back(Transmit {
            tsx: None,
            target,
            bytes: request.print(),
        });
    }

    /// Report that sending a message of the transaction `key` failed.
    ///
    /// The transaction is aborted, retrying is up to its owner.
    pub fn transport_failed(&mut self, key: &TsxKey, error: TransportError) {
        if let Some(tsx) = self.clients.get(key) {
            log::warn!("{key}: aborting, {error}");

            self.events.push_back(TsxEvent::TransportFailed {
                key: key.clone(),
                owner: tsx.owner.clone(),
                error,
            });

            self.remove_client(key);
        } else {
            self.remove_server(key);
        }
    }

    /// Abort every transaction, after the connection they were using is gone
    pub fn fail_all(&mut self, error: TransportError) {
        let keys: Vec<TsxKey> = self.clients.keys().cloned().collect();

        for key in keys {
            self.transport_failed(&key, error.clone());
        }

        let keys: Vec<TsxKey> = self.servers.keys().cloned().collect();

        for key in keys {
            self.remove_server(&key);
        }
    }

    /// Process all timers expired at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        while let Some((key, kind)) = self.timers.pop_expired(now) {
            if key.is_server() {
                self.server_timer(now, key, kind);
            } else {
                self.client_timer(now, key, kind);
            }
        }
    }

    /// Earliest point in time [`Transactions::handle_timeout`] must be called
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TsxEvent<O>> {
        self.events.pop_front()
    }

    /// Number of live client and server transactions
    pub fn len(&self) -> usize {
        self.clients.len() + self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn arm(&mut self, at: Instant, key: &TsxKey, kind: TimerKind) -> TimerId {
        self.timers.insert(at, (key.clone(), kind))
    }

    fn transmit(&mut self, key: &TsxKey, target: SocketAddr, bytes: Bytes) {
        self.transmits.push_back(Transmit {
            tsx: Some(key.clone()),
            target,
            bytes,
        });
    }
}

/// Retransmit interval after `current`, doubled and capped at T2
fn backoff(current: Duration, config: &TimerConfig) -> Duration {
    (current * 2).min(config.t2)
}
