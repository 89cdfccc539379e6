//! The single task owning the transport, the clock and the engine

use crate::dispatcher::LocalCalls;
use parking_lot::Mutex;
use sip_core::TransportError;
use sip_core::transport::{Received, Transport};
use sip_ua::{CallId, Command, DirectorySnapshot, Event, MediaBackend, UserAgent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

pub(crate) type Agent = UserAgent<Box<dyn MediaBackend>>;

/// Messages from [`Client`](crate::Client) to its reactor
#[derive(Debug)]
pub(crate) enum Control {
    Command(Command),
    /// Hang up, unregister and exit once done or after `grace`
    Stop { grace: Duration },
}

pub(crate) struct Reactor {
    agent: Agent,
    transport: Arc<dyn Transport>,

    /// Cleared when a stream transport loses its connection
    connected: bool,

    control: mpsc::UnboundedReceiver<Control>,

    /// Bounded channel to the dispatcher
    events: mpsc::Sender<Event>,

    /// Events not yet accepted by the dispatcher. The engine is never blocked by a slow
    /// observer, events wait here instead.
    outbox: VecDeque<Event>,

    snapshot: watch::Sender<Arc<DirectorySnapshot>>,

    local: Arc<Mutex<LocalCalls>>,

    /// Calls made since the last published snapshot
    made: Vec<CallId>,

    /// Used when every client handle is gone without calling stop
    default_grace: Duration,
}

/// The engine works with std instants, taken from tokio's clock so paused time drives it too
fn now() -> std::time::Instant {
    Instant::now().into_std()
}

impl Reactor {
    pub(crate) fn new(
        agent: Agent,
        transport: Arc<dyn Transport>,
        control: mpsc::UnboundedReceiver<Control>,
        events: mpsc::Sender<Event>,
        snapshot: watch::Sender<Arc<DirectorySnapshot>>,
        local: Arc<Mutex<LocalCalls>>,
        default_grace: Duration,
    ) -> Self {
        Self {
            agent,
            transport,
            connected: true,
            control,
            events,
            outbox: VecDeque::new(),
            snapshot,
            local,
            made: Vec::new(),
            default_grace,
        }
    }

    pub(crate) async fn run(mut self) {
        log::debug!("reactor started on {}", self.transport.sent_by());

        let grace = loop {
            self.flush().await;

            let transport = self.transport.clone();
            let events = self.events.clone();
            let deadline = self.agent.next_deadline().map(Instant::from_std);

            tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::Command(command)) => self.command(command).await,
                    Some(Control::Stop { grace }) => break grace,
                    None => {
                        log::debug!("all client handles dropped");
                        break self.default_grace;
                    }
                },
                received = transport.recv(), if self.connected => self.received(received),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.agent.handle_timeout(now());
                }
                permit = events.reserve(), if !self.outbox.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = self.outbox.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => {
                        log::warn!("dispatcher is gone, discarding {} events", self.outbox.len());
                        self.outbox.clear();
                    }
                },
            }
        };

        self.shutdown(grace).await;

        log::debug!("reactor stopped");
    }

    /// Send everything the engine wants to send, publish the directory, then queue its events.
    ///
    /// The snapshot goes out before the events, an observer always sees a directory at least
    /// as new as the event it handles.
    async fn flush(&mut self) {
        while let Some(transmit) = self.agent.poll_transmit() {
            if let Err(e) = self.transport.send(&transmit.bytes, transmit.target).await {
                log::warn!("failed to send to {}, {e}", transmit.target);

                self.agent.handle_send_failure(now(), transmit.tsx, e);
            }
        }

        self.snapshot.send_replace(self.agent.snapshot());

        // made calls are either in the snapshot now or were refused
        if !self.made.is_empty() {
            let mut local = self.local.lock();

            for call in self.made.drain(..) {
                local.pending.remove(&call);
            }
        }

        while let Some(event) = self.agent.poll_event() {
            self.outbox.push_back(event);
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn command(&mut self, command: Command) {
        if matches!(command, Command::Register) && !self.connected {
            self.reconnect().await;
        }

        if let Command::MakeCall { call, .. } = &command {
            self.made.push(*call);
        }

        // refusals are logged by the engine
        let _ = self.agent.handle_command(now(), command);
    }

    async fn reconnect(&mut self) {
        match self.transport.reconnect().await {
            Ok(()) => {
                log::info!("reconnected from {}", self.transport.sent_by());

                self.connected = true;
                self.agent
                    .set_transport(self.transport.kind(), self.transport.sent_by());
            }
            // the REGISTER fails on send and reports it
            Err(e) => log::warn!("failed to reconnect, {e}"),
        }
    }

    fn received(&mut self, received: Result<Received, TransportError>) {
        match received {
            Ok(Received { source, buffer }) => self.agent.handle_datagram(now(), buffer, source),
            Err(e) if self.transport.reliable() => {
                self.connected = false;
                self.agent.handle_connection_lost(now(), e);
            }
            Err(e) => log::warn!("failed to receive, {e}"),
        }
    }

    /// Hang up every call and remove the registration, waiting at most `grace` for the
    /// transactions to finish. Every pending event is handed to the dispatcher before returning.
    async fn shutdown(&mut self, grace: Duration) {
        let give_up = Instant::now() + grace;

        let _ = self.agent.handle_command(now(), Command::Shutdown);

        loop {
            self.flush().await;

            if self.agent.is_idle() {
                break;
            }

            if Instant::now() >= give_up {
                log::warn!("stopping with unfinished transactions");
                break;
            }

            let wake = self
                .agent
                .next_deadline()
                .map(Instant::from_std)
                .map_or(give_up, |deadline| deadline.min(give_up));

            let transport = self.transport.clone();

            tokio::select! {
                received = transport.recv(), if self.connected => self.received(received),
                _ = sleep_until(wake) => self.agent.handle_timeout(now()),
            }
        }

        for event in self.outbox.drain(..) {
            if self.events.send(event).await.is_err() {
                log::warn!("dispatcher is gone, discarding remaining events");
                break;
            }
        }
    }
}
