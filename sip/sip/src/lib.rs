#![warn(unreachable_pub)]
//! # High level SIP client
//!
//! A [`Client`] registers one account with its registrar, places and receives calls and
//! reports everything that happens as [`Event`]s.
//!
//! All control operations return immediately. They are checked against the latest
//! [`DirectorySnapshot`], queued to the client's reactor task and their outcome is observed
//! through events. Observers run on a separate dispatcher task and may call back into the
//! client.

use crate::client_builder::ClientConfig;
use crate::dispatcher::{LocalCalls, Observers};
use crate::reactor::{Control, Reactor};
use parking_lot::Mutex;
use sip_core::transport::{Transport, TransportConfig};
use sip_ua::account::parse_uri;
use sip_ua::{AgentError, CallIds, Command, UserAgent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

mod call;
mod client_builder;
mod dispatcher;
mod error;
mod reactor;

pub use call::Call;
pub use client_builder::{
    ClientBuilder, DEFAULT_EVENT_CAPACITY, DEFAULT_STOP_GRACE, MIN_REGISTRATION_INTERVAL,
    MediaFactory,
};
pub use dispatcher::{Callback, SubscriptionId};
pub use error::Error;
pub use sip_core::TimerConfig;
pub use sip_core::transport::TransportKind;
pub use sip_ua::{
    Account, CallId, CallSnapshot, CallState, CloseReason, Direction, DirectorySnapshot, Event,
    EventKind, Failure, MediaBackend, NullMedia, RegistrationSnapshot, RegistrationState,
    UpdateOperation,
};

/// High level SIP client, must be constructed using [`ClientBuilder`]
///
/// Can be cheaply cloned.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    observers: Arc<Observers>,
    local: Arc<Mutex<LocalCalls>>,
    call_ids: CallIds,

    running: Mutex<Option<Running>>,

    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
}

struct Running {
    control: mpsc::UnboundedSender<Control>,
    snapshot: watch::Receiver<Arc<DirectorySnapshot>>,
    reactor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Client {
    /// Create a [`ClientBuilder`]
    pub fn builder(account: Account) -> ClientBuilder {
        ClientBuilder::new(account)
    }

    pub(crate) fn from_config(config: ClientConfig, observers: Observers) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                observers: Arc::new(observers),
                local: Arc::default(),
                call_ids: CallIds::default(),
                running: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn account(&self) -> &Account {
        &self.inner.config.agent.account
    }

    /// Open the transport, start the reactor and register
    pub async fn start(&self) -> Result<(), Error> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.inner.running.lock().is_some() {
            return Err(Error::AlreadyStarted);
        }

        let config = &self.inner.config;
        let account = &config.agent.account;

        let remote = match config.outbound_proxy {
            Some(proxy) => proxy,
            None => resolve(&account.domain, account.port).await?,
        };

        let mut transport_config = TransportConfig::new(
            config.transport,
            config.bind,
            remote,
            account.domain.clone(),
        );
        transport_config.send_timeout = config.send_timeout;

        #[cfg(feature = "tls-rustls")]
        {
            transport_config.tls = config.tls.clone();
        }

        let transport = config.factory.open(&transport_config).await?;
        let sent_by = reachable_sent_by(transport.as_ref(), remote).await;

        log::info!(
            "started {} transport at {sent_by}, registrar at {remote}",
            transport.kind()
        );

        let agent = UserAgent::new(
            config.agent.clone(),
            (config.media)(sent_by),
            transport.kind(),
            sent_by,
            remote,
            self.inner.call_ids.clone(),
        )?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(DirectorySnapshot::default()));

        let reactor = Reactor::new(
            agent,
            transport,
            control_rx,
            events_tx,
            snapshot_tx,
            self.inner.local.clone(),
            config.stop_grace,
        );

        let dispatcher = tokio::spawn(dispatcher::run(
            events_rx,
            self.inner.observers.clone(),
            self.inner.local.clone(),
        ));
        let reactor = tokio::spawn(reactor.run());

        // nothing can be refused yet, the channel was just created
        let _ = control_tx.send(Control::Command(Command::Register));

        *self.inner.running.lock() = Some(Running {
            control: control_tx,
            snapshot: snapshot_rx,
            reactor,
            dispatcher,
        });

        Ok(())
    }

    /// Hang up all calls and unregister, waiting at most the configured grace period.
    ///
    /// Every event produced until then is delivered before this returns. The client can be
    /// started again afterwards.
    pub async fn stop(&self) -> Result<(), Error> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let running = self.inner.running.lock().take().ok_or(Error::NotStarted)?;

        let _ = running.control.send(Control::Stop {
            grace: self.inner.config.stop_grace,
        });
        drop(running.control);

        if let Err(e) = running.reactor.await {
            log::error!("reactor task failed, {e}");
        }

        if let Err(e) = running.dispatcher.await {
            log::error!("dispatcher task failed, {e}");
        }

        self.inner.local.lock().pending.clear();

        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// Register again, e.g. after a failure or [`Client::unregister`]
    pub fn registry(&self) -> Result<(), Error> {
        self.command(Command::Register)
    }

    /// Remove the binding, a no-op when not registered
    pub fn unregister(&self) -> Result<(), Error> {
        self.command(Command::Unregister)
    }

    pub fn is_registered(&self) -> bool {
        self.registration_state().is_registered()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.snapshot().registration.state
    }

    /// Credentials used for the next challenge
    pub fn set_password(&self, password: Option<String>) -> Result<(), Error> {
        self.command(Command::SetPassword(password))
    }

    /// Call `uri`, progress is reported with events carrying the returned call's id
    pub fn make_call(&self, uri: &str) -> Result<Call, Error> {
        parse_uri(uri)?;

        let snapshot = self.snapshot();

        let live = snapshot
            .calls
            .iter()
            .filter(|call| call.state != CallState::Closed)
            .count();

        // made but not yet seen by the reactor
        let pending = self
            .inner
            .local
            .lock()
            .pending
            .iter()
            .filter(|id| snapshot.call(**id).is_none())
            .count();

        if live + pending >= self.inner.config.agent.max_calls {
            return Err(AgentError::TooManyCalls.into());
        }

        let id = self.inner.call_ids.next();

        // inserted before queueing, the reactor removes it once the call is published
        self.inner.local.lock().pending.insert(id);

        if let Err(e) = self.command(Command::MakeCall {
            call: id,
            target: uri.to_owned(),
        }) {
            self.inner.local.lock().pending.remove(&id);
            return Err(e);
        }

        Ok(Call::new(id, self.clone()))
    }

    /// Handle to a live call
    pub fn call(&self, id: CallId) -> Option<Call> {
        self.call_state(id).map(|_| Call::new(id, self.clone()))
    }

    /// Handles to all live calls
    pub fn calls(&self) -> Vec<Call> {
        self.snapshot()
            .calls
            .iter()
            .map(|call| Call::new(call.id, self.clone()))
            .collect()
    }

    /// The latest published state of registration and calls
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        match &*self.inner.running.lock() {
            Some(running) => running.snapshot.borrow().clone(),
            None => Arc::new(DirectorySnapshot::default()),
        }
    }

    /// Call `callback` for every event of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(Some(kind), Arc::new(callback))
    }

    /// Call `callback` for every event
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(None, Arc::new(callback))
    }

    /// Returns `false` if there was no such subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Receive every event through a channel instead of a callback
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribe_all(move |event| {
            // receiver dropped, the subscription stays inert
            let _ = tx.send(event.clone());
        });

        rx
    }

    /// State of a call which is live or about to be
    pub(crate) fn call_state(&self, id: CallId) -> Option<(Direction, CallState)> {
        if let Some(call) = self.snapshot().call(id) {
            return Some((call.direction, call.state));
        }

        self.inner
            .local
            .lock()
            .pending
            .contains(&id)
            .then_some((Direction::Outgoing, CallState::Calling))
    }

    pub(crate) fn local(&self) -> &Mutex<LocalCalls> {
        &self.inner.local
    }

    pub(crate) fn command(&self, command: Command) -> Result<(), Error> {
        let running = self.inner.running.lock();
        let running = running.as_ref().ok_or(Error::NotStarted)?;

        running
            .control
            .send(Control::Command(command))
            .map_err(|_| Error::ReactorGone)
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let resolve_error = |source: std::io::Error| Error::Resolve {
        host: host.to_owned(),
        source,
    };

    lookup_host((host, port))
        .await
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(std::io::Error::other("no addresses found")))
}

/// A transport bound to the unspecified address cannot put it into `Via` and `Contact`, use
/// the local address the system routes to `remote` with instead
async fn reachable_sent_by(transport: &dyn Transport, remote: SocketAddr) -> SocketAddr {
    let sent_by = transport.sent_by();

    if !sent_by.ip().is_unspecified() {
        return sent_by;
    }

    let probe = async {
        let socket = UdpSocket::bind(SocketAddr::new(sent_by.ip(), 0)).await?;
        socket.connect(remote).await?;
        socket.local_addr()
    };

    match probe.await {
        Ok(local) => SocketAddr::new(local.ip(), sent_by.port()),
        Err(e) => {
            log::warn!("failed to find local address towards {remote}, {e}");
            sent_by
        }
    }
}
