use crate::dispatcher::{Callback, Observers};
use crate::{Client, Error};
use sip_core::TimerConfig;
use sip_core::transport::{DEFAULT_SEND_TIMEOUT, DefaultFactory, Factory, TransportKind};
use sip_ua::{Account, Event, EventKind, MediaBackend, NullMedia, UserAgentConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the channel between reactor and dispatcher
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default time [`Client::stop`] waits for calls and registration to be torn down
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Registration intervals shorter than this are refused
pub const MIN_REGISTRATION_INTERVAL: Duration = Duration::from_secs(60);

/// RTP port announced by the default media backend
const NULL_MEDIA_PORT: u16 = 4000;

/// Creates the media backend once the local address is known
pub type MediaFactory = Arc<dyn Fn(SocketAddr) -> Box<dyn MediaBackend> + Send + Sync>;

/// Everything a [`Client`] needs to start, produced by [`ClientBuilder::build`]
#[derive(Clone)]
pub(crate) struct ClientConfig {
    pub(crate) agent: UserAgentConfig,
    pub(crate) transport: TransportKind,
    pub(crate) bind: SocketAddr,
    pub(crate) outbound_proxy: Option<SocketAddr>,
    pub(crate) send_timeout: Duration,
    pub(crate) event_capacity: usize,
    pub(crate) stop_grace: Duration,
    pub(crate) media: MediaFactory,
    pub(crate) factory: Arc<dyn Factory>,
    #[cfg(feature = "tls-rustls")]
    pub(crate) tls: Option<tokio_rustls::TlsConnector>,
}

pub struct ClientBuilder {
    account: Account,
    transport: TransportKind,
    bind: SocketAddr,
    outbound_proxy: Option<SocketAddr>,
    refresh_fraction: f64,
    max_calls: usize,
    no_answer_timeout: Duration,
    timers: TimerConfig,
    user_agent: Option<String>,
    send_timeout: Duration,
    event_capacity: usize,
    stop_grace: Duration,
    media: MediaFactory,
    factory: Arc<dyn Factory>,
    #[cfg(feature = "tls-rustls")]
    tls: Option<tokio_rustls::TlsConnector>,
    observers: Vec<(Option<EventKind>, Callback)>,
}

impl ClientBuilder {
    pub fn new(account: Account) -> Self {
        let defaults = UserAgentConfig::new(account);

        Self {
            account: defaults.account,
            transport: TransportKind::Udp,
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            outbound_proxy: None,
            refresh_fraction: defaults.refresh_fraction,
            max_calls: defaults.max_calls,
            no_answer_timeout: defaults.no_answer_timeout,
            timers: defaults.timers,
            user_agent: defaults.user_agent,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            stop_grace: DEFAULT_STOP_GRACE,
            media: Arc::new(|local: SocketAddr| {
                Box::new(NullMedia::new(local.ip(), NULL_MEDIA_PORT)) as Box<dyn MediaBackend>
            }),
            factory: Arc::new(DefaultFactory),
            #[cfg(feature = "tls-rustls")]
            tls: None,
            observers: Vec::new(),
        }
    }

    pub fn transport(&mut self, kind: TransportKind) -> &mut Self {
        self.transport = kind;
        self
    }

    /// Local address of the transport, any interface and port by default
    pub fn bind(&mut self, addr: SocketAddr) -> &mut Self {
        self.bind = addr;
        self
    }

    /// Send everything to `addr` instead of resolving the account's domain
    pub fn outbound_proxy(&mut self, addr: SocketAddr) -> &mut Self {
        self.outbound_proxy = Some(addr);
        self
    }

    pub fn refresh_fraction(&mut self, fraction: f64) -> &mut Self {
        self.refresh_fraction = fraction;
        self
    }

    pub fn max_calls(&mut self, max_calls: usize) -> &mut Self {
        self.max_calls = max_calls;
        self
    }

    /// How long an incoming call may ring before it is refused
    pub fn no_answer_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.no_answer_timeout = timeout;
        self
    }

    pub fn timers(&mut self, timers: TimerConfig) -> &mut Self {
        self.timers = timers;
        self
    }

    /// `User-Agent` header value, `None` omits the header
    pub fn user_agent(&mut self, user_agent: Option<String>) -> &mut Self {
        self.user_agent = user_agent;
        self
    }

    pub fn send_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.send_timeout = timeout;
        self
    }

    pub fn event_capacity(&mut self, capacity: usize) -> &mut Self {
        self.event_capacity = capacity;
        self
    }

    pub fn stop_grace(&mut self, grace: Duration) -> &mut Self {
        self.stop_grace = grace;
        self
    }

    /// Use another media backend, created with the local address on every start
    pub fn media<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(SocketAddr) -> Box<dyn MediaBackend> + Send + Sync + 'static,
    {
        self.media = Arc::new(factory);
        self
    }

    /// Replace the way transports are opened
    pub fn transport_factory<F: Factory>(&mut self, factory: F) -> &mut Self {
        self.factory = Arc::new(factory);
        self
    }

    #[cfg(feature = "tls-rustls")]
    pub fn rustls_connector(&mut self, connector: tokio_rustls::TlsConnector) -> &mut Self {
        self.tls = Some(connector);
        self
    }

    /// Observe every event of the given kind, from the very first one
    pub fn on<F>(&mut self, kind: EventKind, callback: F) -> &mut Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.observers.push((Some(kind), Arc::new(callback)));
        self
    }

    pub fn on_all<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.observers.push((None, Arc::new(callback)));
        self
    }

    pub fn build(&self) -> Result<Client, Error> {
        if self.account.username.is_empty() {
            return Err(Error::InvalidConfig("username must not be empty"));
        }

        if self.account.domain.is_empty() {
            return Err(Error::InvalidConfig("domain must not be empty"));
        }

        if !(self.refresh_fraction > 0.0 && self.refresh_fraction < 1.0) {
            return Err(Error::InvalidConfig(
                "refresh fraction must be between 0 and 1",
            ));
        }

        if self.account.registration_interval < MIN_REGISTRATION_INTERVAL {
            return Err(Error::InvalidConfig(
                "registration interval must be at least 60 seconds",
            ));
        }

        if self.max_calls == 0 {
            return Err(Error::InvalidConfig("max calls must not be 0"));
        }

        if self.no_answer_timeout.is_zero() {
            return Err(Error::InvalidConfig("no answer timeout must not be 0"));
        }

        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event capacity must not be 0"));
        }

        // validates the uris derived from the account
        self.account.aor()?;

        let config = ClientConfig {
            agent: UserAgentConfig {
                account: self.account.clone(),
                refresh_fraction: self.refresh_fraction,
                max_calls: self.max_calls,
                no_answer_timeout: self.no_answer_timeout,
                timers: self.timers,
                user_agent: self.user_agent.clone(),
            },
            transport: self.transport,
            bind: self.bind,
            outbound_proxy: self.outbound_proxy,
            send_timeout: self.send_timeout,
            event_capacity: self.event_capacity,
            stop_grace: self.stop_grace,
            media: self.media.clone(),
            factory: self.factory.clone(),
            #[cfg(feature = "tls-rustls")]
            tls: self.tls.clone(),
        };

        let observers = Observers::default();

        for (kind, callback) in &self.observers {
            observers.subscribe(*kind, callback.clone());
        }

        Ok(Client::from_config(config, observers))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn account() -> Account {
        Account::new("alice", "example.org")
    }

    #[test]
    fn defaults_are_valid() {
        assert!(ClientBuilder::new(account()).build().is_ok());
    }

    #[test]
    fn invalid_configuration() {
        assert!(matches!(
            ClientBuilder::new(Account::new("", "example.org")).build(),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            ClientBuilder::new(Account::new("alice", "")).build(),
            Err(Error::InvalidConfig(_))
        ));

        for fraction in [0.0, 1.0, -0.5, f64::NAN] {
            assert!(matches!(
                ClientBuilder::new(account()).refresh_fraction(fraction).build(),
                Err(Error::InvalidConfig(_))
            ));
        }

        assert!(matches!(
            ClientBuilder::new(account().with_registration_interval(Duration::from_secs(59)))
                .build(),
            Err(Error::InvalidConfig(_))
        ));

        assert!(
            ClientBuilder::new(account().with_registration_interval(Duration::from_secs(60)))
                .refresh_fraction(0.5)
                .build()
                .is_ok()
        );
    }
}
