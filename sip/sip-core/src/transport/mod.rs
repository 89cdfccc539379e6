use crate::TransportError;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tls-rustls")]
pub mod rustls;
pub mod streaming;
pub mod udp;

/// Kind of transport a client speaks over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    #[cfg(feature = "tls-rustls")]
    Tls,
}

impl TransportKind {
    /// Name used in the `Via` header and the `transport` uri parameter
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            #[cfg(feature = "tls-rustls")]
            TransportKind::Tls => "TLS",
        }
    }

    /// Reliable transports do not need retransmissions
    pub fn reliable(self) -> bool {
        !matches!(self, TransportKind::Udp)
    }

    pub fn secure(self) -> bool {
        !matches!(self, TransportKind::Udp | TransportKind::Tcp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw message received by a transport
#[derive(Debug, Clone)]
pub struct Received {
    pub source: SocketAddr,
    pub buffer: Bytes,
}

/// Abstraction over a transport
///
/// A transport owns exactly one socket (or connection). All sends are serialized through it.
#[async_trait::async_trait]
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Is the transport reliable, changes how retransmissions in transactions are handled.
    fn reliable(&self) -> bool {
        self.kind().reliable()
    }

    /// The address peers can reach this transport at, used in `Via` and `Contact`
    fn sent_by(&self) -> SocketAddr;

    /// Use the given transport to send `message` to `target`.
    ///
    /// Connection oriented transports discard the `target` parameter.
    async fn send(&self, message: &[u8], target: SocketAddr) -> Result<(), TransportError>;

    /// Receive the next message. Must be cancel-safe, it is polled inside `select!`.
    ///
    /// Connection oriented transports return [`TransportError::ConnectionReset`] once the
    /// connection is gone and keep doing so until [`Transport::reconnect`] succeeds.
    async fn recv(&self) -> Result<Received, TransportError>;

    /// Re-establish a dropped connection. No-op for connectionless transports.
    async fn reconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Parameters to open a transport with
#[derive(Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// Local address to bind to, port 0 picks any
    pub bind: SocketAddr,

    /// Registrar or outbound proxy, the peer of connection oriented transports
    pub remote: SocketAddr,

    /// Name of the remote, checked against its certificate when using TLS
    pub server_name: String,

    /// Upper bound for a single send on connection oriented transports
    pub send_timeout: Duration,

    #[cfg(feature = "tls-rustls")]
    pub tls: Option<tokio_rustls::TlsConnector>,
}

/// Default upper bound of a single send on connection oriented transports
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

impl TransportConfig {
    pub fn new(kind: TransportKind, bind: SocketAddr, remote: SocketAddr, server_name: String) -> Self {
        Self {
            kind,
            bind,
            remote,
            server_name,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            #[cfg(feature = "tls-rustls")]
            tls: None,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("kind", &self.kind)
            .field("bind", &self.bind)
            .field("remote", &self.remote)
            .field("server_name", &self.server_name)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

/// Opens transports, allows replacing the network with something else in tests
#[async_trait::async_trait]
pub trait Factory: Send + Sync + 'static {
    async fn open(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Factory creating real sockets
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFactory;

#[async_trait::async_trait]
impl Factory for DefaultFactory {
    async fn open(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        open(config).await
    }
}

/// Open a transport described by `config`
pub async fn open(config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
    match config.kind {
        TransportKind::Udp => Ok(Arc::new(udp::Udp::bind(config.bind).await?)),
        TransportKind::Tcp => Ok(Arc::new(
            streaming::Stream::connect(
                streaming::Tcp,
                config.remote,
                config.send_timeout,
            )
            .await?,
        )),
        #[cfg(feature = "tls-rustls")]
        TransportKind::Tls => {
            let connector = rustls::Tls::new(
                config
                    .tls
                    .clone()
                    .ok_or_else(|| std::io::Error::other("missing tls connector"))?,
                &config.server_name,
            )?;

            Ok(Arc::new(
                streaming::Stream::connect(connector, config.remote, config.send_timeout).await?,
            ))
        }
    }
}
