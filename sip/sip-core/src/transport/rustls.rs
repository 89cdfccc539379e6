use super::TransportKind;
use super::streaming::Connector;
use rustls_pki_types::ServerName;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

/// TLS over TCP, the server certificate is checked against the configured name
pub struct Tls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl Tls {
    pub fn new(connector: TlsConnector, server_name: &str) -> io::Result<Self> {
        let server_name = ServerName::try_from(server_name)
            .map_err(io::Error::other)?
            .to_owned();

        Ok(Self {
            connector,
            server_name,
        })
    }
}

#[async_trait::async_trait]
impl Connector for Tls {
    type Stream = TlsStream<TcpStream>;

    const KIND: TransportKind = TransportKind::Tls;

    async fn connect(&self, remote: SocketAddr) -> io::Result<(Self::Stream, SocketAddr)> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;

        let stream = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await?;

        Ok((stream, local))
    }
}
