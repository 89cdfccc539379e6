//! Connection oriented transports framed by [`StreamingDecoder`]

use super::{Received, Transport, TransportKind};
use crate::TransportError;
use decode::{Item, StreamingDecoder};
use std::net::SocketAddr;
use std::time::Duration;
use std::{fmt, io};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf, split};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

mod decode;

/// Establishes the connection of a [`Stream`] transport
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    const KIND: TransportKind;

    async fn connect(&self, remote: SocketAddr) -> io::Result<(Self::Stream, SocketAddr)>;
}

/// Plain TCP
#[derive(Debug, Clone, Copy)]
pub struct Tcp;

#[async_trait::async_trait]
impl Connector for Tcp {
    type Stream = TcpStream;

    const KIND: TransportKind = TransportKind::Tcp;

    async fn connect(&self, remote: SocketAddr) -> io::Result<(Self::Stream, SocketAddr)> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;

        Ok((stream, local))
    }
}

type Reader<S> = FramedRead<ReadHalf<S>, StreamingDecoder>;

/// Transport over a single outgoing connection.
///
/// A dropped connection is never re-established silently, [`Transport::reconnect`]
/// must be called for that.
pub struct Stream<C: Connector> {
    connector: C,
    remote: SocketAddr,
    send_timeout: Duration,

    local: parking_lot::Mutex<SocketAddr>,
    reader: Mutex<Option<Reader<C::Stream>>>,
    writer: Mutex<Option<WriteHalf<C::Stream>>>,
}

impl<C: Connector> fmt::Debug for Stream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", &C::KIND)
            .field("local", &*self.local.lock())
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> fmt::Display for Stream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:bound={}:remote={}",
            C::KIND,
            self.local.lock(),
            self.remote
        )
    }
}

impl<C: Connector> Stream<C> {
    pub async fn connect(
        connector: C,
        remote: SocketAddr,
        send_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let (stream, local) = connector.connect(remote).await?;

        log::info!("Connected {} {local} -> {remote}", C::KIND);

        let (read, write) = split(stream);

        Ok(Self {
            connector,
            remote,
            send_timeout,
            local: parking_lot::Mutex::new(local),
            reader: Mutex::new(Some(FramedRead::new(read, StreamingDecoder))),
            writer: Mutex::new(Some(write)),
        })
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;

        let Some(socket) = writer.as_mut() else {
            return Err(TransportError::ConnectionReset);
        };

        let result = match timeout(self.send_timeout, socket.write_all(bytes)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => TransportError::from(e),
            Err(_) => TransportError::SendTimeout,
        };

        // the stream may contain a partially written message, it cannot be used anymore
        log::warn!("{self}: send failed, closing connection, {result}");
        *writer = None;

        Err(result)
    }
}

#[async_trait::async_trait]
impl<C: Connector> Transport for Stream<C> {
    fn kind(&self) -> TransportKind {
        C::KIND
    }

    fn sent_by(&self) -> SocketAddr {
        *self.local.lock()
    }

    async fn send(&self, bytes: &[u8], _target: SocketAddr) -> Result<(), TransportError> {
        self.write(bytes).await
    }

    async fn recv(&self) -> Result<Received, TransportError> {
        let mut reader = self.reader.lock().await;

        loop {
            let Some(framed) = reader.as_mut() else {
                return Err(TransportError::ConnectionReset);
            };

            let error = match framed.next().await {
                Some(Ok(Item::Message(buffer))) => {
                    return Ok(Received {
                        source: self.remote,
                        buffer,
                    });
                }
                Some(Ok(Item::KeepAliveRequest)) => {
                    if let Err(e) = self.write(b"\r\n").await {
                        log::debug!("{self}: failed to answer keep-alive, {e}");
                    }
                    continue;
                }
                Some(Ok(Item::KeepAliveResponse)) => continue,
                Some(Err(e)) => {
                    log::warn!("{self}: dropping connection, {e}");
                    TransportError::ConnectionReset
                }
                None => {
                    log::info!("{self}: connection closed by peer");
                    TransportError::ConnectionReset
                }
            };

            *reader = None;
            *self.writer.lock().await = None;

            return Err(error);
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let (stream, local) = self.connector.connect(self.remote).await?;

        log::info!("Reconnected {} {local} -> {}", C::KIND, self.remote);

        let (read, write) = split(stream);

        *self.reader.lock().await = Some(FramedRead::new(read, StreamingDecoder));
        *self.writer.lock().await = Some(write);
        *self.local.lock() = local;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const MSG: &[u8] = b"OPTIONS sip:bob@example.com SIP/2.0\r\nContent-Length: 0\r\n\r\n";

    #[tokio::test]
    async fn frames_messages_and_detects_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr().unwrap();

        let transport = Stream::connect(Tcp, remote, Duration::from_secs(1))
            .await
            .unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();

        transport.send(MSG, remote).await.unwrap();
        let mut buf = vec![0u8; MSG.len()];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, MSG);

        peer.write_all(b"\r\n").await.unwrap();
        peer.write_all(MSG).await.unwrap();
        peer.write_all(MSG).await.unwrap();

        assert_eq!(transport.recv().await.unwrap().buffer, MSG);
        assert_eq!(transport.recv().await.unwrap().buffer, MSG);

        drop(peer);

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionReset)
        ));
        assert!(matches!(
            transport.send(MSG, remote).await,
            Err(TransportError::ConnectionReset)
        ));

        transport.reconnect().await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();
        transport.send(MSG, remote).await.unwrap();
    }
}
