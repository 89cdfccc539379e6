use super::{Received, Transport, TransportKind};
use crate::TransportError;
use bytes::Bytes;
use std::net::SocketAddr;
use std::{fmt, io};
use tokio::net::{ToSocketAddrs, UdpSocket};

const MAX_MSG_SIZE: usize = u16::MAX as usize;

/// Connectionless UDP transport
#[derive(Debug)]
pub struct Udp {
    bound: SocketAddr,
    socket: UdpSocket,
}

impl fmt::Display for Udp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "udp:bound={}", self.bound)
    }
}

impl Udp {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let bound = socket.local_addr()?;

        log::info!("Bound UDP to {bound}");

        Ok(Self { bound, socket })
    }
}

#[async_trait::async_trait]
impl Transport for Udp {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn sent_by(&self) -> SocketAddr {
        self.bound
    }

    async fn send(&self, bytes: &[u8], target: SocketAddr) -> Result<(), TransportError> {
        self.socket.send_to(bytes, target).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Received, TransportError> {
        let mut buffer = vec![0u8; MAX_MSG_SIZE];

        loop {
            let (len, source) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                // ICMP port unreachable of an earlier send, not fatal for a datagram socket
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    log::debug!("{self}: ignoring {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let bytes = &buffer[..len];

            match bytes {
                b"\r\n\r\n" => {
                    if let Err(e) = self.socket.send_to(b"\r\n", source).await {
                        log::debug!("{self}: failed to answer keep-alive from {source}, {e}");
                    }
                }
                b"\r\n" => {
                    // keep-alive response
                }
                _ => {
                    return Ok(Received {
                        source,
                        buffer: Bytes::copy_from_slice(bytes),
                    });
                }
            }
        }
    }
}
