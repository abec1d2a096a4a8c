//! Framed TCP transport for the IRC control connection.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::error::{ProtocolError, XdccError};
use crate::irc::IrcCodec;
use crate::Message;

/// Errors that can occur when reading from a transport.
#[derive(Debug)]
#[non_exhaustive]
pub enum TransportReadError {
    /// An I/O error occurred.
    Io(std::io::Error),
    /// A protocol error occurred.
    Protocol(ProtocolError),
}

impl From<std::io::Error> for TransportReadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for TransportReadError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Io(e),
            other => Self::Protocol(other),
        }
    }
}

/// A line-framed IRC connection over TCP.
pub struct Transport {
    framed: Framed<TcpStream, IrcCodec>,
}

impl Transport {
    /// Connect to `addr`, bounded by `timeout`.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, XdccError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| XdccError::ConnectTimeout(addr))??;
        Ok(Self::tcp(stream))
    }

    /// Wrap an established stream.
    pub fn tcp(stream: TcpStream) -> Self {
        if let Err(e) = Self::enable_keepalive(&stream) {
            warn!("failed to enable TCP keepalive: {}", e);
        }

        Self {
            framed: Framed::new(stream, IrcCodec::new()),
        }
    }

    fn enable_keepalive(stream: &TcpStream) -> Result<()> {
        use socket2::{SockRef, TcpKeepalive};

        let sock = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(120))
            .with_interval(Duration::from_secs(30));

        sock.set_tcp_keepalive(&keepalive)?;
        Ok(())
    }

    /// Read the next message; `Ok(None)` means the peer closed the connection.
    pub async fn read_message(&mut self) -> Result<Option<Message>, TransportReadError> {
        match self.framed.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(TransportReadError::from(e)),
            None => Ok(None),
        }
    }

    /// Send one message.
    pub async fn write_message(&mut self, message: Message) -> Result<()> {
        self.framed.send(message).await.map_err(|e| anyhow::anyhow!(e))
    }
}
