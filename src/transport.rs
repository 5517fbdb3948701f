//! Transport abstraction beneath the engine.
//!
//! Implement this trait to run the engine over something other than a tokio
//! byte stream. [`StreamTransport`] covers `TcpStream`, TLS streams and the
//! in-memory `tokio::io::duplex` pipes used in tests.

use crate::error::{ConnectionError, Error};
use crate::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// Async byte transport for one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receive into `buf`. `Ok(0)` means the peer closed the stream.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send all of `data`.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;

    /// Close the transport.
    async fn close(&self) -> Result<()>;

    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Transport over any tokio byte stream, split into independently locked
/// read and write halves.
pub struct StreamTransport<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    connected: AtomicBool,
    peer: Option<SocketAddr>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, peer: Option<SocketAddr>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            connected: AtomicBool::new(true),
            peer,
        }
    }

    fn disconnected(&self) -> Error {
        self.connected.store(false, Ordering::SeqCst);
        Error::Connection(ConnectionError::Disconnected)
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::Connection(ConnectionError::Disconnected));
        }
        let mut r = self.reader.lock().await;
        match r.read(buf).await {
            Ok(0) => {
                self.connected.store(false, Ordering::SeqCst);
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                tracing::debug!(error = %e, "receive failed");
                Err(self.disconnected())
            }
        }
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Connection(ConnectionError::Disconnected));
        }
        let mut w = self.writer.lock().await;
        if let Err(e) = w.write_all(data).await {
            tracing::debug!(error = %e, "send failed");
            return Err(self.disconnected());
        }
        w.flush().await.map_err(|_| self.disconnected())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            let mut w = self.writer.lock().await;
            w.shutdown().await?;
        }
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_send_and_recv() {
        let (a, b) = tokio::io::duplex(64);
        let left = StreamTransport::new(a, None);
        let right = StreamTransport::new(b, None);

        left.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = right.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn close_is_seen_as_eof() {
        let (a, b) = tokio::io::duplex(64);
        let left = StreamTransport::new(a, None);
        let right = StreamTransport::new(b, None);

        left.close().await.unwrap();
        assert!(!left.is_connected());
        assert!(left.send(b"x").await.is_err());

        let mut buf = [0u8; 4];
        assert_eq!(right.recv(&mut buf).await.unwrap(), 0);
        assert!(!right.is_connected());
    }

    #[tokio::test]
    async fn writes_reach_the_stream_unchanged() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\x81\x02hi")
            .write(b"\x8a\x00")
            .build();
        let transport = StreamTransport::new(mock, None);
        let mut buf = [0u8; 8];
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"\x81\x02hi");
        transport.send(b"\x8a\x00").await.unwrap();
    }
}
