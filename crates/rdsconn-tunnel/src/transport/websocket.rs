//! WebSocket-backed tunnel stream.
//!
//! The gateway carries tunnel bytes as WebSocket messages. Message
//! boundaries have no meaning: inbound payloads are concatenated into one
//! continuous byte sequence, and every outbound write becomes exactly one
//! binary message (never split, never coalesced).

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Once;
use std::task::{ready, Context, Poll};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use rdsconn_core::{ConnError, ConnResult, SignedTunnelUrl};

use super::MessageTransport;

/// The concrete message transport produced by [`connect`].
pub type WsTransport = WebSocketStream<MaybeTlsStream<TcpStream>>;

static CRYPTO_PROVIDER_INIT: Once = Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// Upgrade a presigned URL into a tunnel stream.
///
/// Every handshake failure (expired signature, gateway rejection, TLS or
/// network error) is reported uniformly as [`ConnError::TunnelDial`].
pub async fn connect(url: &SignedTunnelUrl) -> ConnResult<TunnelStream> {
    ensure_crypto_provider();

    let host = url.url.host_str().unwrap_or_default().to_string();
    let (ws, response) = connect_async(url.as_str()).await.map_err(|e| {
        warn!(gateway = %host, error = %e, "tunnel handshake failed");
        ConnError::TunnelDial(e.to_string())
    })?;

    debug!(gateway = %host, status = %response.status(), "tunnel upgraded");
    Ok(TunnelStream::new(ws))
}

/// Byte-stream view of a message transport.
pub struct TunnelStream<T = WsTransport> {
    inner: T,
    /// Unconsumed tail of the last inbound message.
    read_buf: Vec<u8>,
    read_offset: usize,
    read_eof: bool,
    write_closed: bool,
    /// Shared read/write deadline.
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<T> fmt::Debug for TunnelStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelStream")
            .field("buffered", &(self.read_buf.len() - self.read_offset))
            .field("read_eof", &self.read_eof)
            .field("write_closed", &self.write_closed)
            .field("deadline", &self.deadline.as_ref().map(|d| d.deadline()))
            .finish_non_exhaustive()
    }
}

impl<T: MessageTransport> TunnelStream<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            read_buf: Vec::new(),
            read_offset: 0,
            read_eof: false,
            write_closed: false,
            deadline: None,
        }
    }

    /// Apply one deadline to both directions. `None` clears it.
    ///
    /// Once the deadline passes, reads and writes fail with
    /// [`io::ErrorKind::TimedOut`] until a new deadline is set.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline.map(|at| Box::pin(tokio::time::sleep_until(at)));
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Close the underlying transport. Safe to call more than once.
    pub async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }

    fn poll_deadline(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if let Some(deadline) = self.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "tunnel deadline exceeded",
                ));
            }
        }
        Ok(())
    }

    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let available = self.read_buf.len() - self.read_offset;
        let n = available.min(buf.remaining());
        buf.put_slice(&self.read_buf[self.read_offset..self.read_offset + n]);
        self.read_offset += n;
        if self.read_offset >= self.read_buf.len() {
            self.read_buf.clear();
            self.read_offset = 0;
        }
    }
}

impl<T: MessageTransport> AsyncRead for TunnelStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.read_offset < this.read_buf.len() {
                this.drain_into(buf);
                return Poll::Ready(Ok(()));
            }
            if this.read_eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Binary(data))) => {
                    this.read_buf = data;
                    this.read_offset = 0;
                }
                Some(Ok(Message::Text(text))) => {
                    this.read_buf = text.into_bytes();
                    this.read_offset = 0;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "tunnel closed by gateway");
                    this.read_eof = true;
                }
                // Control frames are answered by the transport itself.
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    this.read_eof = true;
                }
                Some(Err(e)) => return Poll::Ready(Err(into_io(e))),
            }
        }
    }
}

impl<T: MessageTransport> AsyncWrite for TunnelStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;

        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "tunnel stream closed",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(this.inner.poll_ready_unpin(cx)).map_err(into_io)?;
        this.inner
            .start_send_unpin(Message::binary(buf.to_vec()))
            .map_err(into_io)?;

        // Push the frame out now; if the socket is busy the remainder goes
        // out on the next flush.
        if let Poll::Ready(Err(e)) = this.inner.poll_flush_unpin(cx) {
            return Poll::Ready(Err(into_io(e)));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        if this.write_closed {
            return Poll::Ready(Ok(()));
        }
        this.inner.poll_flush_unpin(cx).map_err(into_io)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.write_closed {
            return Poll::Ready(Ok(()));
        }

        let result = ready!(this.inner.poll_close_unpin(cx));
        this.write_closed = true;
        match result {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(into_io(e))),
        }
    }
}

fn into_io(err: WsError) -> io::Error {
    match err {
        WsError::Io(e) => e,
        err @ (WsError::ConnectionClosed | WsError::AlreadyClosed) => {
            io::Error::new(io::ErrorKind::NotConnected, err)
        }
        other => io::Error::other(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (TunnelStream<WebSocketStream<DuplexStream>>, WebSocketStream<DuplexStream>) {
        let (client, server) = duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (TunnelStream::new(client), server)
    }

    #[tokio::test]
    async fn debug_shows_stream_state() {
        let (mut stream, mut peer) = pair().await;
        assert_eq!(
            format!("{stream:?}"),
            "TunnelStream { buffered: 0, read_eof: false, write_closed: false, deadline: None, .. }"
        );

        peer.send(Message::binary(b"abcd".to_vec())).await.unwrap();
        let mut buf = [0u8; 1];
        stream.read_exact(&mut buf).await.unwrap();
        stream.close().await.unwrap();
        let shown = format!("{stream:?}");
        assert!(shown.contains("buffered: 3"), "{shown}");
        assert!(shown.contains("write_closed: true"), "{shown}");
    }

    #[tokio::test]
    async fn write_is_one_binary_message() {
        let (mut stream, mut peer) = pair().await;

        stream.write_all(b"hello").await.unwrap();
        stream.write_all(b"world").await.unwrap();
        stream.flush().await.unwrap();

        let first = peer.next().await.unwrap().unwrap();
        assert_eq!(first, Message::binary(b"hello".to_vec()));
        let second = peer.next().await.unwrap().unwrap();
        assert_eq!(second, Message::binary(b"world".to_vec()));
    }

    #[tokio::test]
    async fn reads_concatenate_messages() {
        let (mut stream, mut peer) = pair().await;

        peer.send(Message::binary(b"abc".to_vec())).await.unwrap();
        peer.send(Message::binary(Vec::new())).await.unwrap();
        peer.send(Message::text("def")).await.unwrap();
        peer.send(Message::binary(b"ghij".to_vec())).await.unwrap();
        peer.close(None).await.unwrap();

        let mut collected = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 2);
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"abcdefghij");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut stream, mut peer) = pair().await;

        stream.close().await.unwrap();
        stream.close().await.unwrap();
        stream.shutdown().await.unwrap();

        let msg = peer.next().await.unwrap().unwrap();
        assert!(matches!(msg, Message::Close(_)));

        let err = stream.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn deadline_applies_to_reads_and_writes() {
        let (mut stream, _peer) = pair().await;

        stream.set_deadline(Some(Instant::now() + Duration::from_millis(50)));
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err = stream.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        stream.set_deadline(None);
        stream.write_all(b"x").await.unwrap();
    }

    #[tokio::test]
    async fn peer_drop_reads_as_eof() {
        let (mut stream, mut peer) = pair().await;

        peer.send(Message::binary(b"tail".to_vec())).await.unwrap();
        drop(peer);

        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        // An abrupt drop may surface as EOF or as a reset; either way the
        // bytes sent before it must arrive first.
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"tail");
    }
}
