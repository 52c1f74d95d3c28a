//! Relay session manager.
//!
//! One accept loop; every accepted local connection becomes an independent
//! session task that dials its own tunnel and then splices bytes in both
//! directions. A session's failure is logged and never reaches the accept
//! loop. Only a listener error ends [`RelayServer::run`].

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::io::{self, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use rdsconn_core::{ConnError, ConnResult, Direction};

use crate::transport::{ByteStream, Dial};

/// Bytes moved by a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub remote_to_local: u64,
    pub local_to_remote: u64,
}

/// Splice `local` and `remote` until both directions finish.
///
/// A direction finishes on EOF or on error. On EOF its write side is shut
/// down. For a tunnel that shutdown is a WebSocket close, which ends the
/// whole tunnel rather than half of it, so local EOF closes the tunnel and
/// the other direction then drains to EOF. The first error returns
/// immediately and drops both connections; the other direction's outcome
/// is logged if it has already settled, or logged as abandoned otherwise.
pub async fn relay<L, R>(local: L, remote: R) -> ConnResult<RelayStats>
where
    L: ByteStream,
    R: ByteStream,
{
    let (mut local_rd, mut local_wr) = io::split(local);
    let (mut remote_rd, mut remote_wr) = io::split(remote);

    let remote_to_local = async move {
        let copied = io::copy(&mut remote_rd, &mut local_wr).await;
        let _ = local_wr.shutdown().await;
        copied.map_err(|source| ConnError::RelayIo {
            direction: Direction::RemoteToLocal,
            source,
        })
    };

    let local_to_remote = async move {
        let copied = io::copy(&mut local_rd, &mut remote_wr).await;
        let _ = remote_wr.shutdown().await;
        copied.map_err(|source| ConnError::RelayIo {
            direction: Direction::LocalToRemote,
            source,
        })
    };

    tokio::pin!(remote_to_local);
    tokio::pin!(local_to_remote);

    let (finished, result) = tokio::select! {
        copied = &mut remote_to_local => (Direction::RemoteToLocal, copied),
        copied = &mut local_to_remote => (Direction::LocalToRemote, copied),
    };
    let first = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            let (other, outcome) = match finished {
                Direction::RemoteToLocal => (
                    Direction::LocalToRemote,
                    local_to_remote.as_mut().now_or_never(),
                ),
                Direction::LocalToRemote => (
                    Direction::RemoteToLocal,
                    remote_to_local.as_mut().now_or_never(),
                ),
            };
            match outcome {
                Some(Ok(bytes)) => debug!(direction = %other, bytes, "relay direction finished"),
                Some(Err(other_err)) => {
                    debug!(direction = %other, error = %other_err, "relay direction also failed")
                }
                None => debug!(direction = %other, "relay direction abandoned after error"),
            }
            return Err(e);
        }
    };
    debug!(direction = %finished, bytes = first, "relay direction finished");

    let stats = match finished {
        Direction::RemoteToLocal => RelayStats {
            remote_to_local: first,
            local_to_remote: local_to_remote.await?,
        },
        Direction::LocalToRemote => RelayStats {
            remote_to_local: remote_to_local.await?,
            local_to_remote: first,
        },
    };

    Ok(stats)
}

/// Accept loop that relays every local connection through its own tunnel.
pub struct RelayServer<D> {
    listener: TcpListener,
    dialer: Arc<D>,
    target: String,
}

impl<D: Dial> RelayServer<D> {
    /// `target` is the `host:port` every tunnel is opened to.
    pub fn new(listener: TcpListener, dialer: Arc<D>, target: impl Into<String>) -> Self {
        Self {
            listener,
            dialer,
            target: target.into(),
        }
    }

    pub fn local_addr(&self) -> ConnResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve forever. Returns only when accepting fails.
    pub async fn run(self) -> ConnResult<()> {
        let mut next_session: u64 = 1;

        loop {
            let (local, peer) = self.listener.accept().await?;
            let session = next_session;
            next_session += 1;

            info!(session, peer = %peer, "accepted local connection");

            let dialer = self.dialer.clone();
            let target = self.target.clone();
            tokio::spawn(async move {
                run_session(session, local, peer, dialer, target).await;
            });
        }
    }
}

async fn run_session<D: Dial>(
    session: u64,
    local: TcpStream,
    peer: SocketAddr,
    dialer: Arc<D>,
    target: String,
) {
    let tunnel = match dialer.open("tcp", &target).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            // Dropping `local` closes the client connection.
            warn!(session, peer = %peer, target = %target, error = %e, "tunnel dial failed");
            return;
        }
    };
    debug!(session, target = %target, "tunnel open, relaying");

    match relay(local, tunnel).await {
        Ok(stats) => info!(
            session,
            sent = stats.local_to_remote,
            received = stats.remote_to_local,
            "session closed"
        ),
        Err(e) => warn!(session, peer = %peer, error = %e, "session ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use crate::transport::TunnelStream;

    #[tokio::test]
    async fn relays_both_directions_until_both_close() {
        let (local, mut client) = duplex(1024);
        let (remote, mut server) = duplex(1024);

        let session = tokio::spawn(relay(local, remote));

        client.write_all(b"SELECT 1;").await.unwrap();
        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SELECT 1;");

        server.write_all(b"1 row").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"1 row");

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();

        let stats = session.await.unwrap().unwrap();
        assert_eq!(stats.local_to_remote, 9);
        assert_eq!(stats.remote_to_local, 5);
    }

    #[tokio::test]
    async fn remote_close_delivers_all_bytes_then_waits_for_local() {
        let (local, mut client) = duplex(64);
        let (remote, mut server) = duplex(64);

        let session = tokio::spawn(relay(local, remote));

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let sent = payload.clone();
        tokio::spawn(async move {
            server.write_all(&sent).await.unwrap();
            server.shutdown().await.unwrap();
            // Keep the read side open until the relay lets go.
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, payload);

        // Still open: the local side has not closed yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!session.is_finished());

        client.shutdown().await.unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.remote_to_local, 4096);
    }

    #[tokio::test]
    async fn error_is_tagged_and_tears_down_other_side() {
        let (local, mut client) = duplex(64);
        let (remote, server) = duplex(64);

        let session = tokio::spawn(relay(local, remote));

        // The tunnel peer vanishes; writing into it fails.
        drop(server);
        client.write_all(b"ping").await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(
            matches!(err, ConnError::RelayIo { direction: Direction::LocalToRemote, .. }),
            "got {err:?}"
        );

        // The local connection was released with the session.
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn local_eof_closes_the_tunnel() {
        let (client_io, gateway_io) = duplex(4096);
        let tunnel = TunnelStream::new(
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await,
        );
        let mut gateway = WebSocketStream::from_raw_socket(gateway_io, Role::Server, None).await;
        let (local, mut client) = duplex(1024);

        let session = tokio::spawn(relay(local, tunnel));

        client.write_all(b"req").await.unwrap();
        client.shutdown().await.unwrap();

        let first = gateway.next().await.unwrap().unwrap();
        assert_eq!(first, Message::binary(b"req".to_vec()));
        let second = gateway.next().await.unwrap().unwrap();
        assert!(matches!(second, Message::Close(_)), "got {second:?}");

        // Nothing can travel back once the tunnel is closed.
        let reply = gateway.send(Message::binary(b"late".to_vec())).await;
        assert!(reply.is_err());
        while let Some(Ok(_)) = gateway.next().await {}
        drop(gateway);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_empty());

        let stats = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.local_to_remote, 3);
        assert_eq!(stats.remote_to_local, 0);
    }

    /// A tunnel that never yields data and refuses every write.
    struct BrokenTunnel;

    impl AsyncRead for BrokenTunnel {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenTunnel {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn error_logs_the_abandoned_direction() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (local, mut client) = duplex(64);
        client.write_all(b"ping").await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), relay(local, BrokenTunnel))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            ConnError::RelayIo { direction: Direction::LocalToRemote, .. }
        ));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("relay direction abandoned after error"), "{output}");
        assert!(output.contains("remote->local"), "{output}");
    }

    /// Dials an in-process echo peer, or fails when `fail` is set.
    struct EchoDialer {
        fail: bool,
        dials: AtomicUsize,
    }

    impl Dial for EchoDialer {
        type Stream = DuplexStream;

        fn open<'a>(
            &'a self,
            network: &'a str,
            address: &'a str,
        ) -> impl std::future::Future<Output = ConnResult<DuplexStream>> + Send + 'a {
            async move {
                assert_eq!(network, "tcp");
                assert_eq!(address, "10.0.1.23:5432");
                self.dials.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(ConnError::TunnelDial("gateway rejected".into()));
                }
                let (tunnel, peer) = duplex(1024);
                tokio::spawn(async move {
                    let (mut rd, mut wr) = io::split(peer);
                    let _ = io::copy(&mut rd, &mut wr).await;
                });
                Ok(tunnel)
            }
        }
    }

    async fn start(fail: bool) -> (SocketAddr, Arc<EchoDialer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dialer = Arc::new(EchoDialer {
            fail,
            dials: AtomicUsize::new(0),
        });
        let server = RelayServer::new(listener, dialer.clone(), "10.0.1.23:5432");
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (addr, dialer)
    }

    #[tokio::test]
    async fn server_relays_each_connection_through_its_own_tunnel() {
        let (addr, dialer) = start(false).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        a.write_all(b"from a").await.unwrap();
        b.write_all(b"from b").await.unwrap();

        let mut buf = [0u8; 6];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from a");
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from b");

        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dial_failure_closes_only_that_connection() {
        let (addr, dialer) = start(true).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), first.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        // The accept loop is still alive.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let n = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }
}
