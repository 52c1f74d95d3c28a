//! Transport capabilities used by the relay.
//!
//! Two capabilities meet here:
//! - a duplex *message* transport ([`MessageTransport`]): discrete,
//!   tagged WebSocket messages, as spoken by the gateway;
//! - a duplex *byte* stream ([`ByteStream`]): plain `AsyncRead` +
//!   `AsyncWrite`, as spoken by local TCP clients.
//!
//! [`TunnelStream`] is the only component that bridges the two.

pub mod websocket;

pub use websocket::{connect, TunnelStream, WsTransport};

use std::future::Future;

use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use rdsconn_core::ConnResult;

/// A duplex message-oriented connection.
pub trait MessageTransport:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send
{
}

impl<T> MessageTransport for T where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send
{
}

/// A duplex byte stream that can be relayed from a spawned task.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Something that can open a tunnel to `host:port`.
///
/// Implemented by [`crate::TunnelDialer`]; the relay server only depends on
/// this seam.
pub trait Dial: Send + Sync + 'static {
    type Stream: ByteStream;

    /// Open a tunnel over `network` (`tcp` or `tcp4`) to `address`.
    fn open<'a>(
        &'a self,
        network: &'a str,
        address: &'a str,
    ) -> impl Future<Output = ConnResult<Self::Stream>> + Send + 'a;
}
