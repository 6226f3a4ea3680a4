//! Transport adapter, the only module that knows about ZeroMQ.
//!
//! The clients above talk to [`Connector`] and [`Transport`] trait objects.
//! One `send` is one whole message on the wire and one `recv` yields one
//! whole message; framing lives entirely below this boundary.
//!
//! ```text
//! CommandClient ──open_request_socket──▶ REQ ──tcp──▶ REP  (daemon)
//! NotificationClient ─open_subscribe_socket─▶ SUB ◀──tcp── PUB (daemon)
//! ```

use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};
use zeromq::{PubSocket, RepSocket, ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::BoxFuture;
use crate::endpoint::Endpoint;
use crate::error::{IpcError, Result};

/// Default bound on establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected, message-oriented socket.
pub trait Transport: Send {
    /// Send one whole message.
    fn send(&mut self, message: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Receive the next whole message.
    fn recv(&mut self) -> BoxFuture<'_, Result<Bytes>>;
}

/// Opens client-side sockets.
pub trait Connector: Send + Sync {
    /// Open a request socket for lock-step request/reply.
    fn open_request_socket<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>>>;

    /// Open a subscribe socket with `filter` applied before the first
    /// receive. The empty filter subscribes to everything.
    fn open_subscribe_socket<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        filter: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>>>;
}

/// [`Connector`] backed by the `zeromq` crate.
#[derive(Debug, Clone)]
pub struct ZmqConnector {
    connect_timeout: Duration,
}

impl ZmqConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn bounded<T>(
        &self,
        endpoint: &Endpoint,
        fut: impl Future<Output = zeromq::ZmqResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.connect_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(IpcError::connection(endpoint, e)),
            Err(_) => Err(IpcError::connection(
                endpoint,
                format!("connect timed out after {:?}", self.connect_timeout),
            )),
        }
    }
}

impl Default for ZmqConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for ZmqConnector {
    fn open_request_socket<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            endpoint
                .validate()
                .map_err(|e| IpcError::connection(endpoint, e))?;

            let mut socket = ReqSocket::new();
            let addr = endpoint.to_string();
            self.bounded(endpoint, socket.connect(&addr)).await?;
            info!(%endpoint, "request socket connected");

            Ok(Box::new(ZmqTransport::new(endpoint, ZmqSocket::Req(socket))) as Box<dyn Transport>)
        })
    }

    fn open_subscribe_socket<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        filter: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            endpoint
                .validate()
                .map_err(|e| IpcError::connection(endpoint, e))?;

            let mut socket = SubSocket::new();
            let addr = endpoint.to_string();
            self.bounded(endpoint, socket.connect(&addr)).await?;
            self.bounded(endpoint, socket.subscribe(filter)).await?;
            info!(%endpoint, filter, "subscribe socket connected");

            Ok(Box::new(ZmqTransport::new(endpoint, ZmqSocket::Sub(socket))) as Box<dyn Transport>)
        })
    }
}

/// Bind the daemon's reply socket. Returns the socket and the endpoint it
/// actually bound (port `0` resolves to an ephemeral port).
pub async fn bind_reply_socket(endpoint: &Endpoint) -> Result<(Box<dyn Transport>, Endpoint)> {
    let mut socket = RepSocket::new();
    let bound = bind(&mut socket, endpoint).await?;
    info!(endpoint = %bound, "reply socket bound");
    Ok((Box::new(ZmqTransport::new(&bound, ZmqSocket::Rep(socket))), bound))
}

/// Bind the daemon's publish socket.
pub async fn bind_publish_socket(endpoint: &Endpoint) -> Result<(Box<dyn Transport>, Endpoint)> {
    let mut socket = PubSocket::new();
    let bound = bind(&mut socket, endpoint).await?;
    info!(endpoint = %bound, "publish socket bound");
    Ok((Box::new(ZmqTransport::new(&bound, ZmqSocket::Pub(socket))), bound))
}

async fn bind<S: Socket>(socket: &mut S, endpoint: &Endpoint) -> Result<Endpoint> {
    endpoint
        .validate()
        .map_err(|e| IpcError::connection(endpoint, e))?;
    let resolved = socket
        .bind(&endpoint.to_string())
        .await
        .map_err(|e| IpcError::connection(endpoint, e))?;

    let port = match resolved {
        zeromq::Endpoint::Tcp(_, port) => port,
        #[allow(unreachable_patterns)]
        _ => endpoint.port,
    };
    Ok(endpoint.clone().with_port(port))
}

enum ZmqSocket {
    Req(ReqSocket),
    Rep(RepSocket),
    Sub(SubSocket),
    Pub(PubSocket),
}

struct ZmqTransport {
    endpoint: Endpoint,
    socket: ZmqSocket,
}

impl ZmqTransport {
    fn new(endpoint: &Endpoint, socket: ZmqSocket) -> Self {
        Self {
            endpoint: endpoint.clone(),
            socket,
        }
    }

    fn io_error(&self, e: zeromq::ZmqError) -> IpcError {
        IpcError::connection(&self.endpoint, e)
    }
}

impl Transport for ZmqTransport {
    fn send(&mut self, message: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let len = message.len();
            let msg = ZmqMessage::from(message);
            let sent = match &mut self.socket {
                ZmqSocket::Req(s) => s.send(msg).await,
                ZmqSocket::Rep(s) => s.send(msg).await,
                ZmqSocket::Pub(s) => s.send(msg).await,
                ZmqSocket::Sub(_) => {
                    return Err(IpcError::violation("subscribe sockets cannot send"));
                }
            };
            sent.map_err(|e| self.io_error(e))?;
            debug!(endpoint = %self.endpoint, bytes = len, "message sent");
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let received = match &mut self.socket {
                ZmqSocket::Req(s) => s.recv().await,
                ZmqSocket::Rep(s) => s.recv().await,
                ZmqSocket::Sub(s) => s.recv().await,
                ZmqSocket::Pub(_) => {
                    return Err(IpcError::violation("publish sockets cannot receive"));
                }
            };
            let message = flatten(received.map_err(|e| self.io_error(e))?);
            debug!(endpoint = %self.endpoint, bytes = message.len(), "message received");
            Ok(message)
        })
    }
}

/// Join a (possibly multi-frame) message into one payload, frames in order.
fn flatten(message: ZmqMessage) -> Bytes {
    let mut frames = message.into_vec();
    if frames.len() == 1 {
        return frames.remove(0);
    }
    let mut buf = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
    for frame in frames {
        buf.extend_from_slice(&frame);
    }
    buf.freeze()
}
