//! Daemon-side endpoints of the protocol.
//!
//! The daemon binds one reply socket for commands and one publish socket
//! for notifications. What a command *does* is up to an [`EffectExecutor`]
//! supplied by the daemon; this module only owns the exchange discipline:
//! one request in, exactly one reply out.

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::codec::{self, EffectValue};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::transport::{self, Transport};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Performs a decoded effect. Implemented by the remapping engine.
pub trait EffectExecutor: Send {
    fn perform(&mut self, effect: &EffectValue) -> std::result::Result<(), String>;
}

/// The daemon's reply convention: `OK`, or the error text verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcReply {
    Ok,
    Error(String),
}

impl IpcReply {
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Ok => Bytes::from_static(codec::REPLY_OK),
            Self::Error(err) => Bytes::from(err.clone()),
        }
    }
}

/// Turns raw requests into replies by decoding them and handing the effect
/// to an executor.
pub struct EffectRequestHandler<E> {
    executor: E,
}

impl<E: EffectExecutor> EffectRequestHandler<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn handle(&mut self, request: Bytes) -> Bytes {
        let reply = match codec::decode_command(&request) {
            Some(fx_val) => {
                debug!(effect = %fx_val.effect, value = %fx_val.value, "performing effect");
                match self.executor.perform(&fx_val) {
                    Ok(()) => IpcReply::Ok,
                    Err(err) => IpcReply::Error(err),
                }
            }
            None => IpcReply::Error(format!(
                "unrecognized request: {}",
                String::from_utf8_lossy(&request)
            )),
        };
        if let IpcReply::Error(err) = &reply {
            warn!(error = %err, "IPC request failed");
        }
        reply.encode()
    }

    pub fn into_executor(self) -> E {
        self.executor
    }
}

/// The daemon's command socket.
pub struct CommandServer {
    socket: Box<dyn Transport>,
    endpoint: Endpoint,
}

impl CommandServer {
    /// Bind the reply socket. Port `0` picks an ephemeral port; see
    /// [`CommandServer::local_endpoint`].
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let (socket, endpoint) = transport::bind_reply_socket(endpoint).await?;
        info!(%endpoint, "listening for IPC requests");
        Ok(Self { socket, endpoint })
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serve a single request/reply exchange.
    pub async fn serve_one<F>(&mut self, handler: &mut F) -> Result<()>
    where
        F: FnMut(Bytes) -> Bytes + Send,
    {
        let request = self.socket.recv().await?;
        debug!(bytes = request.len(), "received IPC request");
        let reply = handler(request);
        self.socket.send(reply).await
    }

    /// Serve exchanges until `shutdown` fires.
    ///
    /// A failed exchange is logged and skipped. The usual cause is a client
    /// that timed out and went away before its reply was ready.
    pub async fn serve<F>(
        mut self,
        mut handler: F,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) -> Result<()>
    where
        F: FnMut(Bytes) -> Bytes + Send,
    {
        let endpoint = self.endpoint.clone();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(%endpoint, "IPC server shutting down");
                    return Ok(());
                }
                served = self.serve_one(&mut handler) => {
                    if let Err(e) = served {
                        warn!(%endpoint, error = %e, "IPC exchange failed, continuing");
                    }
                }
            }
        }
    }
}

/// The daemon's notification socket.
pub struct NotificationPublisher {
    socket: Box<dyn Transport>,
    endpoint: Endpoint,
}

impl NotificationPublisher {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let (socket, endpoint) = transport::bind_publish_socket(endpoint).await?;
        info!(%endpoint, "publishing notifications");
        Ok(Self { socket, endpoint })
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Publish `topic:payload`. Subscribers not connected yet miss it.
    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.publish_raw(codec::encode_notification(topic, payload))
            .await
    }

    pub async fn publish_raw(&mut self, message: Bytes) -> Result<()> {
        debug!(bytes = message.len(), "publishing notification");
        self.socket.send(message).await
    }
}
