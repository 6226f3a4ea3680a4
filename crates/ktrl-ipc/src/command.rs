//! Command client: lock-step request/reply against the daemon.
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──send──▶ AwaitingReply ──reply──▶ Connected
//!                               ▲                     │
//!                               └──connect── Stale ◀──┘ timeout
//! any state ──close──▶ Closed
//! ```
//!
//! `send_command` takes `&mut self`, so two overlapping sends on one client
//! cannot be written. If a send is abandoned mid-flight (its future
//! dropped), the client stays in `AwaitingReply` and the next send fails
//! with [`IpcError::ProtocolViolation`] rather than reading a stale reply.
//! To give up on a pending exchange without leaving the client wedged, close
//! it through a [`CloseHandle`]; the pending send fails with
//! [`IpcError::Closed`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::close::{self, CloseHandle};
use crate::codec::{self, Command, CommandReply};
use crate::endpoint::Endpoint;
use crate::error::{IpcError, Result};
use crate::transport::{Connector, DEFAULT_CONNECT_TIMEOUT, Transport, ZmqConnector};

/// Default window for the daemon to reply to a command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state of a [`CommandClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Disconnected,
    Connected,
    AwaitingReply,
    /// A reply timed out; the connection must be re-established.
    Stale,
    Closed,
}

/// Tunables for a [`CommandClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOptions {
    /// How long to wait for a reply. `None` waits forever.
    pub reply_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            reply_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Owns one request/reply connection to the daemon.
pub struct CommandClient {
    connector: Arc<dyn Connector>,
    options: CommandOptions,
    endpoint: Option<Endpoint>,
    transport: Option<Box<dyn Transport>>,
    state: CommandState,
    closer: CloseHandle,
    closed_rx: watch::Receiver<bool>,
}

impl CommandClient {
    /// A disconnected client using the ZeroMQ transport.
    pub fn new(options: CommandOptions) -> Self {
        let connector = Arc::new(ZmqConnector::new(options.connect_timeout));
        Self::with_connector(connector, options)
    }

    /// A disconnected client using a custom transport.
    pub fn with_connector(connector: Arc<dyn Connector>, options: CommandOptions) -> Self {
        let closer = CloseHandle::new();
        let closed_rx = closer.subscribe();
        Self {
            connector,
            options,
            endpoint: None,
            transport: None,
            state: CommandState::Disconnected,
            closer,
            closed_rx,
        }
    }

    /// Create a client and connect it in one step.
    pub async fn connect_to(endpoint: &Endpoint, options: CommandOptions) -> Result<Self> {
        let mut client = Self::new(options);
        client.connect(endpoint).await?;
        Ok(client)
    }

    pub fn state(&self) -> CommandState {
        if self.closer.is_closed() {
            CommandState::Closed
        } else {
            self.state
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    /// Establish the connection.
    ///
    /// A no-op when already connected to `endpoint`. Reconnects when the
    /// previous connection went stale or pointed elsewhere.
    pub async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        match self.state() {
            CommandState::Closed => return Err(IpcError::Closed),
            CommandState::AwaitingReply => {
                return Err(IpcError::violation(
                    "connect called while a reply is outstanding",
                ));
            }
            CommandState::Connected if self.endpoint.as_ref() == Some(endpoint) => return Ok(()),
            CommandState::Connected | CommandState::Stale | CommandState::Disconnected => {}
        }

        self.transport = None;
        self.state = CommandState::Disconnected;

        let transport = self.connector.open_request_socket(endpoint).await?;
        self.transport = Some(transport);
        self.endpoint = Some(endpoint.clone());
        self.state = CommandState::Connected;
        info!(%endpoint, "command channel connected");
        Ok(())
    }

    /// Send one command and wait for its reply.
    ///
    /// Exactly one reply is consumed per call. On timeout the client moves
    /// to [`CommandState::Stale`]; the daemon may still execute the command,
    /// so retrying is left to the caller and needs a fresh `connect`.
    pub async fn send_command(&mut self, cmd: Command) -> Result<CommandReply> {
        match self.state() {
            CommandState::Connected => {}
            CommandState::Closed => return Err(IpcError::Closed),
            CommandState::Disconnected => {
                return Err(IpcError::violation("send_command called before connect"));
            }
            CommandState::AwaitingReply => {
                return Err(IpcError::violation(
                    "send_command called before the previous reply was received",
                ));
            }
            CommandState::Stale => {
                return Err(IpcError::violation(
                    "connection is stale after a timeout; reconnect first",
                ));
            }
        }

        let endpoint = self.endpoint.clone().ok_or(IpcError::Closed)?;
        let transport = self.transport.as_mut().ok_or(IpcError::Closed)?;

        debug!(%endpoint, bytes = cmd.len(), "sending command");
        trace!(payload = %String::from_utf8_lossy(cmd.as_bytes()), "command payload");

        self.state = CommandState::AwaitingReply;
        let exchange = exchange_within(transport, cmd.into_bytes(), self.options.reply_timeout);
        let received = tokio::select! {
            biased;
            _ = close::closed(&mut self.closed_rx) => None,
            received = exchange => Some(received),
        };

        match received {
            None => {
                self.close();
                Err(IpcError::Closed)
            }
            Some(Ok(bytes)) => {
                self.state = CommandState::Connected;
                let reply = codec::decode_reply(bytes);
                debug!(%endpoint, bytes = reply.as_bytes().len(), "reply received");
                Ok(reply)
            }
            Some(Err(ExchangeError::TimedOut(window))) => {
                warn!(%endpoint, ?window, "command reply timed out");
                self.state = CommandState::Stale;
                Err(IpcError::Timeout {
                    endpoint,
                    after: window,
                })
            }
            Some(Err(ExchangeError::Transport(e))) => {
                self.state = CommandState::Stale;
                Err(e)
            }
        }
    }

    /// Release the connection. Safe from any state; idempotent.
    pub fn close(&mut self) {
        if self.state != CommandState::Closed {
            if let Some(endpoint) = &self.endpoint {
                info!(%endpoint, "command channel closed");
            }
        }
        self.closer.close();
        self.transport = None;
        self.state = CommandState::Closed;
    }
}

enum ExchangeError {
    TimedOut(Duration),
    Transport(IpcError),
}

/// One request out, one reply in, both inside the reply window.
async fn exchange_within(
    transport: &mut Box<dyn Transport>,
    request: Bytes,
    window: Option<Duration>,
) -> std::result::Result<Bytes, ExchangeError> {
    let exchange = async {
        transport.send(request).await?;
        transport.recv().await
    };
    let received = match window {
        Some(window) => tokio::time::timeout(window, exchange)
            .await
            .map_err(|_| ExchangeError::TimedOut(window))?,
        None => exchange.await,
    };
    received.map_err(ExchangeError::Transport)
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ChannelConnector;
    use bytes::Bytes;

    fn client(connector: &Arc<ChannelConnector>, timeout: Option<Duration>) -> CommandClient {
        CommandClient::with_connector(
            connector.clone(),
            CommandOptions {
                reply_timeout: timeout,
                ..CommandOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_send_and_receive_reply() {
        let connector = Arc::new(ChannelConnector::default());
        let mut peer = connector.expect_connection();
        let mut client = client(&connector, Some(Duration::from_secs(1)));

        client.connect(&Endpoint::command_default()).await.unwrap();
        assert_eq!(client.state(), CommandState::Connected);

        peer.inbox.send(Bytes::from_static(b"OK")).unwrap();
        let reply = client
            .send_command(Command::do_effect("NoOp", "Press"))
            .await
            .unwrap();
        assert!(reply.is_ok());
        assert_eq!(
            peer.sent.recv().await.unwrap(),
            Bytes::from_static(b"IpcDoEffect((fx: NoOp, val: Press))")
        );
        assert_eq!(client.state(), CommandState::Connected);
    }

    #[tokio::test]
    async fn test_replies_follow_send_order() {
        let connector = Arc::new(ChannelConnector::default());
        let mut peer = connector.expect_connection();
        let mut client = client(&connector, Some(Duration::from_secs(1)));
        client.connect(&Endpoint::command_default()).await.unwrap();

        for (req, rep) in [("C1", "R1"), ("C2", "R2"), ("C3", "R3")] {
            peer.inbox.send(Bytes::from(rep)).unwrap();
            let reply = client.send_command(Command::raw(req)).await.unwrap();
            assert_eq!(reply.as_str(), Some(rep));
            assert_eq!(peer.sent.recv().await.unwrap(), Bytes::from(req));
        }
    }

    #[tokio::test]
    async fn test_send_before_connect_is_violation() {
        let connector = Arc::new(ChannelConnector::default());
        let mut client = client(&connector, None);
        let err = client.send_command(Command::raw("x")).await.unwrap_err();
        assert!(matches!(err, IpcError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_abandoned_send_blocks_next_send() {
        let connector = Arc::new(ChannelConnector::default());
        let _peer = connector.expect_connection();
        let mut client = client(&connector, None);
        client.connect(&Endpoint::command_default()).await.unwrap();

        // Drop the first send while it waits for a reply.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            client.send_command(Command::raw("first")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.state(), CommandState::AwaitingReply);

        let err = client.send_command(Command::raw("second")).await.unwrap_err();
        assert!(matches!(err, IpcError::ProtocolViolation(_)));

        let err = client.connect(&Endpoint::command_default()).await.unwrap_err();
        assert!(matches!(err, IpcError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_timeout_marks_stale_until_reconnect() {
        let connector = Arc::new(ChannelConnector::default());
        let _silent = connector.expect_connection();
        let mut client = client(&connector, Some(Duration::from_millis(50)));
        let endpoint = Endpoint::command_default();
        client.connect(&endpoint).await.unwrap();

        let err = client.send_command(Command::raw("x")).await.unwrap_err();
        assert!(matches!(err, IpcError::Timeout { .. }));
        assert_eq!(client.state(), CommandState::Stale);

        let err = client.send_command(Command::raw("y")).await.unwrap_err();
        assert!(matches!(err, IpcError::ProtocolViolation(_)));

        let mut fresh = connector.expect_connection();
        client.connect(&endpoint).await.unwrap();
        fresh.inbox.send(Bytes::from_static(b"ack")).unwrap();
        let reply = client.send_command(Command::raw("z")).await.unwrap();
        assert_eq!(reply.as_bytes(), b"ack");
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_for_same_endpoint() {
        let connector = Arc::new(ChannelConnector::default());
        let _peer = connector.expect_connection();
        let mut client = client(&connector, None);
        let endpoint = Endpoint::command_default();

        client.connect(&endpoint).await.unwrap();
        // No second connection registered: a reconnect would be refused.
        client.connect(&endpoint).await.unwrap();
        assert_eq!(client.state(), CommandState::Connected);
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let connector = Arc::new(ChannelConnector::default());
        let mut client = client(&connector, None);
        let err = client
            .connect(&Endpoint::command_default())
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Connection { .. }));
        assert_eq!(client.state(), CommandState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let connector = Arc::new(ChannelConnector::default());
        let _peer = connector.expect_connection();
        let mut client = client(&connector, None);
        client.connect(&Endpoint::command_default()).await.unwrap();

        client.close();
        client.close();
        assert_eq!(client.state(), CommandState::Closed);

        let err = client.send_command(Command::raw("x")).await.unwrap_err();
        assert!(matches!(err, IpcError::Closed));
        let err = client
            .connect(&Endpoint::command_default())
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Closed));
    }

    #[tokio::test]
    async fn test_close_handle_interrupts_pending_send() {
        let connector = Arc::new(ChannelConnector::default());
        let _silent = connector.expect_connection();
        let mut client = client(&connector, None);
        client.connect(&Endpoint::command_default()).await.unwrap();

        let handle = client.close_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.close();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            client.send_command(Command::raw("never answered")),
        )
        .await
        .expect("send must return once closed");
        assert!(matches!(result, Err(IpcError::Closed)));
        assert_eq!(client.state(), CommandState::Closed);

        let err = client
            .connect(&Endpoint::command_default())
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Closed));
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_send_before_it_starts() {
        let connector = Arc::new(ChannelConnector::default());
        let mut peer = connector.expect_connection();
        let mut client = client(&connector, None);
        client.connect(&Endpoint::command_default()).await.unwrap();

        client.close_handle().close();
        assert_eq!(client.state(), CommandState::Closed);
        let err = client.send_command(Command::raw("x")).await.unwrap_err();
        assert!(matches!(err, IpcError::Closed));
        assert!(peer.sent.try_recv().is_err());
    }

    /// Accepts connections whose sends never complete.
    struct StalledConnector;

    struct StalledTransport;

    impl Transport for StalledTransport {
        fn send(&mut self, _message: Bytes) -> crate::BoxFuture<'_, Result<()>> {
            Box::pin(std::future::pending())
        }

        fn recv(&mut self) -> crate::BoxFuture<'_, Result<Bytes>> {
            Box::pin(std::future::pending())
        }
    }

    impl Connector for StalledConnector {
        fn open_request_socket<'a>(
            &'a self,
            _endpoint: &'a Endpoint,
        ) -> crate::BoxFuture<'a, Result<Box<dyn Transport>>> {
            Box::pin(async { Ok(Box::new(StalledTransport) as Box<dyn Transport>) })
        }

        fn open_subscribe_socket<'a>(
            &'a self,
            _endpoint: &'a Endpoint,
            _filter: &'a str,
        ) -> crate::BoxFuture<'a, Result<Box<dyn Transport>>> {
            Box::pin(async { Ok(Box::new(StalledTransport) as Box<dyn Transport>) })
        }
    }

    #[tokio::test]
    async fn test_reply_window_covers_a_stalled_send() {
        let mut client = CommandClient::with_connector(
            Arc::new(StalledConnector),
            CommandOptions {
                reply_timeout: Some(Duration::from_millis(50)),
                ..CommandOptions::default()
            },
        );
        client.connect(&Endpoint::command_default()).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            client.send_command(Command::raw("stuck")),
        )
        .await
        .expect("reply window must bound the send");
        assert!(matches!(result, Err(IpcError::Timeout { .. })));
        assert_eq!(client.state(), CommandState::Stale);
    }

    #[tokio::test]
    async fn test_peer_loss_is_connection_error() {
        let connector = Arc::new(ChannelConnector::default());
        let peer = connector.expect_connection();
        let mut client = client(&connector, None);
        client.connect(&Endpoint::command_default()).await.unwrap();
        drop(peer);

        let err = client.send_command(Command::raw("x")).await.unwrap_err();
        assert!(matches!(err, IpcError::Connection { .. }));
        assert_eq!(client.state(), CommandState::Stale);
    }
}
