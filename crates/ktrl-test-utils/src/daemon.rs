//! Stub daemons bound to ephemeral localhost ports.
//!
//! Each stub speaks the real wire protocol, so tests exercise the same
//! transport the clients use in production. Stubs shut down when dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use ktrl_ipc::server::ShutdownSignal;
use ktrl_ipc::{CommandServer, Endpoint, NotificationPublisher, transport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Time for a fresh subscription to reach the publisher. Messages
/// published before that are not delivered.
pub const SUBSCRIBE_SETTLE: Duration = Duration::from_millis(250);

fn ephemeral() -> Endpoint {
    Endpoint::new("127.0.0.1", 0)
}

/// A localhost port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind probe port");
    listener
        .local_addr()
        .expect("probe listener has no address")
        .port()
}

/// A command socket that answers every request and records what it got.
pub struct EchoDaemon {
    endpoint: Endpoint,
    requests: Arc<Mutex<Vec<Bytes>>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    handle: JoinHandle<()>,
}

impl EchoDaemon {
    /// Reply with the request bytes unchanged.
    pub async fn echo() -> Self {
        Self::with_handler(|req| req).await
    }

    /// Reply with the same fixed bytes to every request.
    pub async fn replying(reply: &'static [u8]) -> Self {
        Self::with_handler(move |_| Bytes::from_static(reply)).await
    }

    /// Reply with whatever `handler` returns.
    pub async fn with_handler<F>(mut handler: F) -> Self
    where
        F: FnMut(Bytes) -> Bytes + Send + 'static,
    {
        let server = CommandServer::bind(&ephemeral())
            .await
            .expect("failed to bind stub command socket");
        let endpoint = server.local_endpoint().clone();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let recording = move |req: Bytes| {
                seen.lock().expect("request log poisoned").push(req.clone());
                handler(req)
            };
            if let Err(e) = server.serve(recording, shutdown_rx).await {
                tracing::warn!(error = %e, "stub command daemon stopped");
            }
        });

        Self {
            endpoint,
            requests,
            shutdown_tx,
            handle,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Bytes> {
        self.requests.lock().expect("request log poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("request log poisoned").len()
    }
}

impl Drop for EchoDaemon {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        self.handle.abort();
    }
}

/// A command socket that accepts a request and never replies.
pub struct SilentDaemon {
    endpoint: Endpoint,
    received: Arc<Mutex<usize>>,
    handle: JoinHandle<()>,
}

impl SilentDaemon {
    pub async fn start() -> Self {
        let (mut socket, endpoint) = transport::bind_reply_socket(&ephemeral())
            .await
            .expect("failed to bind silent command socket");

        let received = Arc::new(Mutex::new(0));
        let count = Arc::clone(&received);
        let handle = tokio::spawn(async move {
            if socket.recv().await.is_ok() {
                *count.lock().expect("counter poisoned") += 1;
            }
            // Hold the socket open without ever answering.
            std::future::pending::<()>().await;
        });

        Self {
            endpoint,
            received,
            handle,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub fn received(&self) -> usize {
        *self.received.lock().expect("counter poisoned")
    }
}

impl Drop for SilentDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A notification socket driven directly by the test.
pub struct StubPublisher {
    publisher: NotificationPublisher,
}

impl StubPublisher {
    pub async fn bind() -> Self {
        let publisher = NotificationPublisher::bind(&ephemeral())
            .await
            .expect("failed to bind stub publish socket");
        Self { publisher }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.publisher.local_endpoint().clone()
    }

    pub async fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.publisher
            .publish(topic, payload)
            .await
            .expect("stub publish failed");
    }

    pub async fn publish_raw(&mut self, message: &'static [u8]) {
        self.publisher
            .publish_raw(Bytes::from_static(message))
            .await
            .expect("stub publish failed");
    }

    /// Wait long enough for subscribers that just connected to be
    /// registered.
    pub async fn settle(&self) {
        tokio::time::sleep(SUBSCRIBE_SETTLE).await;
    }
}
