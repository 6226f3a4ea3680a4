use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable handle that closes a client from elsewhere, e.g. a Ctrl-C
/// handler. A pending `send_command` or `receive` fails with
/// [`IpcError::Closed`](crate::IpcError::Closed).
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolve once the flag behind `rx` is set.
pub(crate) async fn closed(rx: &mut watch::Receiver<bool>) {
    // The sender lives in the client's own handle, so it outlives `rx`.
    if rx.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}
