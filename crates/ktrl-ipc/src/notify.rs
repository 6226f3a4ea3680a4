//! Notification client: subscribe to the daemon's event broadcast.
//!
//! Delivery is at-most-once per subscriber window: nothing published
//! before the subscription took effect is replayed, and nothing is
//! acknowledged. `close()` (directly or through a [`CloseHandle`] held by
//! another task) interrupts a pending `receive()` with
//! [`IpcError::Closed`].

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::close::{self, CloseHandle};
use crate::codec::{self, Notification};
use crate::endpoint::Endpoint;
use crate::error::{IpcError, Result};
use crate::transport::{Connector, DEFAULT_CONNECT_TIMEOUT, Transport, ZmqConnector};

/// Topic the daemon uses for active-layer changes.
pub const LAYER_TOPIC: &str = "layer";

/// An endpoint plus the topic filter applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub endpoint: Endpoint,
    /// Byte prefix to match. Empty matches every message.
    pub topic_filter: String,
}

impl Subscription {
    pub fn new(endpoint: Endpoint, topic_filter: impl Into<String>) -> Self {
        Self {
            endpoint,
            topic_filter: topic_filter.into(),
        }
    }

    pub fn matches(&self, message: &[u8]) -> bool {
        codec::matches_filter(&self.topic_filter, message)
    }
}

/// Owns one subscribe connection and yields matching notifications.
pub struct NotificationClient {
    subscription: Subscription,
    transport: Option<Box<dyn Transport>>,
    closer: CloseHandle,
    closed_rx: watch::Receiver<bool>,
}

impl NotificationClient {
    /// Connect with the ZeroMQ transport and the default connect timeout.
    pub async fn connect(endpoint: &Endpoint, topic_filter: &str) -> Result<Self> {
        Self::connect_with_timeout(endpoint, topic_filter, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        endpoint: &Endpoint,
        topic_filter: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let connector = ZmqConnector::new(connect_timeout);
        Self::connect_with(&connector, endpoint, topic_filter).await
    }

    /// Connect through a custom transport. The filter is applied before
    /// this returns, so it is in place for the first `receive`.
    pub async fn connect_with(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        topic_filter: &str,
    ) -> Result<Self> {
        let transport = connector
            .open_subscribe_socket(endpoint, topic_filter)
            .await?;
        info!(%endpoint, topic = topic_filter, "subscribed to notifications");

        let closer = CloseHandle::new();
        let closed_rx = closer.subscribe();
        Ok(Self {
            subscription: Subscription::new(endpoint.clone(), topic_filter),
            transport: Some(transport),
            closer,
            closed_rx,
        })
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Wait for the next notification matching the subscription.
    ///
    /// Messages that slip past the transport filter are dropped here too.
    /// A message without a recognizable topic is still delivered, with an
    /// empty topic.
    pub async fn receive(&mut self) -> Result<Notification> {
        let Self {
            subscription,
            transport,
            closed_rx,
            ..
        } = self;

        loop {
            if *closed_rx.borrow() {
                *transport = None;
                return Err(IpcError::Closed);
            }
            let Some(t) = transport.as_mut() else {
                return Err(IpcError::Closed);
            };

            let message = tokio::select! {
                biased;
                _ = close::closed(closed_rx) => continue,
                received = t.recv() => received?,
            };

            if !subscription.matches(&message) {
                trace!(bytes = message.len(), "dropping message outside topic filter");
                continue;
            }

            let notification = codec::decode_notification_for(&subscription.topic_filter, message);
            debug!(
                topic = %notification.topic,
                bytes = notification.payload.len(),
                "notification received"
            );
            return Ok(notification);
        }
    }

    /// Stop delivery. Idempotent; a pending `receive` fails with `Closed`.
    pub fn close(&mut self) {
        if !self.closer.is_closed() {
            info!(endpoint = %self.subscription.endpoint, "notification channel closed");
        }
        self.closer.close();
        self.transport = None;
    }
}

impl std::fmt::Debug for NotificationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationClient")
            .field("subscription", &self.subscription)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
