#![deny(unsafe_code)]

//! Control protocol for the ktrl keyboard-remapping daemon.
//!
//! ktrl exposes two independent channels:
//!
//! ```text
//! ┌──────────────┐  REQ/REP  :7331   ┌──────────────┐
//! │ CommandClient│◀─────────────────▶│              │
//! └──────────────┘  lock-step        │    Daemon    │
//! ┌──────────────────┐ PUB/SUB :7333 │              │
//! │NotificationClient│◀──────────────│              │
//! └──────────────────┘ topic filter  └──────────────┘
//! ```
//!
//! The command channel carries one `IpcDoEffect` request at a time and
//! surfaces the daemon's reply verbatim. The notification channel delivers
//! topic-prefixed events (e.g. `layer`) with no acknowledgment and no replay.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future. Return type of the
/// object-safe transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Close signalling shared by both clients.
pub mod close;
/// Wire encoding of commands, replies and notifications.
pub mod codec;
/// Lock-step request/reply client.
pub mod command;
/// Daemon socket addresses and their defaults.
pub mod endpoint;
pub mod error;
/// Subscribe-side client for daemon events.
pub mod notify;
/// Daemon-side reply and publish sockets.
pub mod server;
/// Socket abstraction over ZeroMQ.
pub mod transport;

pub use codec::{Command, CommandReply, EffectValue, Notification};
pub use command::{CommandClient, CommandOptions, CommandState};
pub use endpoint::{Channel, Endpoint};
pub use error::{IpcError, Result};
pub use close::CloseHandle;
pub use notify::{LAYER_TOPIC, NotificationClient, Subscription};
pub use server::{CommandServer, EffectExecutor, EffectRequestHandler, NotificationPublisher};
pub use transport::{Connector, Transport, ZmqConnector};
