#![deny(unsafe_code)]

//! Shared test utilities for the ktrl IPC workspace.
//!
//! Provides stub daemons that speak the real wire protocol, a config
//! builder, and tracing helpers so that crate tests stay short.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! ktrl-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::{EchoDaemon, SilentDaemon, StubPublisher, unused_port};
pub use tracing_setup::init_test_tracing;
