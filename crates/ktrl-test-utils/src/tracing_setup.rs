//! Tracing initialisation for tests.
//!
//! [`init_test_tracing`] installs a subscriber at most once per process, so
//! every test may call it.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: protocol chatter at debug,
/// everything else at warn.
const DEFAULT_TEST_FILTER: &str = "warn,ktrl_ipc=debug";

/// Route tracing output to the test-harness writer.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER)),
        )
        .with_test_writer()
        .try_init();
}
