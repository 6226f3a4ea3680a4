//! Fuzz target for the client configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()`, covering TOML parsing and
//! the endpoint/port/level validation behind it.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ktrl_config::AppConfig::parse(s) {
            // Anything that validates must describe two distinct sockets.
            assert_ne!(config.command_endpoint(), config.notify_endpoint());
        }
    }
});
