//! Configuration builders for tests.

use ktrl_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .command_port(daemon.endpoint().port)
///     .command_timeout_ms(200)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.client.host = host.to_string();
        self
    }

    pub fn command_port(mut self, port: u16) -> Self {
        self.config.client.command_port = port;
        self
    }

    pub fn notify_port(mut self, port: u16) -> Self {
        self.config.client.notify_port = port;
        self
    }

    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.command_timeout_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.client.connect_timeout_ms = ms;
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.config.notify.topic = topic.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
