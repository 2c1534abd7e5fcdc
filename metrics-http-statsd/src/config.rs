use metrics_exporter_statsd::{BuildError, StatsdBuilder, StatsdClient};
use thiserror::Error;

/// Default name of the request field holding the per-request metric key.
pub const DEFAULT_REQUEST_KEY_FIELD: &str = "statsdKey";

/// Default StatsD host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default StatsD port.
pub const DEFAULT_PORT: u16 = 8125;

/// Errors that could occur while configuring the instrumentation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The request key field name was empty.
    #[error("a non-empty request key field name is required")]
    EmptyRequestKeyField,

    /// The StatsD client could not be built from the given options.
    #[error("failed to build StatsD client: {0}")]
    Sink(#[from] BuildError),
}

/// Instrumentation configuration.
///
/// The configuration is validated once, when the instrumentation is built, and is not consulted again afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of the [`RequestStats`][crate::RequestStats] field holding the per-request metric key.
    ///
    /// Must not be empty. Defaults to `statsdKey`.
    pub request_key_field: String,

    /// StatsD host, used when `statsd` does not name a remote address of its own.
    ///
    /// Defaults to `127.0.0.1`.
    pub host: String,

    /// StatsD port, used when `statsd` does not name a remote address of its own.
    ///
    /// Defaults to 8125.
    pub port: u16,

    /// Options passed through to the StatsD client.
    pub statsd: StatsdBuilder,
}

impl Config {
    /// Sets the name of the request key field.
    #[must_use]
    pub fn with_request_key_field<S: Into<String>>(mut self, field: S) -> Self {
        self.request_key_field = field.into();
        self
    }

    /// Sets the StatsD host and port.
    #[must_use]
    pub fn with_host_and_port<S: Into<String>>(mut self, host: S, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the options passed through to the StatsD client.
    #[must_use]
    pub fn with_statsd_options(mut self, statsd: StatsdBuilder) -> Self {
        self.statsd = statsd;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// If the request key field name is empty, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_key_field.is_empty() {
            return Err(ConfigError::EmptyRequestKeyField);
        }

        Ok(())
    }

    /// Builds the StatsD client described by this configuration.
    ///
    /// # Errors
    ///
    /// If the host/port pair cannot be resolved, or the client options are invalid, an error is returned.
    pub fn build_client(&self) -> Result<StatsdClient, ConfigError> {
        let client = self.statsd.clone().with_fallback_address(&self.host, self.port)?.build()?;
        Ok(client)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_key_field: DEFAULT_REQUEST_KEY_FIELD.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            statsd: StatsdBuilder::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use metrics_exporter_statsd::StatsdBuilder;

    use super::{Config, ConfigError, DEFAULT_REQUEST_KEY_FIELD};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.request_key_field, DEFAULT_REQUEST_KEY_FIELD);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8125);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_request_key_field_is_rejected() {
        let config = Config::default().with_request_key_field("");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyRequestKeyField)));
    }

    #[test]
    fn invalid_statsd_options_are_reported() {
        let config = Config::default()
            .with_statsd_options(StatsdBuilder::default().with_maximum_payload_length(0));
        assert!(matches!(config.build_client(), Err(ConfigError::Sink(_))));
    }

    #[test]
    fn builds_client_from_host_and_port() {
        let config = Config::default()
            .with_host_and_port("127.0.0.1", 9125)
            .with_statsd_options(StatsdBuilder::default().with_mock(true));
        let client = config.build_client().expect("valid configuration");

        client.increment("requests", &[]);
        assert_eq!(client.mock_buffer(), vec!["requests:1|c"]);
    }
}
