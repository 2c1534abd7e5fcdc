use std::{fmt, io, sync::Arc, time::Duration};

use metrics::Label;
use thiserror::Error;

use crate::{
    client::{ClientConfiguration, StatsdClient},
    transport::{RemoteAddr, TransportConfiguration},
    writer::{TagFormat, MIN_PAYLOAD_LEN},
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Callback invoked whenever a metric could not be sent.
pub type ErrorHandler = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// Errors that could occur while building a StatsD client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse or resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The maximum payload length is outside of the supported range.
    #[error("invalid maximum payload length {len} (must be between {min} and 2^32 - 1 bytes)", min = MIN_PAYLOAD_LEN)]
    InvalidPayloadLength {
        /// The rejected length.
        len: usize,
    },

    /// The forwarder queue must hold at least one metric.
    #[error("invalid queue capacity (must be at least 1)")]
    InvalidQueueCapacity,

    /// Failed to spawn the background forwarder thread.
    #[error("failed to spawn background thread for the StatsD forwarder")]
    Backend,
}

/// Builder for a [`StatsdClient`].
#[derive(Clone)]
pub struct StatsdBuilder {
    remote_addr: Option<RemoteAddr>,
    write_timeout: Duration,
    max_payload_len: usize,
    queue_capacity: usize,
    prefix: Option<String>,
    suffix: Option<String>,
    global_tags: Vec<Label>,
    tag_format: TagFormat,
    mock: bool,
    error_handler: Option<ErrorHandler>,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// For UDP, the address simply needs to be in the format of `<host>:<port>` (optionally with a `udp://` scheme).
    /// For Unix domain sockets, an address in the format of `<scheme>://<path>`. The scheme can be either `unix` or
    /// `unixgram`, for a stream (`SOCK_STREAM`) or datagram (`SOCK_DGRAM`) socket, respectively.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = Some(
            RemoteAddr::try_from(addr.as_ref())
                .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?,
        );
        Ok(self)
    }

    /// Set the UDP host and port to send metrics to, unless a remote address was already configured.
    ///
    /// This allows a host/port pair coming from a surrounding configuration to act as the default, while still
    /// letting an explicit call to [`with_remote_address`][Self::with_remote_address] take precedence.
    ///
    /// # Errors
    ///
    /// If no remote address was configured yet and the host/port pair cannot be resolved, an error will be returned.
    pub fn with_fallback_address(mut self, host: &str, port: u16) -> Result<Self, BuildError> {
        if self.remote_addr.is_none() {
            self.remote_addr = Some(
                RemoteAddr::udp(host, port)
                    .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?,
            );
        }
        Ok(self)
    }

    /// Set the write timeout for sending metrics.
    ///
    /// When the write timeout is reached, the write operation will be aborted and the metric being sent at the time
    /// will be dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload length for a single metric.
    ///
    /// A metric whose rendered line would exceed this length is dropped.
    ///
    /// Defaults to 8192 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set how many metrics can wait for the forwarder thread.
    ///
    /// Metrics are handed to a background thread that writes them to the socket. When that thread cannot keep up, for
    /// instance because the remote server stopped reading, new metrics are dropped once this many are waiting, rather
    /// than blocking the caller.
    ///
    /// Defaults to 1024.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set a prefix for all metric names.
    ///
    /// Metric names will be sent in the format of `<prefix>.<name>`.
    #[must_use]
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a suffix for all metric names.
    ///
    /// Metric names will be sent in the format of `<name>.<suffix>`.
    #[must_use]
    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Set tags that are sent with every metric, after any tags given for the metric itself.
    #[must_use]
    pub fn with_global_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Label>,
    {
        self.global_tags = tags.into_iter().collect();
        self
    }

    /// Set the tag format.
    ///
    /// Defaults to [`TagFormat::Datadog`].
    #[must_use]
    pub fn with_tag_format(mut self, tag_format: TagFormat) -> Self {
        self.tag_format = tag_format;
        self
    }

    /// Sets whether or not the client runs in mock mode.
    ///
    /// In mock mode, nothing is sent over the network. Rendered metrics are kept in memory instead, and can be
    /// inspected with [`StatsdClient::mock_buffer`].
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    /// Set a callback to be invoked whenever a metric is dropped, either because sending it failed or because the
    /// forwarder queue was full.
    ///
    /// Send failures are called from the forwarder thread. They are always logged. The handler is an additional hook, for example to count dropped metrics.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&io::Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Builds the client.
    ///
    /// Unless in mock mode, this spawns the background thread that forwards metrics to the remote server. No socket is
    /// opened here: the connection is established when the first metric is forwarded.
    ///
    /// # Errors
    ///
    /// If the maximum payload length or the queue capacity is out of range, or the forwarder thread cannot be spawned,
    /// an error will be returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        if self.max_payload_len < MIN_PAYLOAD_LEN || u32::try_from(self.max_payload_len).is_err() {
            return Err(BuildError::InvalidPayloadLength { len: self.max_payload_len });
        }

        if self.queue_capacity == 0 {
            return Err(BuildError::InvalidQueueCapacity);
        }

        let client_config = ClientConfiguration {
            transport: TransportConfiguration {
                remote_addr: self.remote_addr.unwrap_or_default(),
                write_timeout: self.write_timeout,
            },
            max_payload_len: self.max_payload_len,
            queue_capacity: self.queue_capacity,
            prefix: self.prefix,
            suffix: self.suffix,
            global_tags: self.global_tags,
            tag_format: self.tag_format,
            mock: self.mock,
            error_handler: self.error_handler,
        };

        StatsdClient::new(client_config)
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addr: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            prefix: None,
            suffix: None,
            global_tags: Vec::new(),
            tag_format: TagFormat::Datadog,
            mock: false,
            error_handler: None,
        }
    }
}

impl fmt::Debug for StatsdBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdBuilder")
            .field("remote_addr", &self.remote_addr)
            .field("write_timeout", &self.write_timeout)
            .field("max_payload_len", &self.max_payload_len)
            .field("queue_capacity", &self.queue_capacity)
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("global_tags", &self.global_tags)
            .field("tag_format", &self.tag_format)
            .field("mock", &self.mock)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, StatsdBuilder};

    #[test]
    fn rejects_invalid_remote_address() {
        let result = StatsdBuilder::default().with_remote_address("nope://somewhere");
        assert!(matches!(result, Err(BuildError::InvalidRemoteAddress { .. })));
    }

    #[test]
    fn rejects_invalid_payload_length() {
        let result = StatsdBuilder::default().with_maximum_payload_length(2).build();
        assert!(matches!(result, Err(BuildError::InvalidPayloadLength { len: 2 })));
    }

    #[test]
    fn rejects_empty_queue() {
        let result = StatsdBuilder::default().with_queue_capacity(0).build();
        assert!(matches!(result, Err(BuildError::InvalidQueueCapacity)));
    }

    #[test]
    fn explicit_address_wins_over_fallback() {
        let builder = StatsdBuilder::default()
            .with_remote_address("127.0.0.1:9125")
            .and_then(|b| b.with_fallback_address("127.0.0.1", 8125))
            .expect("valid addresses");
        assert!(format!("{builder:?}").contains("9125"));

        let builder =
            StatsdBuilder::default().with_fallback_address("127.0.0.1", 8126).expect("valid address");
        assert!(format!("{builder:?}").contains("8126"));
    }
}
