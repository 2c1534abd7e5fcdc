use std::{fmt, io, sync::Arc, time::Duration};

use crossbeam_channel::{bounded, Sender, TrySendError};
use metrics::Label;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    builder::{BuildError, ErrorHandler},
    transport::{
        sync::{Forwarder, Transport},
        TransportConfiguration,
    },
    writer::{LineWriter, MetricType, MetricValue, TagFormat},
};

/// Client configuration, as assembled by [`StatsdBuilder`][crate::StatsdBuilder].
pub(crate) struct ClientConfiguration {
    pub transport: TransportConfiguration,
    pub max_payload_len: usize,
    pub queue_capacity: usize,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub global_tags: Vec<Label>,
    pub tag_format: TagFormat,
    pub mock: bool,
    pub error_handler: Option<ErrorHandler>,
}

enum Output {
    // Hand-off to the forwarder thread.
    Queue(Sender<Vec<u8>>),

    Mock(Mutex<Vec<String>>),
}

struct Inner {
    writer: Mutex<LineWriter>,
    output: Output,
    error_handler: Option<ErrorHandler>,
}

/// A StatsD client.
///
/// Each call renders a single metric and hands it to a background forwarder thread, which writes it to the socket as
/// its own datagram or frame: there is no client-side aggregation, batching, or sampling. Callers never wait on the
/// network. If the forwarder falls behind (for example, because the server stopped reading from a stream socket) and
/// its queue is full, new metrics are dropped. Failures are logged, and passed to the error handler if any, instead of
/// being returned to the caller.
///
/// The client is cheap to clone, and clones share the same queue and socket. The forwarder thread stops once the last
/// clone is dropped.
#[derive(Clone)]
pub struct StatsdClient {
    inner: Arc<Inner>,
}

impl StatsdClient {
    pub(crate) fn new(config: ClientConfiguration) -> Result<Self, BuildError> {
        let with_length_prefix = !config.mock && config.transport.requires_length_prefix();
        let writer = LineWriter::new(config.max_payload_len, with_length_prefix)
            .with_prefix(config.prefix)
            .with_suffix(config.suffix)
            .with_global_tags(&config.global_tags)
            .with_tag_format(config.tag_format);

        let output = if config.mock {
            Output::Mock(Mutex::new(Vec::new()))
        } else {
            let (tx, rx) = bounded(config.queue_capacity);
            let forwarder =
                Forwarder::new(Transport::new(config.transport), rx, config.error_handler.clone());

            std::thread::Builder::new()
                .name("metrics-exporter-statsd-forwarder".to_string())
                .spawn(move || forwarder.run())
                .map_err(|_| BuildError::Backend)?;

            Output::Queue(tx)
        };

        Ok(StatsdClient {
            inner: Arc::new(Inner {
                writer: Mutex::new(writer),
                output,
                error_handler: config.error_handler,
            }),
        })
    }

    /// Increments a counter by one.
    pub fn increment(&self, name: &str, tags: &[Label]) {
        self.send(name, MetricValue::Integer(1), MetricType::Counter, tags);
    }

    /// Increments a counter by the given value.
    pub fn increment_by(&self, name: &str, value: u64, tags: &[Label]) {
        self.send(name, MetricValue::Unsigned(value), MetricType::Counter, tags);
    }

    /// Decrements a counter by one.
    pub fn decrement(&self, name: &str, tags: &[Label]) {
        self.send(name, MetricValue::Integer(-1), MetricType::Counter, tags);
    }

    /// Sets a gauge.
    pub fn gauge(&self, name: &str, value: f64, tags: &[Label]) {
        self.send(name, MetricValue::FloatingPoint(value), MetricType::Gauge, tags);
    }

    /// Records a timing, in whole milliseconds.
    pub fn timing(&self, name: &str, duration: Duration, tags: &[Label]) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.send(name, MetricValue::Unsigned(millis), MetricType::Timing, tags);
    }

    /// Records a histogram sample.
    pub fn histogram(&self, name: &str, value: f64, tags: &[Label]) {
        self.send(name, MetricValue::FloatingPoint(value), MetricType::Histogram, tags);
    }

    /// Records a distribution sample.
    pub fn distribution(&self, name: &str, value: f64, tags: &[Label]) {
        self.send(name, MetricValue::FloatingPoint(value), MetricType::Distribution, tags);
    }

    /// Returns the metrics recorded so far in mock mode, one rendered line per metric, without the trailing newline.
    ///
    /// Always empty when the client is not in mock mode.
    pub fn mock_buffer(&self) -> Vec<String> {
        match &self.inner.output {
            Output::Mock(buf) => buf.lock().clone(),
            Output::Queue(_) => Vec::new(),
        }
    }

    fn send(&self, name: &str, value: MetricValue, metric_type: MetricType, tags: &[Label]) {
        let payload = self.inner.writer.lock().write(name, value, metric_type, tags).map(<[u8]>::to_vec);
        let Some(payload) = payload else {
            debug!(metric = name, "Dropping metric that exceeds the maximum payload length.");
            return;
        };

        let result = match &self.inner.output {
            Output::Queue(tx) => tx.try_send(payload),
            Output::Mock(buf) => {
                let line = String::from_utf8_lossy(&payload);
                buf.lock().push(line.trim_end_matches('\n').to_owned());
                Ok(())
            }
        };

        let e = match result {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => {
                io::Error::new(io::ErrorKind::WouldBlock, "forwarder queue is full")
            }
            Err(TrySendError::Disconnected(_)) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "forwarder thread is gone")
            }
        };

        warn!(error = %e, metric = name, "Dropping metric.");
        if let Some(handler) = &self.inner.error_handler {
            handler(&e);
        }
    }
}

impl fmt::Debug for StatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdClient")
            .field("mock", &matches!(self.inner.output, Output::Mock(_)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::UdpSocket,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    use metrics::Label;

    use crate::{StatsdBuilder, TagFormat};

    fn mock_client() -> crate::StatsdClient {
        StatsdBuilder::default().with_mock(true).build().expect("valid configuration")
    }

    #[test]
    fn mock_records_each_metric() {
        let client = mock_client();
        let tags = [Label::new("env", "prod")];

        client.increment("checkout.status_code.200", &tags);
        client.timing("checkout.response_time", Duration::from_micros(12_900), &tags);
        client.decrement("in_flight", &[]);
        client.increment_by("bytes", 512, &[]);
        client.gauge("queue_depth", 3.0, &[]);
        client.histogram("payload_size", 1.5, &[]);
        client.distribution("latency", 0.5, &[]);

        assert_eq!(
            client.mock_buffer(),
            vec![
                "checkout.status_code.200:1|c|#env:prod",
                "checkout.response_time:12|ms|#env:prod",
                "in_flight:-1|c",
                "bytes:512|c",
                "queue_depth:3.0|g",
                "payload_size:1.5|h",
                "latency:0.5|d",
            ]
        );
    }

    #[test]
    fn clones_share_state() {
        let client = mock_client();
        let clone = client.clone();

        clone.increment("requests", &[]);
        assert_eq!(client.mock_buffer(), vec!["requests:1|c"]);
    }

    #[test]
    fn builder_options_apply_to_rendered_lines() {
        let client = StatsdBuilder::default()
            .with_mock(true)
            .with_prefix("web")
            .with_global_tags([Label::new("region", "eu")])
            .with_tag_format(TagFormat::Telegraf)
            .build()
            .expect("valid configuration");

        client.increment("status_code.404", &[Label::new("env", "prod")]);
        assert_eq!(client.mock_buffer(), vec!["web.status_code.404,env=prod,region=eu:1|c"]);
    }

    #[test]
    fn oversized_metrics_are_dropped() {
        let client = StatsdBuilder::default()
            .with_mock(true)
            .with_maximum_payload_length(16)
            .build()
            .expect("valid configuration");

        client.increment("this_name_does_not_fit", &[]);
        client.increment("fits", &[]);
        assert_eq!(client.mock_buffer(), vec!["fits:1|c"]);
    }

    #[test]
    fn non_mock_client_has_empty_mock_buffer() {
        let server = UdpSocket::bind("127.0.0.1:0").expect("bind server socket");
        server.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");
        let addr = server.local_addr().expect("server address");

        let client = StatsdBuilder::default()
            .with_remote_address(addr.to_string())
            .expect("valid address")
            .build()
            .expect("valid configuration");

        client.timing("response_time", Duration::from_millis(7), &[]);

        let mut buf = [0u8; 64];
        let len = server.recv(&mut buf).expect("receive payload");
        assert_eq!(&buf[..len], b"response_time:7|ms\n");
        assert!(client.mock_buffer().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn send_failures_reach_the_error_handler() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&failures);

        let client = StatsdBuilder::default()
            .with_remote_address("unix:///nonexistent/statsd.sock")
            .expect("valid address")
            .with_error_handler(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("valid configuration");

        client.increment("requests", &[]);
        client.increment("requests", &[]);

        // Failures are reported from the forwarder thread.
        let deadline = Instant::now() + Duration::from_secs(5);
        while failures.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }
}
