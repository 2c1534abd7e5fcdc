use std::{sync::Arc, time::Duration};

use metrics::{Key, Level, Metadata};
use metrics_exporter_statsd::StatsdClient;

pub use metrics::Label;

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// A destination for request metrics.
///
/// Implementations are shared by every request handled by the instrumentation, so they must be safe to call
/// concurrently. Both operations are fire-and-forget: a sink that fails to deliver a metric deals with the failure
/// itself.
pub trait MetricsSink: Send + Sync {
    /// Increments the counter `name` by one.
    fn increment(&self, name: &str, tags: &[Label]);

    /// Records a timing sample for `name`.
    fn timing(&self, name: &str, duration: Duration, tags: &[Label]);
}

impl MetricsSink for StatsdClient {
    fn increment(&self, name: &str, tags: &[Label]) {
        StatsdClient::increment(self, name, tags);
    }

    fn timing(&self, name: &str, duration: Duration, tags: &[Label]) {
        StatsdClient::timing(self, name, duration, tags);
    }
}

impl<T> MetricsSink for Arc<T>
where
    T: MetricsSink + ?Sized,
{
    fn increment(&self, name: &str, tags: &[Label]) {
        (**self).increment(name, tags);
    }

    fn timing(&self, name: &str, duration: Duration, tags: &[Label]) {
        (**self).timing(name, duration, tags);
    }
}

impl<T> MetricsSink for Box<T>
where
    T: MetricsSink + ?Sized,
{
    fn increment(&self, name: &str, tags: &[Label]) {
        (**self).increment(name, tags);
    }

    fn timing(&self, name: &str, duration: Duration, tags: &[Label]) {
        (**self).timing(name, duration, tags);
    }
}

/// A sink that forwards request metrics to the installed [`metrics`] recorder.
///
/// Counters are incremented by one, and timings are recorded into a histogram, in milliseconds. Tags become labels.
/// This allows the request metrics to flow through any recorder (and recorder layers) the application already uses.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn increment(&self, name: &str, tags: &[Label]) {
        let key = Key::from_parts(name.to_string(), tags.to_vec());
        metrics::with_recorder(|recorder| recorder.register_counter(&key, &METADATA).increment(1));
    }

    fn timing(&self, name: &str, duration: Duration, tags: &[Label]) {
        let key = Key::from_parts(name.to_string(), tags.to_vec());
        let millis = duration.as_secs_f64() * 1000.0;
        metrics::with_recorder(|recorder| recorder.register_histogram(&key, &METADATA).record(millis));
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use metrics::Label;
    use metrics_exporter_statsd::StatsdBuilder;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::{MetricsSink, RecorderSink};

    #[test]
    fn statsd_client_sink() {
        let client = StatsdBuilder::default().with_mock(true).build().expect("valid configuration");
        let sink: Arc<dyn MetricsSink> = Arc::new(client.clone());

        sink.increment("status_code.200", &[Label::new("env", "prod")]);
        sink.timing("response_time", Duration::from_millis(40), &[Label::new("env", "prod")]);

        assert_eq!(
            client.mock_buffer(),
            vec!["status_code.200:1|c|#env:prod", "response_time:40|ms|#env:prod"]
        );
    }

    #[test]
    fn recorder_sink() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let sink = RecorderSink;
            let tags = [Label::new("env", "prod")];
            sink.increment("status_code.200", &tags);
            sink.increment("status_code.200", &tags);
            sink.timing("response_time", Duration::from_millis(250), &tags);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert_eq!(snapshot.len(), 2);

        for (key, _, _, value) in snapshot {
            let labels: Vec<_> = key.key().labels().cloned().collect();
            assert_eq!(labels, vec![Label::new("env", "prod")]);

            match (key.key().name(), value) {
                ("status_code.200", DebugValue::Counter(count)) => assert_eq!(count, 2),
                ("response_time", DebugValue::Histogram(values)) => {
                    let values: Vec<f64> = values.into_iter().map(|v| v.into_inner()).collect();
                    assert_eq!(values, vec![250.0]);
                }
                (name, value) => panic!("unexpected metric {name}: {value:?}"),
            }
        }
    }
}
