use std::{fmt, sync::Arc};

use http::StatusCode;
use quanta::{Clock, Instant};
use tracing::{debug, trace};

use crate::{
    config::{Config, ConfigError},
    context::RequestStats,
    sink::MetricsSink,
};

/// Label used in place of the status code when a response finished without one being recorded.
pub const UNKNOWN_STATUS: &str = "unknown_status";

/// Looks up the metric key of a request.
pub type KeyFn = Arc<dyn Fn(&RequestStats) -> Option<String> + Send + Sync>;

/// Returns the name of the status code counter: `[<key>.]status_code.<status>`.
///
/// An empty key is treated the same as no key at all.
pub fn status_code_metric(key: Option<&str>, status: Option<StatusCode>) -> String {
    let status = status.as_ref().map_or(UNKNOWN_STATUS, StatusCode::as_str);
    with_key(key, &format!("status_code.{status}"))
}

/// Returns the name of the response time timer: `[<key>.]response_time`.
///
/// An empty key is treated the same as no key at all.
pub fn response_time_metric(key: Option<&str>) -> String {
    with_key(key, "response_time")
}

fn with_key(key: Option<&str>, name: &str) -> String {
    match key.filter(|k| !k.is_empty()) {
        Some(key) => format!("{key}.{name}"),
        None => name.to_string(),
    }
}

/// Shared request instrumentation.
///
/// Built once, from a validated [`Config`], and shared by all requests. For each request, [`arm`][Self::arm] returns
/// a [`RequestLifecycle`] that reports the request's metrics once it learns how the request ended.
pub struct Instrumentation {
    sink: Arc<dyn MetricsSink>,
    key_fn: KeyFn,
    clock: Clock,
}

impl Instrumentation {
    /// Creates the instrumentation, sending metrics to the StatsD client described by `config`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the StatsD client cannot be built, an error is returned.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = config.build_client()?;
        Self::with_sink(config, client)
    }

    /// Creates the instrumentation, sending metrics to the given sink.
    ///
    /// The StatsD options in `config` are not used.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn with_sink<S>(config: Config, sink: S) -> Result<Self, ConfigError>
    where
        S: MetricsSink + 'static,
    {
        config.validate()?;

        let field = config.request_key_field;
        Ok(Instrumentation {
            sink: Arc::new(sink),
            key_fn: Arc::new(move |stats: &RequestStats| stats.get(&field)),
            clock: Clock::new(),
        })
    }

    /// Replaces how the metric key of a request is looked up.
    ///
    /// By default, the key is the value of the configured request key field.
    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&RequestStats) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Replaces the clock used to measure response times.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Starts instrumenting a request.
    ///
    /// The response time is measured from this call. The returned lifecycle must be told how the request ended; if it
    /// is dropped first, the request is treated as closed and nothing is reported.
    pub fn arm(self: &Arc<Self>, stats: RequestStats) -> RequestLifecycle {
        RequestLifecycle {
            instrumentation: Arc::clone(self),
            stats,
            start: self.clock.now(),
            status: None,
            state: State::Armed,
        }
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    // Waiting for the request to finish, fail, or be closed.
    Armed,

    // Finished, and metrics were reported.
    Emitted,

    // Failed or closed, and nothing was reported.
    Cleaned,
}

/// Instrumentation state of a single request.
///
/// The first terminal signal wins: [`finish`][Self::finish] reports the status code counter and the response time
/// timer, while [`error`][Self::error] and [`close`][Self::close] only disarm the lifecycle. Once disarmed, every
/// further signal is ignored, so a request reports its metrics at most once.
///
/// Dropping an armed lifecycle is the same as closing it.
pub struct RequestLifecycle {
    instrumentation: Arc<Instrumentation>,
    stats: RequestStats,
    start: Instant,
    status: Option<StatusCode>,
    state: State,
}

impl RequestLifecycle {
    /// Records the response status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Returns the request's metric context.
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    /// Returns `true` if no terminal signal has been received yet.
    pub fn is_armed(&self) -> bool {
        self.state == State::Armed
    }

    /// Signals that the response was fully sent, reporting the request's metrics.
    pub fn finish(&mut self) {
        if !self.is_armed() {
            debug!(state = ?self.state, "Ignoring finish signal for a request that already terminated.");
            return;
        }

        // Disarm before calling into the sink, so that nothing is reported twice even if the sink panics.
        self.state = State::Emitted;

        let instrumentation = &self.instrumentation;
        let key = (instrumentation.key_fn)(&self.stats);
        let tags = self.stats.tags();

        let status_metric = status_code_metric(key.as_deref(), self.status);
        instrumentation.sink.increment(&status_metric, &tags);

        let elapsed = instrumentation.clock.now().saturating_duration_since(self.start);
        let time_metric = response_time_metric(key.as_deref());
        instrumentation.sink.timing(&time_metric, elapsed, &tags);

        trace!(metric = %status_metric, ?elapsed, "Reported request metrics.");
    }

    /// Signals that the response failed. Nothing is reported.
    pub fn error(&mut self) {
        self.disarm("error");
    }

    /// Signals that the response was abandoned before being fully sent. Nothing is reported.
    pub fn close(&mut self) {
        self.disarm("close");
    }

    fn disarm(&mut self, signal: &'static str) {
        if self.is_armed() {
            trace!(signal, "Request terminated without finishing; no metrics reported.");
            self.state = State::Cleaned;
        }
    }
}

impl Drop for RequestLifecycle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RequestLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field("status", &self.status)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
