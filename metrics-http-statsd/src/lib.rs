//! HTTP request instrumentation that reports status codes and response times to [StatsD][statsd].
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use std::convert::Infallible;
//! # use http::{Request, Response};
//! # use metrics_http_statsd::{parse_tag, Config, RequestStats, StatsdLayer};
//! # use tower_layer::Layer as _;
//! // Build the layer. This validates the configuration and creates the StatsD client, which sends to
//! // `127.0.0.1:8125` by default.
//! let layer = StatsdLayer::new(Config::default()).expect("invalid instrumentation configuration");
//!
//! // Handlers can name the metrics of a request, and tag them, through the `RequestStats` in the request extensions.
//! async fn handler(req: Request<String>) -> Result<Response<String>, Infallible> {
//!     if let Some(stats) = RequestStats::from_extensions(req.extensions()) {
//!         stats.set("statsdKey", "checkout");
//!         stats.push_tag(parse_tag("env:prod"));
//!     }
//!     Ok(Response::new("ok".to_string()))
//! }
//!
//! let service = layer.layer(tower::service_fn(handler));
//! ```
//!
//! Once the response body of the request above has been fully sent, two metrics are reported:
//!
//! ```text
//! checkout.status_code.200:1|c|#env:prod
//! checkout.response_time:3|ms|#env:prod
//! ```
//!
//! Without a key, the metrics are named `status_code.<status>` and `response_time`.
//!
//! # Request lifecycle
//!
//! A request ends in one of three ways: its response finishes, it fails (the service returns an error, or the body
//! yields one), or it is closed (the response or its body is dropped before the end, typically because the client went
//! away). Only finished requests are reported, and they are reported exactly once, however many of those signals
//! follow. See [`RequestLifecycle`] for the underlying state machine, which can be driven directly when integrating
//! with something other than `tower`.
//!
//! # Sinks
//!
//! Metrics go to a [`MetricsSink`]. The default is a [`StatsdClient`]; [`RecorderSink`] forwards to the installed
//! [`metrics`] recorder instead, and any other implementation can be passed to [`StatsdLayer::with_sink`].

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod body;
pub use self::body::InstrumentedBody;

mod config;
pub use self::config::{Config, ConfigError, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_REQUEST_KEY_FIELD};

mod context;
pub use self::context::{parse_tag, RequestStats};

mod instrument;
pub use self::instrument::{
    response_time_metric, status_code_metric, Instrumentation, KeyFn, RequestLifecycle, UNKNOWN_STATUS,
};

mod layer;
pub use self::layer::{ResponseFuture, StatsdLayer, StatsdService};

mod sink;
pub use self::sink::{Label, MetricsSink, RecorderSink};

pub use metrics_exporter_statsd::{StatsdBuilder, StatsdClient, TagFormat};
