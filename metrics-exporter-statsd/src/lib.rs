//! A small client for sending metrics to a [StatsD][statsd]-compatible server.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! ```no_run
//! # use metrics::Label;
//! # use metrics_exporter_statsd::StatsdBuilder;
//! // First, create a builder.
//! //
//! // The builder can configure the remote address, a prefix and suffix for metric names, global tags, and how tags
//! // are rendered.
//! let client = StatsdBuilder::default()
//!     .with_remote_address("localhost:8125")
//!     .expect("failed to parse remote address")
//!     .with_global_tags([Label::new("service", "checkout")])
//!     .build()
//!     .expect("failed to build client");
//!
//! // Every call is forwarded straight away, as a single line.
//! client.increment("status_code.200", &[Label::new("env", "prod")]);
//! ```
//!
//! # Behavior
//!
//! ## No buffering
//!
//! Metrics are neither aggregated nor batched: each call renders one line and queues it for a background forwarder
//! thread, which writes it to the socket on its own. Callers never wait on the network. When the forwarder cannot keep
//! up and its bounded queue is full, new metrics are dropped.
//!
//! ## Transports
//!
//! UDP is the default transport. On Unix platforms, Unix domain sockets are supported in both `SOCK_DGRAM` and
//! `SOCK_STREAM` mode; in stream mode, each line is prefixed with its length.
//!
//! ## Failures
//!
//! Sockets are connected lazily. If a write fails, the metric is dropped, the failure is logged and handed to the
//! configured error handler, and the next metric starts with a fresh connection.
//!
//! ## Mock mode
//!
//! For tests, [`StatsdBuilder::with_mock`] keeps rendered lines in memory instead of sending them.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, ErrorHandler, StatsdBuilder};

mod client;
pub use self::client::StatsdClient;

mod transport;

mod writer;
pub use self::writer::TagFormat;
