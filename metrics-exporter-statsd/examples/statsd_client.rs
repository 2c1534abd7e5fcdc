use std::{thread::sleep, time::Duration};

use metrics::Label;
use metrics_exporter_statsd::StatsdBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to parse remote address")
        .with_prefix("example")
        .with_global_tags([Label::new("system", "foo")])
        .with_error_handler(|e| eprintln!("failed to send metric: {e}"))
        .build()
        .expect("failed to build StatsD client");

    client.increment("idle_metric", &[]);
    client.gauge("testing", 42.0, &[]);

    // Loop over and over, pretending to do some work.
    for i in 0u64.. {
        client.increment("loops", &[]);
        client.timing("loop_delta", Duration::from_millis(i % 250), &[Label::new("bucket", "even")]);
        sleep(Duration::from_millis(100));
    }
}
