#![cfg(unix)]

use std::{
    io::Read as _,
    os::unix::net::{UnixDatagram, UnixListener},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use metrics::Label;
use metrics_exporter_statsd::StatsdBuilder;

fn socket_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("statsd-{}-{}.sock", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

#[test]
fn unixgram_sends_one_line_per_datagram() {
    let path = socket_path("dgram");
    let server = UnixDatagram::bind(&path).expect("bind datagram socket");
    server.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");

    let client = StatsdBuilder::default()
        .with_remote_address(format!("unixgram://{}", path.display()))
        .expect("valid address")
        .build()
        .expect("valid configuration");

    client.increment("status_code.200", &[Label::new("env", "prod")]);
    client.timing("response_time", Duration::from_millis(5), &[]);

    let mut buf = [0u8; 128];
    let len = server.recv(&mut buf).expect("receive first datagram");
    assert_eq!(&buf[..len], b"status_code.200:1|c|#env:prod\n");
    let len = server.recv(&mut buf).expect("receive second datagram");
    assert_eq!(&buf[..len], b"response_time:5|ms\n");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn unix_stream_prefixes_each_line_with_its_length() {
    let path = socket_path("stream");
    let listener = UnixListener::bind(&path).expect("bind stream socket");

    let client = StatsdBuilder::default()
        .with_remote_address(format!("unix://{}", path.display()))
        .expect("valid address")
        .build()
        .expect("valid configuration");

    client.increment("requests", &[]);

    let (mut stream, _) = listener.accept().expect("accept client connection");
    stream.set_read_timeout(Some(Duration::from_secs(5))).expect("set read timeout");

    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).expect("read length prefix");
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut line = vec![0u8; len];
    stream.read_exact(&mut line).expect("read line");
    assert_eq!(line, b"requests:1|c\n");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn stalled_stream_peer_does_not_block_callers() {
    let path = socket_path("stalled");
    let listener = UnixListener::bind(&path).expect("bind stream socket");

    let dropped = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&dropped);
    let client = StatsdBuilder::default()
        .with_remote_address(format!("unix://{}", path.display()))
        .expect("valid address")
        .with_write_timeout(Duration::from_secs(30))
        .with_queue_capacity(16)
        .with_error_handler(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("valid configuration");

    // The server accepts the connection but never reads from it.
    client.increment("requests", &[]);
    let (stream, _) = listener.accept().expect("accept client connection");

    // Far more data than the socket buffers can hold, so the forwarder ends up stuck in a write.
    let name = "x".repeat(1000);
    let start = Instant::now();
    for _ in 0..10_000 {
        client.increment(&name, &[]);
    }

    assert!(start.elapsed() < Duration::from_secs(5), "callers waited on the stalled socket");
    assert!(dropped.load(Ordering::SeqCst) > 0);

    drop(stream);
    let _ = std::fs::remove_file(&path);
}
