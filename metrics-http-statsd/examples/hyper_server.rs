use std::convert::Infallible;

use http_body_util::Full;
use hyper::{body::Bytes, body::Incoming, server::conn::http1::Builder as HyperHttpBuilder, Request, Response, StatusCode};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use metrics_http_statsd::{parse_tag, Config, RequestStats, StatsdBuilder, StatsdLayer};
use tokio::net::TcpListener;
use tower::{service_fn, Layer as _};
use tracing::{info, warn};

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (key, status) = match req.uri().path() {
        "/" => ("index", StatusCode::OK),
        "/health" => ("health", StatusCode::OK),
        _ => ("not_found", StatusCode::NOT_FOUND),
    };

    if let Some(stats) = RequestStats::from_extensions(req.extensions()) {
        stats.set("statsdKey", key);
        stats.push_tag(parse_tag(&format!("method:{}", req.method())));
    }

    let mut response = Response::new(Full::new(Bytes::from(format!("{key}\n"))));
    *response.status_mut() = status;
    Ok(response)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::default()
        .with_host_and_port("127.0.0.1", 8125)
        .with_statsd_options(
            StatsdBuilder::default()
                .with_prefix("example")
                .with_error_handler(|e| warn!(error = %e, "Failed to send request metric.")),
        );
    let layer = StatsdLayer::new(config).expect("failed to build request instrumentation");

    let listener = TcpListener::bind("127.0.0.1:3000").await.expect("failed to bind listener");
    info!("Listening on http://127.0.0.1:3000.");

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("Error accepting connection. Ignoring request. Error: {:?}", e);
                continue;
            }
        };

        let service = TowerToHyperService::new(layer.layer(service_fn(handle)));
        tokio::task::spawn(async move {
            if let Err(err) = HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service).await {
                warn!("Error serving connection. Error: {:?}", err);
            }
        });
    }
}
