//! Prometheus metrics HTTP server.

use crate::REGISTRY;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::Encoder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response")
}

/// Handle incoming HTTP requests.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => {
            let encoder = prometheus::TextEncoder::new();
            let metric_families = REGISTRY.gather();

            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                error!("failed to encode metrics: {}", e);
                return Ok(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to encode metrics",
                ));
            }

            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", encoder.format_type())
                .body(Full::new(Bytes::from(buffer)))
                .expect("metrics response"))
        }
        "/health" => Ok(text_response(StatusCode::OK, "OK")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Run the metrics HTTP server until `shutdown` is notified.
pub async fn start_metrics_server(
    addr: SocketAddr,
    shutdown: Arc<Notify>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let conn = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.notified() => {
                info!("metrics server shutting down");
                return Ok(());
            }
        };

        let stream = match conn {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!("failed to accept metrics connection: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("error serving metrics connection: {}", e);
            }
        });
    }
}

/// Start the metrics server in the background.
///
/// Returns the shutdown handle and the join handle of the server task.
pub fn spawn_metrics_server(addr: SocketAddr) -> (Arc<Notify>, tokio::task::JoinHandle<()>) {
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    let handle = tokio::spawn(async move {
        if let Err(e) = start_metrics_server(addr, signal).await {
            error!("metrics server error: {}", e);
        }
    });
    (shutdown, handle)
}
