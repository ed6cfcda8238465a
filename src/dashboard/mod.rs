//! Status server for operators and Prometheus
//!
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /api/status`: JSON summary of the last completed cycle
//! - `GET /healthz`: liveness

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::cycle::CycleSummary;
use crate::metrics;

/// Last cycle outcome, written by the polling loop and read by the server
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusInner>>,
}

#[derive(Default)]
struct StatusInner {
    last: Option<CycleSummary>,
    last_error: Option<String>,
    cycles: u64,
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    cycles: u64,
    last_cycle: Option<&'a CycleSummary>,
    last_error: Option<&'a str>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, summary: CycleSummary) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.cycles += 1;
        inner.last = Some(summary);
        inner.last_error = None;
    }

    pub fn record_failure(&self, error: &dyn std::error::Error) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.cycles += 1;
        inner.last_error = Some(error.to_string());
    }

    pub fn last(&self) -> Option<CycleSummary> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last
            .clone()
    }

    fn to_json(&self) -> serde_json::Result<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_string(&StatusResponse {
            cycles: inner.cycles,
            last_cycle: inner.last.as_ref(),
            last_error: inner.last_error.as_deref(),
        })
    }
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Route one request
pub fn route(method: &Method, path: &str, board: &StatusBoard) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics::gather_text(),
        ),
        (&Method::GET, "/api/status") => match board.to_json() {
            Ok(json) => respond(StatusCode::OK, "application/json", json),
            Err(e) => {
                warn!(error = %e, "failed to encode status");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "encode error")
            }
        },
        (&Method::GET, "/healthz") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => {
            debug!(%method, path, "request to unknown endpoint");
            respond(StatusCode::NOT_FOUND, "text/plain", "Not found")
        }
    }
}

/// Accept connections on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, board: StatusBoard) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "status server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let board = board.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.method(), req.uri().path(), &board);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}
