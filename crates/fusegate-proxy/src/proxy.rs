use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;

use fusegate_common::types::ExecStatus;
use fusegate_store::writer::WriteTask;

use crate::context::RequestContext;
use crate::gate;
use crate::logging;
use crate::state::AppState;

/// Business status header on upstream responses.
pub const RESPONSE_CODE_HEADER: &str = "x-response-code";

/// Headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn build_proxy_app(state: AppState) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(state)
        .layer(middleware::from_fn(logging::request_logging))
}

fn request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str();
        // Host and content-length are rewritten by the upstream client.
        if HOP_BY_HOP.contains(&lower) || lower == "host" || lower == "content-length" {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Classifies the upstream outcome and enqueues the telemetry write.
/// Ignorable requests (no command) record nothing.
fn record_outcome(
    state: &AppState,
    ctx: &RequestContext,
    http_status: u16,
    response_code: Option<&str>,
) {
    let Some(command_key) = &ctx.command_key else {
        return;
    };
    let status = ExecStatus::classify(http_status, response_code);
    state.writes.push(WriteTask::Event {
        command_key: command_key.clone(),
        exec_time_ms: ctx.elapsed_ms(),
        status,
    });
}

/// The proxy data path: classify, gate, forward, record.
///
/// The engine can only produce three request-visible outcomes: pass,
/// 429 from the rate limiter, 503 from the breaker. Everything else it
/// does is asynchronous and best-effort.
pub async fn forward(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());
    let ctx = RequestContext::new(&path, client_ip(req.headers(), addr));

    if !ctx.is_ignorable() {
        if let Some(response) = gate::rate_limit_gate(&state, req.headers(), &ctx).await {
            return response;
        }
        if let Some(response) = gate::breaker_gate(&state, req.headers(), &ctx).await {
            return response;
        }
    }

    let method = req.method().clone();
    let headers = request_headers(req.headers());
    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "unreadable request body\n").into_response();
        }
    };

    let mut url = format!("{}{}", state.upstream_base, path);
    if let Some(query) = &query {
        url.push('?');
        url.push_str(query);
    }

    let upstream_response = match state
        .upstream
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Upstream request failed");
            record_outcome(&state, &ctx, StatusCode::BAD_GATEWAY.as_u16(), None);
            return (StatusCode::BAD_GATEWAY, "upstream unreachable\n").into_response();
        }
    };

    let status = upstream_response.status();
    let response_code = upstream_response
        .headers()
        .get(RESPONSE_CODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    record_outcome(&state, &ctx, status.as_u16(), response_code.as_deref());

    let headers = response_headers(upstream_response.headers());
    let mut builder = Response::builder().status(status);
    if let Some(out_headers) = builder.headers_mut() {
        *out_headers = headers;
    }
    match builder.body(Body::from_stream(upstream_response.bytes_stream())) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to assemble proxied response");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
