use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use rand::Rng;
use std::time::Instant;

/// One random u64, zero-padded hex. Unique enough to grep a request's two
/// log lines back together.
fn generate_trace_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Wraps `text` in an ANSI SGR color sequence.
fn paint(sgr: u8, text: impl std::fmt::Display) -> String {
    format!("\x1b[{sgr}m{text}\x1b[0m")
}

const GREEN: u8 = 32;
const YELLOW: u8 = 33;
const RED: u8 = 31;
const CYAN: u8 = 36;
const GRAY: u8 = 90;

/// Read-only methods print green, mutating ones yellow, the rest cyan.
fn method_sgr(method: &axum::http::Method) -> u8 {
    match method.as_str() {
        "GET" | "HEAD" | "OPTIONS" => GREEN,
        "POST" | "PUT" | "PATCH" | "DELETE" => YELLOW,
        _ => CYAN,
    }
}

/// Request/response logging middleware.
///
/// Unlike an API server, a proxy must not buffer bodies to log them, so
/// only the request line, status, and latency are recorded, tagged with a
/// trace id that is echoed back in `X-Trace-Id`.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path();
    let query = uri.query().unwrap_or("");

    let url = if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    };

    println!(
        "{} {} [{trace_id}] {} {url}",
        paint(GRAY, now_str()),
        paint(CYAN, "-->"),
        paint(method_sgr(&method), &method),
    );

    let start = Instant::now();
    let mut response = next.run(req).await;

    let status = response.status();
    let status_sgr = if status.is_success() {
        GREEN
    } else if status.is_client_error() {
        YELLOW
    } else {
        RED
    };

    // Latency buckets: quiet below 200ms, yellow up to a second, red above.
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let elapsed_sgr = if elapsed_ms < 200.0 {
        GREEN
    } else if elapsed_ms < 1000.0 {
        YELLOW
    } else {
        RED
    };
    let elapsed_str = if elapsed_ms < 1000.0 {
        format!("{elapsed_ms:.1}ms")
    } else {
        format!("{:.2}s", elapsed_ms / 1000.0)
    };

    println!(
        "{} {} [{trace_id}] {} {}",
        paint(GRAY, now_str()),
        paint(status_sgr, "<--"),
        paint(status_sgr, status),
        paint(elapsed_sgr, elapsed_str),
    );

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", value);
    }

    response
}
