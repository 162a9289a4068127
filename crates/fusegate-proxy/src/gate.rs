use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use fusegate_common::clock;
use fusegate_common::command::command_key;
use fusegate_common::types::AlarmPayload;
use fusegate_rules::evaluator::{Evaluator, RateEvaluator, Trigger};
use fusegate_rules::{resolve_rules, Resolution};
use fusegate_store::writer::WriteTask;

use crate::context::RequestContext;
use crate::state::AppState;

/// Device identity required by the rate limiter.
pub const DEVICE_HEADER: &str = "x-device-no";
/// Per-request rule overrides, one header per evaluator.
pub const FUSE_RULES_HEADER: &str = "x-fuse-rules";
pub const ALARM_RULES_HEADER: &str = "x-alarm-rules";
pub const RATE_RULES_HEADER: &str = "x-rate-rules";

/// Seconds advertised in `Retry-After` when the circuit is open.
const RETRY_AFTER_SECS: u64 = 5;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn reject(status: StatusCode, body: &'static str, retry_after_secs: Option<u64>) -> Response {
    let mut response = (status, body).into_response();
    if let Some(secs) = retry_after_secs {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

fn alarm_payload(command: &str, client_ip: &str, trigger: &Trigger) -> AlarmPayload {
    AlarmPayload {
        feature: trigger.rule.feature.to_string(),
        duration: trigger.rule.duration,
        threshold: trigger.rule.threshold,
        probability: trigger.rule.probability,
        command: command.to_string(),
        actual_value: trigger.actual_value,
        client_ip: client_ip.to_string(),
        trigger_time: Utc::now().to_rfc3339(),
    }
}

/// Per-device access-rate gate.
///
/// A command whose rate rule list is the ignore sentinel skips both
/// evaluation and hit recording. Otherwise the device header is mandatory,
/// the rules are evaluated over the device's hit windows, and a passing
/// request enqueues its own hit afterwards, so evaluation never counts the
/// current request.
pub async fn rate_limit_gate(
    state: &AppState,
    headers: &HeaderMap,
    ctx: &RequestContext,
) -> Option<Response> {
    if !state.config.rate_limit.enabled {
        return None;
    }
    let (command, cmd_key) = match (&ctx.command, &ctx.command_key) {
        (Some(command), Some(cmd_key)) => (command.as_str(), cmd_key.as_str()),
        _ => return None,
    };

    let resolution = resolve_rules(
        &state.registry,
        &state.config.rate_limit.rules,
        command,
        header_str(headers, RATE_RULES_HEADER),
    );
    if resolution.is_ignored() {
        return None;
    }

    let Some(device) = header_str(headers, DEVICE_HEADER).filter(|d| !d.is_empty()) else {
        tracing::warn!(command, "Request without device header rejected");
        return Some(reject(
            StatusCode::TOO_MANY_REQUESTS,
            "missing x-device-no header\n",
            None,
        ));
    };
    let device_key = command_key(device);

    if let Resolution::Rules(rules) = &resolution {
        let mut evaluator = RateEvaluator::new(state.metrics.as_ref(), &device_key, cmd_key);
        if let Some(trigger) = evaluator.fuse(rules).await {
            tracing::warn!(
                command,
                device = %device_key,
                feature = %trigger.rule.feature,
                actual = trigger.actual_value,
                threshold = trigger.rule.threshold,
                "Rate limit fused request"
            );
            return Some(reject(StatusCode::TOO_MANY_REQUESTS, "rate limited\n", None));
        }
    }

    state.writes.push(WriteTask::DeviceHit {
        device_key,
        command_key: cmd_key.to_string(),
    });
    None
}

/// Third-party circuit breaker gate.
///
/// Alarm and fuse rule lists resolve and evaluate independently, but share
/// one evaluator so both observe the same memoized window values. Alarm
/// triggers are fire-and-forget; only a fuse trigger short-circuits the
/// request, with 503 and a retry hint.
pub async fn breaker_gate(
    state: &AppState,
    headers: &HeaderMap,
    ctx: &RequestContext,
) -> Option<Response> {
    if !state.config.breaker.enabled {
        return None;
    }
    let (command, cmd_key) = match (&ctx.command, &ctx.command_key) {
        (Some(command), Some(cmd_key)) => (command.as_str(), cmd_key.as_str()),
        _ => return None,
    };

    let alarm_resolution = resolve_rules(
        &state.registry,
        &state.config.breaker.alarm_rules,
        command,
        header_str(headers, ALARM_RULES_HEADER),
    );
    let fuse_resolution = resolve_rules(
        &state.registry,
        &state.config.breaker.fuse_rules,
        command,
        header_str(headers, FUSE_RULES_HEADER),
    );

    let mut evaluator = Evaluator::new(state.metrics.as_ref(), cmd_key, clock::now_seconds());

    if let (Resolution::Rules(rules), Some(alarms)) = (&alarm_resolution, &state.alarms) {
        for trigger in evaluator.alarms(rules).await {
            tracing::info!(
                command,
                feature = %trigger.rule.feature,
                actual = trigger.actual_value,
                threshold = trigger.rule.threshold,
                "Alarm rule triggered"
            );
            alarms.enqueue(alarm_payload(command, &ctx.client_ip, &trigger));
        }
    }

    if let Resolution::Rules(rules) = &fuse_resolution {
        if let Some(trigger) = evaluator.fuse(rules).await {
            tracing::warn!(
                command,
                feature = %trigger.rule.feature,
                actual = trigger.actual_value,
                threshold = trigger.rule.threshold,
                "Circuit fused request"
            );
            return Some(reject(
                StatusCode::SERVICE_UNAVAILABLE,
                "circuit open\n",
                Some(RETRY_AFTER_SECS),
            ));
        }
    }

    None
}
