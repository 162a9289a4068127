use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use chrono::Utc;
use tower::ServiceExt;

use fusegate_alarm::AlarmDispatcher;
use fusegate_common::types::{DeviceHits, ExecStatus, GlobalStats, WindowStats};
use fusegate_rules::registry::RuleRegistry;
use fusegate_rules::{Feature, Rule, RuleDocument};
use fusegate_store::writer::{WriteQueue, WriteTask};
use fusegate_store::{MetricSource, Result as StoreResult};

use crate::config::ProxyConfig;
use crate::proxy::build_proxy_app;
use crate::state::AppState;

struct FakeSource {
    window: WindowStats,
    hits: DeviceHits,
}

impl FakeSource {
    fn quiet() -> Self {
        Self {
            window: WindowStats::default(),
            hits: DeviceHits::default(),
        }
    }

    fn slow() -> Self {
        Self {
            window: WindowStats {
                avg_exec_time_ms: 600,
                biz_fail_count: 0,
                sys_fail_count: 0,
                total_exec_count: 10,
            },
            hits: DeviceHits::default(),
        }
    }
}

#[async_trait]
impl MetricSource for FakeSource {
    async fn command_window(&self, _command_key: &str, _duration_s: u64) -> StoreResult<WindowStats> {
        Ok(self.window)
    }

    async fn global_window(&self, _now_s: i64, _duration_s: u64) -> StoreResult<GlobalStats> {
        Ok(GlobalStats::default())
    }

    async fn device_hits(
        &self,
        _device_key: &str,
        _command_key: &str,
        _duration_s: u64,
    ) -> StoreResult<DeviceHits> {
        Ok(self.hits)
    }
}

fn rule(feature: Feature, duration: u64, threshold: f64, probability: f64) -> Rule {
    Rule {
        feature,
        duration,
        threshold,
        probability,
    }
}

fn test_config(upstream: &str, rate_limit_enabled: bool) -> ProxyConfig {
    let toml = format!(
        r#"
        upstream = "{upstream}"

        [redis]
        host = "127.0.0.1"

        [rate_limit]
        enabled = {rate_limit_enabled}
        "#
    );
    toml::from_str(&toml).unwrap()
}

struct TestHarness {
    app: Router,
    writes: Arc<WriteQueue>,
    alarms: Option<Arc<AlarmDispatcher>>,
}

fn build_harness(
    upstream: &str,
    rate_limit_enabled: bool,
    source: FakeSource,
    documents: HashMap<String, RuleDocument>,
    alarms: Option<Arc<AlarmDispatcher>>,
) -> TestHarness {
    let writes = WriteQueue::new(64);
    let state = AppState {
        metrics: Arc::new(source),
        writes: writes.clone(),
        registry: Arc::new(RuleRegistry::from_documents(documents)),
        alarms: alarms.clone(),
        upstream: reqwest::Client::new(),
        upstream_base: upstream.trim_end_matches('/').to_string(),
        config: Arc::new(test_config(upstream, rate_limit_enabled)),
        start_time: Utc::now(),
    };
    TestHarness {
        app: build_proxy_app(state),
        writes,
        alarms,
    }
}

/// Stub upstream: `/api/biz/...` answers 200 with a business failure code,
/// `/api/broken/...` answers 500, everything else 200 "hello".
async fn spawn_upstream() -> String {
    let app = Router::new().fallback(|req: Request| async move {
        let path = req.uri().path().to_string();
        if path.starts_with("/api/biz") {
            ([("x-response-code", "2")], "biz").into_response()
        } else if path.starts_with("/api/broken") {
            (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
        } else {
            "hello".into_response()
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut req = builder.body(Body::empty()).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 43210))));
    req
}

fn fuse_doc(rules: Vec<Rule>) -> HashMap<String, RuleDocument> {
    let mut documents = HashMap::new();
    documents.insert(
        "fuse_rules".to_string(),
        RuleDocument {
            global: rules,
            commands: HashMap::new(),
        },
    );
    documents
}

#[tokio::test]
async fn passes_through_and_records_success() {
    let upstream = spawn_upstream().await;
    let harness = build_harness(&upstream, false, FakeSource::quiet(), HashMap::new(), None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders/4711/items?x=1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"hello");

    match harness.writes.pop().await {
        WriteTask::Event {
            command_key,
            status,
            ..
        } => {
            assert_eq!(command_key, "api_orders_items");
            assert_eq!(status, ExecStatus::Success);
        }
        other => panic!("expected an event write, got {other:?}"),
    }
}

#[tokio::test]
async fn business_failure_header_is_recorded() {
    let upstream = spawn_upstream().await;
    let harness = build_harness(&upstream, false, FakeSource::quiet(), HashMap::new(), None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/biz/9", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // The business header passes through to the caller.
    assert_eq!(
        response.headers().get("x-response-code").unwrap(),
        "2"
    );

    match harness.writes.pop().await {
        WriteTask::Event { status, .. } => assert_eq!(status, ExecStatus::BizFail),
        other => panic!("expected an event write, got {other:?}"),
    }
}

#[tokio::test]
async fn upstream_500_is_recorded_as_sys_fail() {
    let upstream = spawn_upstream().await;
    let harness = build_harness(&upstream, false, FakeSource::quiet(), HashMap::new(), None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/broken/1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    match harness.writes.pop().await {
        WriteTask::Event { status, .. } => assert_eq!(status, ExecStatus::SysFail),
        other => panic!("expected an event write, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_upstream_yields_502_and_sys_fail() {
    // Nothing listens on port 1.
    let harness = build_harness(
        "http://127.0.0.1:1",
        false,
        FakeSource::quiet(),
        HashMap::new(),
        None,
    );

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    match harness.writes.pop().await {
        WriteTask::Event { status, .. } => assert_eq!(status, ExecStatus::SysFail),
        other => panic!("expected an event write, got {other:?}"),
    }
}

#[tokio::test]
async fn favicon_bypasses_the_engine() {
    let upstream = spawn_upstream().await;
    let harness = build_harness(&upstream, true, FakeSource::quiet(), HashMap::new(), None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/favicon.ico", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.writes.is_empty());
}

#[tokio::test]
async fn slow_window_fuses_with_503_and_retry_after() {
    let documents = fuse_doc(vec![rule(Feature::AvgExecTime, 60, 500.0, 100.0)]);
    let harness = build_harness(
        "http://127.0.0.1:1",
        false,
        FakeSource::slow(),
        documents,
        None,
    );

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders/4711/items", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get("retry-after").unwrap(), "5");
    // A fused request never reaches upstream and records nothing.
    assert!(harness.writes.is_empty());
}

#[tokio::test]
async fn zero_probability_rule_never_fuses() {
    let upstream = spawn_upstream().await;
    let documents = fuse_doc(vec![rule(Feature::AvgExecTime, 60, 500.0, 0.0)]);
    let harness = build_harness(&upstream, false, FakeSource::slow(), documents, None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn fuse_override_header_beats_the_registry() {
    let source = FakeSource {
        window: WindowStats {
            avg_exec_time_ms: 20,
            biz_fail_count: 0,
            sys_fail_count: 2,
            total_exec_count: 5,
        },
        hits: DeviceHits::default(),
    };
    // Empty registry: only the header can fuse this request.
    let harness = build_harness("http://127.0.0.1:1", false, source, HashMap::new(), None);

    let response = harness
        .app
        .clone()
        .oneshot(request(
            "/api/orders",
            &[("x-fuse-rules", "fail_count:30:1:100")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn alarm_triggers_never_change_the_outcome() {
    let upstream = spawn_upstream().await;
    let mut documents = HashMap::new();
    documents.insert(
        "alarm_rules".to_string(),
        RuleDocument {
            global: vec![rule(Feature::AvgExecTime, 60, 500.0, 100.0)],
            commands: HashMap::new(),
        },
    );
    let (dispatcher, _worker) = AlarmDispatcher::new(
        "http://127.0.0.1:1/alarm".into(),
        Duration::from_millis(500),
        1,
    )
    .unwrap();
    let alarms = Some(Arc::new(dispatcher));
    let harness = build_harness(&upstream, false, FakeSource::slow(), documents, alarms);

    for _ in 0..2 {
        let response = harness
            .app
            .clone()
            .oneshot(request("/api/orders", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Two alarms were enqueued into a capacity-1 queue with no worker
    // draining it, so exactly one overflowed.
    assert_eq!(harness.alarms.unwrap().dropped(), 1);
}

// ---- rate limiter ----

fn rate_doc(rules: Vec<Rule>, ignored_command: Option<&str>) -> HashMap<String, RuleDocument> {
    let mut commands = HashMap::new();
    if let Some(command) = ignored_command {
        commands.insert(command.to_string(), vec![]);
    }
    let mut documents = HashMap::new();
    documents.insert(
        "rate_rules".to_string(),
        RuleDocument {
            global: rules,
            commands,
        },
    );
    documents
}

#[tokio::test]
async fn missing_device_header_is_rejected() {
    let documents = rate_doc(vec![rule(Feature::SingleCommandHits, 60, 100.0, 100.0)], None);
    let harness = build_harness(
        "http://127.0.0.1:1",
        true,
        FakeSource::quiet(),
        documents,
        None,
    );

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(harness.writes.is_empty());
}

#[tokio::test]
async fn device_below_threshold_passes_and_records_a_hit() {
    let upstream = spawn_upstream().await;
    let documents = rate_doc(vec![rule(Feature::SingleCommandHits, 60, 100.0, 100.0)], None);
    let harness = build_harness(&upstream, true, FakeSource::quiet(), documents, None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders", &[("x-device-no", "dev-77")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    match harness.writes.pop().await {
        WriteTask::DeviceHit {
            device_key,
            command_key,
        } => {
            assert_eq!(device_key, "dev_77");
            assert_eq!(command_key, "api_orders");
        }
        other => panic!("expected a device hit, got {other:?}"),
    }
    match harness.writes.pop().await {
        WriteTask::Event { status, .. } => assert_eq!(status, ExecStatus::Success),
        other => panic!("expected an event write, got {other:?}"),
    }
}

#[tokio::test]
async fn device_at_threshold_is_rate_limited() {
    let source = FakeSource {
        window: WindowStats::default(),
        hits: DeviceHits {
            single_command: 100,
            total_command: 100,
        },
    };
    let documents = rate_doc(vec![rule(Feature::SingleCommandHits, 60, 100.0, 100.0)], None);
    let harness = build_harness("http://127.0.0.1:1", true, source, documents, None);

    let response = harness
        .app
        .clone()
        .oneshot(request("/api/orders", &[("x-device-no", "dev-77")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // A limited request records no hit.
    assert!(harness.writes.is_empty());
}

#[tokio::test]
async fn ignored_command_skips_rate_limiting_and_hit_recording() {
    let upstream = spawn_upstream().await;
    let documents = rate_doc(
        vec![rule(Feature::SingleCommandHits, 60, 0.0, 100.0)],
        Some("api/health"),
    );
    let harness = build_harness(&upstream, true, FakeSource::quiet(), documents, None);

    // No device header either: the ignore sentinel wins before the check.
    let response = harness
        .app
        .clone()
        .oneshot(request("/api/health", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Only the breaker-side event record remains, no device hit.
    match harness.writes.pop().await {
        WriteTask::Event { command_key, .. } => assert_eq!(command_key, "api_health"),
        other => panic!("expected an event write, got {other:?}"),
    }
    assert!(harness.writes.is_empty());
}
