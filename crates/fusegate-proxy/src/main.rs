use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing_subscriber::EnvFilter;

use fusegate_alarm::AlarmDispatcher;
use fusegate_proxy::admin::{build_admin_app, AdminState};
use fusegate_proxy::config::ProxyConfig;
use fusegate_proxy::proxy::build_proxy_app;
use fusegate_proxy::state::AppState;
use fusegate_rules::registry::RuleRegistry;
use fusegate_store::pool;
use fusegate_store::telemetry::TelemetryStore;
use fusegate_store::writer::{spawn_writers, WriteQueue};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  fusegate-proxy [config.toml]    Start the proxy (default: config/proxy.toml)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fusegate=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        arg => {
            let config_path = arg.unwrap_or("config/proxy.toml");
            run_proxy(config_path).await
        }
    }
}

async fn run_proxy(config_path: &str) -> Result<()> {
    let config = ProxyConfig::load(config_path)?;

    tracing::info!(
        listen_port = config.listen_port,
        admin_port = config.admin_port,
        upstream = %config.upstream,
        redis = %config.redis.redacted_url(),
        rule_dir = %config.rule_dir,
        expired_seconds = config.expired_seconds,
        "fusegate-proxy starting"
    );

    // Backend connection. Failing here is deliberate: an unconfigured or
    // unreachable backend at startup is an operator error, while a backend
    // that goes away later degrades to fail-open.
    let conn = pool::connect(&config.redis).await?;
    let store = TelemetryStore::new(conn, config.expired_seconds);

    let registry = Arc::new(RuleRegistry::load(Path::new(&config.rule_dir)));
    if registry.is_empty() {
        tracing::warn!(
            rule_dir = %config.rule_dir,
            "No rule documents loaded; the engine will pass all traffic"
        );
    }

    let writes = WriteQueue::new(config.telemetry.queue_capacity);
    let writer_handles = spawn_writers(writes.clone(), store.clone(), config.telemetry.workers);

    let (alarms, alarm_handle) = match &config.alarm.url {
        Some(url) => {
            let (dispatcher, worker) = AlarmDispatcher::new(
                url.clone(),
                Duration::from_millis(config.alarm.timeout_ms),
                config.alarm.queue_capacity,
            )?;
            (Some(Arc::new(dispatcher)), Some(tokio::spawn(worker.run())))
        }
        None => {
            tracing::info!("No alarm URL configured, alarm delivery disabled");
            (None, None)
        }
    };

    let upstream = reqwest::Client::builder().build()?;
    let upstream_base = config.upstream.trim_end_matches('/').to_string();

    let state = AppState {
        metrics: Arc::new(store.clone()),
        writes: writes.clone(),
        registry,
        alarms: alarms.clone(),
        upstream,
        upstream_base,
        config: Arc::new(config.clone()),
        start_time: Utc::now(),
    };

    // Proxy listener
    let proxy_addr: SocketAddr = format!("0.0.0.0:{}", config.listen_port).parse()?;
    let proxy_app = build_proxy_app(state);
    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    let proxy_server = axum::serve(
        proxy_listener,
        proxy_app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    // Admin listener, loopback only
    let admin_addr: SocketAddr = format!("127.0.0.1:{}", config.admin_port).parse()?;
    let admin_app = build_admin_app(AdminState {
        store: store.clone(),
        writes,
        alarms,
        expired_seconds: config.expired_seconds,
        start_time: Utc::now(),
    });
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;
    let admin_server = axum::serve(admin_listener, admin_app);

    // In-process expiry sweeper. The admin endpoint exists for external
    // schedulers; this interval keeps retention bounded without one.
    let sweep_store = store.clone();
    let expired_seconds = config.expired_seconds;
    let sweeper_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs((expired_seconds / 2).max(1)));
        loop {
            tick.tick().await;
            match sweep_store.sweep(expired_seconds).await {
                Ok(report) => {
                    for line in report.lines() {
                        tracing::info!("{line}");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Periodic sweep failed"),
            }
        }
    });

    tracing::info!(proxy = %proxy_addr, admin = %admin_addr, "Proxy started");

    tokio::select! {
        result = proxy_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Proxy server error");
            }
        }
        result = admin_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    sweeper_handle.abort();
    for handle in writer_handles {
        handle.abort();
    }
    if let Some(handle) = alarm_handle {
        handle.abort();
    }
    tracing::info!("Proxy stopped");

    Ok(())
}
