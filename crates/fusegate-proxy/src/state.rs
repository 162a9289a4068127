use std::sync::Arc;

use chrono::{DateTime, Utc};

use fusegate_alarm::AlarmDispatcher;
use fusegate_rules::registry::RuleRegistry;
use fusegate_store::writer::WriteQueue;
use fusegate_store::MetricSource;

use crate::config::ProxyConfig;

/// Shared state of the proxy data path.
///
/// Everything here is read-only after startup or internally synchronized,
/// so the state clones freely into every request worker.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<dyn MetricSource>,
    pub writes: Arc<WriteQueue>,
    pub registry: Arc<RuleRegistry>,
    pub alarms: Option<Arc<AlarmDispatcher>>,
    /// Client used to forward requests upstream.
    pub upstream: reqwest::Client,
    /// Upstream base URL without a trailing slash.
    pub upstream_base: String,
    pub config: Arc<ProxyConfig>,
    pub start_time: DateTime<Utc>,
}
