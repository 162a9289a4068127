//! Sliding-window telemetry over Redis sorted sets.
//!
//! Per-command event streams and per-second global counters share one
//! multiplexed backend connection ([`pool`]). The request path only ever
//! reads through the [`MetricSource`] trait and writes through the bounded
//! [`writer::WriteQueue`]; neither can raise into the caller, and the
//! engine fails open when the backend is away.

pub mod error;
pub mod pool;
pub mod telemetry;
pub mod writer;


use async_trait::async_trait;

use fusegate_common::types::{DeviceHits, GlobalStats, WindowStats};

pub use error::{Result, StoreError};

/// Read access to the recent-history windows the rule evaluator consumes.
///
/// Implementations must be safe to share across request workers. The
/// production implementation is [`telemetry::TelemetryStore`]; tests use
/// in-memory fakes.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Aggregates the event streams of one command over the trailing
    /// `duration_s` seconds.
    async fn command_window(&self, command_key: &str, duration_s: u64) -> Result<WindowStats>;

    /// Sums the per-second global counters over `[now_s - duration_s,
    /// now_s]`: `duration_s + 1` buckets, inclusive on both ends.
    async fn global_window(&self, now_s: i64, duration_s: u64) -> Result<GlobalStats>;

    /// Counts recent hits for a device, both for one command and across
    /// all of the device's non-ignored commands.
    async fn device_hits(
        &self,
        device_key: &str,
        command_key: &str,
        duration_s: u64,
    ) -> Result<DeviceHits>;
}
