use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use fusegate_common::clock;
use fusegate_common::types::{DeviceHits, ExecStatus, GlobalStats, WindowStats};

use crate::error::Result;
use crate::MetricSource;

/// Registry of command keys that have recorded events, swept periodically.
const COMMAND_REGISTRY_KEY: &str = "apistatus_last_exec_time";
/// Registry of device hit-set keys, swept alongside the command sets.
const HIT_REGISTRY_KEY: &str = "apiaccess_last_hit";

/// Keys are removed from the registries and trimmed in batches of this many
/// commands per pipelined round-trip.
const SWEEP_BATCH: usize = 25;

fn exec_time_key(command_key: &str) -> String {
    format!("apistatus_exec_time_{command_key}")
}

fn exec_status_key(command_key: &str) -> String {
    format!("apistatus_exec_status_{command_key}")
}

fn global_exec_key(second: i64) -> String {
    format!("apistatus_global_exec_count_{second}")
}

fn global_bizfail_key(second: i64) -> String {
    format!("apistatus_global_bizfail_count_{second}")
}

fn global_sysfail_key(second: i64) -> String {
    format!("apistatus_global_sysfail_count_{second}")
}

fn single_hits_key(device_key: &str, command_key: &str) -> String {
    format!("apiaccess_single_{device_key}_{command_key}")
}

fn total_hits_key(device_key: &str) -> String {
    format!("apiaccess_total_{device_key}")
}

/// Parses an event member of the form `"<offset_µs>_<value>"`.
///
/// The offset prefix exists only to keep members unique when two recorders
/// land on the same score; the value is everything after the first `_`.
/// A member without `_` is treated as a bare value. Anything unparsable is
/// skipped by callers.
fn member_value(member: &str) -> Option<i64> {
    match member.split_once('_') {
        Some((_, suffix)) => suffix.parse().ok(),
        None => member.parse().ok(),
    }
}

/// Folds the raw members of one window read into [`WindowStats`].
pub(crate) fn aggregate_window(times: &[String], statuses: &[String]) -> WindowStats {
    let mut time_sum: i64 = 0;
    let mut time_count: i64 = 0;
    for member in times {
        if let Some(value) = member_value(member) {
            time_sum += value;
            time_count += 1;
        }
    }

    let mut biz_fail_count = 0u64;
    let mut sys_fail_count = 0u64;
    let mut total_exec_count = 0u64;
    for member in statuses {
        let Some(digit) = member_value(member) else {
            continue;
        };
        total_exec_count += 1;
        match ExecStatus::from_digit(digit) {
            Some(ExecStatus::BizFail) => biz_fail_count += 1,
            Some(ExecStatus::SysFail) => sys_fail_count += 1,
            _ => {}
        }
    }

    WindowStats {
        avg_exec_time_ms: if time_count > 0 { time_sum / time_count } else { 0 },
        biz_fail_count,
        sys_fail_count,
        // Percent metrics divide by this; an empty window reads as 0%.
        total_exec_count: total_exec_count.max(1),
    }
}

/// Telemetry store over Redis sorted sets.
///
/// Per-command events live in two sorted sets scored by the epoch offset;
/// global traffic lives in per-second integer counters with a TTL. All
/// writes and reads are single pipelined round-trips.
#[derive(Clone)]
pub struct TelemetryStore {
    conn: ConnectionManager,
    expired_seconds: u64,
}

impl TelemetryStore {
    pub fn new(conn: ConnectionManager, expired_seconds: u64) -> Self {
        Self {
            conn,
            expired_seconds,
        }
    }

    /// Records one upstream call outcome. One pipelined batch: the command
    /// registry, both event sets, and the global per-second counters.
    pub async fn record_event(
        &self,
        command_key: &str,
        exec_time_ms: i64,
        status: ExecStatus,
    ) -> Result<()> {
        let offset = clock::now_micros();
        let second = clock::now_seconds();
        let ttl = self.expired_seconds as i64;

        let mut pipe = redis::pipe();
        pipe.zadd(COMMAND_REGISTRY_KEY, command_key, offset).ignore();
        pipe.zadd(
            exec_time_key(command_key),
            format!("{offset}_{exec_time_ms}"),
            offset,
        )
        .ignore();
        pipe.zadd(
            exec_status_key(command_key),
            format!("{offset}_{}", status.as_digit()),
            offset,
        )
        .ignore();
        pipe.incr(global_exec_key(second), 1).ignore();
        pipe.expire(global_exec_key(second), ttl).ignore();
        match status {
            ExecStatus::BizFail => {
                pipe.incr(global_bizfail_key(second), 1).ignore();
                pipe.expire(global_bizfail_key(second), ttl).ignore();
            }
            ExecStatus::SysFail => {
                pipe.incr(global_sysfail_key(second), 1).ignore();
                pipe.expire(global_sysfail_key(second), ttl).ignore();
            }
            ExecStatus::Success => {}
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Records one device access. Both hit sets plus the hit registry, so
    /// the sweeper can find the sets later.
    pub async fn record_device_hit(&self, device_key: &str, command_key: &str) -> Result<()> {
        let offset = clock::now_micros();
        let single = single_hits_key(device_key, command_key);
        let total = total_hits_key(device_key);
        let member = format!("{offset}_1");

        let mut pipe = redis::pipe();
        pipe.zadd(&single, &member, offset).ignore();
        pipe.zadd(&total, &member, offset).ignore();
        pipe.zadd(HIT_REGISTRY_KEY, &single, offset).ignore();
        pipe.zadd(HIT_REGISTRY_KEY, &total, offset).ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Deletes events older than `expired_seconds` and reports what it did.
    ///
    /// The registries are read in full, trimmed, and then the per-command
    /// and per-device sets are trimmed in pipelined batches. Per-second
    /// global counters expire on their own TTL and need no sweeping.
    pub async fn sweep(&self, expired_seconds: u64) -> Result<String> {
        let started_at = Utc::now();
        let expired_offset = clock::now_micros() - expired_seconds as i64 * 1_000_000;
        let mut conn = self.conn.clone();

        let command_keys: Vec<String> = conn.zrange(COMMAND_REGISTRY_KEY, 0, -1).await?;
        let hit_set_keys: Vec<String> = conn.zrange(HIT_REGISTRY_KEY, 0, -1).await?;

        redis::pipe()
            .zrembyscore(COMMAND_REGISTRY_KEY, 0, expired_offset)
            .ignore()
            .zrembyscore(HIT_REGISTRY_KEY, 0, expired_offset)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for batch in command_keys.chunks(SWEEP_BATCH) {
            let mut pipe = redis::pipe();
            for command_key in batch {
                pipe.zrembyscore(exec_time_key(command_key), 0, expired_offset)
                    .ignore();
                pipe.zrembyscore(exec_status_key(command_key), 0, expired_offset)
                    .ignore();
            }
            match pipe.query_async::<()>(&mut conn).await {
                Ok(()) => succeeded += batch.len(),
                Err(e) => {
                    failed += batch.len();
                    tracing::warn!(error = %e, batch = batch.len(), "Sweep batch failed");
                }
            }
        }

        for batch in hit_set_keys.chunks(SWEEP_BATCH) {
            let mut pipe = redis::pipe();
            for key in batch {
                pipe.zrembyscore(key, 0, expired_offset).ignore();
            }
            match pipe.query_async::<()>(&mut conn).await {
                Ok(()) => succeeded += batch.len(),
                Err(e) => {
                    failed += batch.len();
                    tracing::warn!(error = %e, batch = batch.len(), "Sweep batch failed");
                }
            }
        }

        let mut report = String::new();
        let _ = writeln!(report, "sweep started at {}", started_at.to_rfc3339());
        let _ = writeln!(
            report,
            "scheduled {} command sets and {} device sets, cutoff offset {}",
            command_keys.len(),
            hit_set_keys.len(),
            expired_offset
        );
        let _ = writeln!(report, "trimmed {succeeded} sets, {failed} failed");
        let _ = writeln!(report, "sweep finished at {}", Utc::now().to_rfc3339());
        Ok(report)
    }
}

#[async_trait]
impl MetricSource for TelemetryStore {
    async fn command_window(&self, command_key: &str, duration_s: u64) -> Result<WindowStats> {
        let end = clock::now_micros();
        let start = end - duration_s as i64 * 1_000_000;

        let mut conn = self.conn.clone();
        let (times, statuses): (Vec<String>, Vec<String>) = redis::pipe()
            .zrangebyscore(exec_time_key(command_key), start, end)
            .zrangebyscore(exec_status_key(command_key), start, end)
            .query_async(&mut conn)
            .await?;

        Ok(aggregate_window(&times, &statuses))
    }

    async fn global_window(&self, now_s: i64, duration_s: u64) -> Result<GlobalStats> {
        let from = now_s - duration_s as i64;

        let mut pipe = redis::pipe();
        for second in from..=now_s {
            pipe.get(global_exec_key(second));
            pipe.get(global_bizfail_key(second));
            pipe.get(global_sysfail_key(second));
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<u64>> = pipe.query_async(&mut conn).await?;

        let mut stats = GlobalStats {
            exec_count: 0,
            biz_fail_count: 0,
            sys_fail_count: 0,
        };
        for bucket in values.chunks(3) {
            stats.exec_count += bucket.first().copied().flatten().unwrap_or(0);
            stats.biz_fail_count += bucket.get(1).copied().flatten().unwrap_or(0);
            stats.sys_fail_count += bucket.get(2).copied().flatten().unwrap_or(0);
        }
        stats.exec_count = stats.exec_count.max(1);
        Ok(stats)
    }

    async fn device_hits(
        &self,
        device_key: &str,
        command_key: &str,
        duration_s: u64,
    ) -> Result<DeviceHits> {
        let end = clock::now_micros();
        let start = end - duration_s as i64 * 1_000_000;

        let mut conn = self.conn.clone();
        let (single, total): (Vec<String>, Vec<String>) = redis::pipe()
            .zrangebyscore(single_hits_key(device_key, command_key), start, end)
            .zrangebyscore(total_hits_key(device_key), start, end)
            .query_async(&mut conn)
            .await?;

        Ok(DeviceHits {
            single_command: single.len() as u64,
            total_command: total.len() as u64,
        })
    }
}
