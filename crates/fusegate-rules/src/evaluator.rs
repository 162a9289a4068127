use std::collections::HashMap;

use rand::Rng;

use fusegate_common::types::{DeviceHits, GlobalStats, WindowStats};
use fusegate_store::MetricSource;

use crate::{Rule, Scope};

/// A rule that crossed its threshold and survived the probability gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub rule: Rule,
    pub actual_value: f64,
}

/// Bernoulli filter applied after the threshold comparison. The draw is
/// independent per rule per request; 100 and 0 short-circuit so those
/// common configurations are deterministic.
fn passes_gate(probability: f64) -> bool {
    if probability >= 100.0 {
        return true;
    }
    if probability <= 0.0 {
        return false;
    }
    rand::thread_rng().gen::<f64>() <= probability / 100.0
}

/// Evaluates breaker rule lists for one request.
///
/// Window reads are memoized per `(scope, duration)`, so one evaluation
/// issues at most one backend round-trip per distinct window and the alarm
/// and fuse passes observe identical values. A backend error degrades to
/// the default (empty) statistics: no rule fires and the request passes,
/// since the engine must not become the outage it guards against.
pub struct Evaluator<'a> {
    source: &'a dyn MetricSource,
    command_key: &'a str,
    now_seconds: i64,
    command_windows: HashMap<u64, WindowStats>,
    global_windows: HashMap<u64, GlobalStats>,
}

impl<'a> Evaluator<'a> {
    pub fn new(source: &'a dyn MetricSource, command_key: &'a str, now_seconds: i64) -> Self {
        Self {
            source,
            command_key,
            now_seconds,
            command_windows: HashMap::new(),
            global_windows: HashMap::new(),
        }
    }

    async fn actual_value(&mut self, rule: &Rule) -> f64 {
        match rule.feature.scope() {
            Scope::PerCommand => {
                if !self.command_windows.contains_key(&rule.duration) {
                    let stats = self
                        .source
                        .command_window(self.command_key, rule.duration)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(
                                command_key = %self.command_key,
                                duration = rule.duration,
                                error = %e,
                                "Window read failed, evaluating with empty stats"
                            );
                            WindowStats::default()
                        });
                    self.command_windows.insert(rule.duration, stats);
                }
                rule.feature.from_window(&self.command_windows[&rule.duration])
            }
            Scope::Global => {
                if !self.global_windows.contains_key(&rule.duration) {
                    let stats = self
                        .source
                        .global_window(self.now_seconds, rule.duration)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(
                                duration = rule.duration,
                                error = %e,
                                "Global window read failed, evaluating with empty stats"
                            );
                            GlobalStats::default()
                        });
                    self.global_windows.insert(rule.duration, stats);
                }
                rule.feature.from_global(&self.global_windows[&rule.duration])
            }
            Scope::Device => {
                tracing::warn!(
                    feature = %rule.feature,
                    "Device feature in a breaker rule list, treating as 0"
                );
                0.0
            }
        }
    }

    /// Alarm pass: every rule is evaluated; all triggers are returned.
    pub async fn alarms(&mut self, rules: &[Rule]) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        for rule in rules {
            let actual_value = self.actual_value(rule).await;
            if actual_value >= rule.threshold && passes_gate(rule.probability) {
                triggers.push(Trigger {
                    rule: rule.clone(),
                    actual_value,
                });
            }
        }
        triggers
    }

    /// Fuse pass: stops at the first trigger.
    pub async fn fuse(&mut self, rules: &[Rule]) -> Option<Trigger> {
        for rule in rules {
            let actual_value = self.actual_value(rule).await;
            if actual_value >= rule.threshold && passes_gate(rule.probability) {
                return Some(Trigger {
                    rule: rule.clone(),
                    actual_value,
                });
            }
        }
        None
    }
}

/// Evaluates rate-limit rule lists over the device hit namespace, with the
/// same memoization and gating as [`Evaluator`].
pub struct RateEvaluator<'a> {
    source: &'a dyn MetricSource,
    device_key: &'a str,
    command_key: &'a str,
    hit_windows: HashMap<u64, DeviceHits>,
}

impl<'a> RateEvaluator<'a> {
    pub fn new(source: &'a dyn MetricSource, device_key: &'a str, command_key: &'a str) -> Self {
        Self {
            source,
            device_key,
            command_key,
            hit_windows: HashMap::new(),
        }
    }

    async fn actual_value(&mut self, rule: &Rule) -> f64 {
        if rule.feature.scope() != Scope::Device {
            tracing::warn!(
                feature = %rule.feature,
                "Non-device feature in a rate rule list, treating as 0"
            );
            return 0.0;
        }
        if !self.hit_windows.contains_key(&rule.duration) {
            let hits = self
                .source
                .device_hits(self.device_key, self.command_key, rule.duration)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        device_key = %self.device_key,
                        duration = rule.duration,
                        error = %e,
                        "Device window read failed, evaluating with empty hits"
                    );
                    DeviceHits::default()
                });
            self.hit_windows.insert(rule.duration, hits);
        }
        rule.feature.from_hits(&self.hit_windows[&rule.duration])
    }

    /// Rate rules only fuse; there is no alarm pass for the limiter.
    pub async fn fuse(&mut self, rules: &[Rule]) -> Option<Trigger> {
        for rule in rules {
            let actual_value = self.actual_value(rule).await;
            if actual_value >= rule.threshold && passes_gate(rule.probability) {
                return Some(Trigger {
                    rule: rule.clone(),
                    actual_value,
                });
            }
        }
        None
    }
}
