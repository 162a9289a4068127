use std::str::FromStr;

use fusegate_common::types::{DeviceHits, GlobalStats, WindowStats};

use crate::RuleError;

/// Which window a feature is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The command's own event streams.
    PerCommand,
    /// The per-second global counters.
    Global,
    /// The device hit sets of the rate limiter.
    Device,
}

/// Metric kind a rule thresholds on. Rule documents and override headers
/// name these in snake case; a `global_` prefix selects the global window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum Feature {
    AvgExecTime,
    BizFailCount,
    BizFailPercent,
    SysFailCount,
    SysFailPercent,
    FailCount,
    FailPercent,
    GlobalBizFailCount,
    GlobalBizFailPercent,
    GlobalSysFailCount,
    GlobalSysFailPercent,
    GlobalFailCount,
    GlobalFailPercent,
    SingleCommandHits,
    TotalCommandHits,
}

impl Feature {
    pub fn scope(self) -> Scope {
        match self {
            Feature::AvgExecTime
            | Feature::BizFailCount
            | Feature::BizFailPercent
            | Feature::SysFailCount
            | Feature::SysFailPercent
            | Feature::FailCount
            | Feature::FailPercent => Scope::PerCommand,
            Feature::GlobalBizFailCount
            | Feature::GlobalBizFailPercent
            | Feature::GlobalSysFailCount
            | Feature::GlobalSysFailPercent
            | Feature::GlobalFailCount
            | Feature::GlobalFailPercent => Scope::Global,
            Feature::SingleCommandHits | Feature::TotalCommandHits => Scope::Device,
        }
    }

    /// Value of a per-command feature over one window.
    pub fn from_window(self, stats: &WindowStats) -> f64 {
        let total = stats.total_exec_count as f64;
        let biz = stats.biz_fail_count as f64;
        let sys = stats.sys_fail_count as f64;
        match self {
            Feature::AvgExecTime => stats.avg_exec_time_ms as f64,
            Feature::BizFailCount => biz,
            Feature::BizFailPercent => 100.0 * biz / total,
            Feature::SysFailCount => sys,
            Feature::SysFailPercent => 100.0 * sys / total,
            Feature::FailCount => biz + sys,
            Feature::FailPercent => 100.0 * (biz + sys) / total,
            _ => 0.0,
        }
    }

    /// Value of a `global_` feature over the counter sums.
    pub fn from_global(self, stats: &GlobalStats) -> f64 {
        let total = stats.exec_count as f64;
        let biz = stats.biz_fail_count as f64;
        let sys = stats.sys_fail_count as f64;
        match self {
            Feature::GlobalBizFailCount => biz,
            Feature::GlobalBizFailPercent => 100.0 * biz / total,
            Feature::GlobalSysFailCount => sys,
            Feature::GlobalSysFailPercent => 100.0 * sys / total,
            Feature::GlobalFailCount => biz + sys,
            Feature::GlobalFailPercent => 100.0 * (biz + sys) / total,
            _ => 0.0,
        }
    }

    /// Value of a rate-limiter feature over the device hit counts.
    pub fn from_hits(self, hits: &DeviceHits) -> f64 {
        match self {
            Feature::SingleCommandHits => hits.single_command as f64,
            Feature::TotalCommandHits => hits.total_command as f64,
            _ => 0.0,
        }
    }
}

impl FromStr for Feature {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg_exec_time" => Ok(Feature::AvgExecTime),
            "biz_fail_count" => Ok(Feature::BizFailCount),
            "biz_fail_percent" => Ok(Feature::BizFailPercent),
            "sys_fail_count" => Ok(Feature::SysFailCount),
            "sys_fail_percent" => Ok(Feature::SysFailPercent),
            "fail_count" => Ok(Feature::FailCount),
            "fail_percent" => Ok(Feature::FailPercent),
            "global_biz_fail_count" => Ok(Feature::GlobalBizFailCount),
            "global_biz_fail_percent" => Ok(Feature::GlobalBizFailPercent),
            "global_sys_fail_count" => Ok(Feature::GlobalSysFailCount),
            "global_sys_fail_percent" => Ok(Feature::GlobalSysFailPercent),
            "global_fail_count" => Ok(Feature::GlobalFailCount),
            "global_fail_percent" => Ok(Feature::GlobalFailPercent),
            "single_command_hits" => Ok(Feature::SingleCommandHits),
            "total_command_hits" => Ok(Feature::TotalCommandHits),
            _ => Err(RuleError::UnknownFeature(s.to_string())),
        }
    }
}

impl TryFrom<String> for Feature {
    type Error = RuleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Feature::AvgExecTime => "avg_exec_time",
            Feature::BizFailCount => "biz_fail_count",
            Feature::BizFailPercent => "biz_fail_percent",
            Feature::SysFailCount => "sys_fail_count",
            Feature::SysFailPercent => "sys_fail_percent",
            Feature::FailCount => "fail_count",
            Feature::FailPercent => "fail_percent",
            Feature::GlobalBizFailCount => "global_biz_fail_count",
            Feature::GlobalBizFailPercent => "global_biz_fail_percent",
            Feature::GlobalSysFailCount => "global_sys_fail_count",
            Feature::GlobalSysFailPercent => "global_sys_fail_percent",
            Feature::GlobalFailCount => "global_fail_count",
            Feature::GlobalFailPercent => "global_fail_percent",
            Feature::SingleCommandHits => "single_command_hits",
            Feature::TotalCommandHits => "total_command_hits",
        };
        write!(f, "{name}")
    }
}
