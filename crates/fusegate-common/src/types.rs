use serde::{Deserialize, Serialize};

/// Logical outcome of one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStatus {
    Success = 1,
    BizFail = 2,
    SysFail = 3,
}

impl ExecStatus {
    /// Classifies an upstream response.
    ///
    /// Anything but HTTP 200 is a system failure. A 200 carrying an
    /// `x-response-code` header other than `1` is a business failure; a
    /// missing header counts as success.
    pub fn classify(http_status: u16, response_code: Option<&str>) -> Self {
        if http_status != 200 {
            return ExecStatus::SysFail;
        }
        match response_code {
            Some(code) if code != "1" => ExecStatus::BizFail,
            _ => ExecStatus::Success,
        }
    }

    /// The digit stored in event members.
    pub fn as_digit(self) -> u8 {
        self as u8
    }

    pub fn from_digit(digit: i64) -> Option<Self> {
        match digit {
            1 => Some(ExecStatus::Success),
            2 => Some(ExecStatus::BizFail),
            3 => Some(ExecStatus::SysFail),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecStatus::Success => write!(f, "success"),
            ExecStatus::BizFail => write!(f, "biz_fail"),
            ExecStatus::SysFail => write!(f, "sys_fail"),
        }
    }
}

/// Aggregate over one per-command sliding window.
///
/// `total_exec_count` is never zero: an empty window reports 1 so that the
/// percent metrics evaluate to 0 instead of dividing by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub avg_exec_time_ms: i64,
    pub biz_fail_count: u64,
    pub sys_fail_count: u64,
    pub total_exec_count: u64,
}

impl Default for WindowStats {
    fn default() -> Self {
        Self {
            avg_exec_time_ms: 0,
            biz_fail_count: 0,
            sys_fail_count: 0,
            total_exec_count: 1,
        }
    }
}

/// Aggregate over the per-second global counters. Same division-safety rule
/// as [`WindowStats`]: `exec_count` is floored at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStats {
    pub exec_count: u64,
    pub biz_fail_count: u64,
    pub sys_fail_count: u64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            exec_count: 1,
            biz_fail_count: 0,
            sys_fail_count: 0,
        }
    }
}

/// Hit counts for one device over a sliding window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceHits {
    /// Hits for this (device, command) pair.
    pub single_command: u64,
    /// Hits for this device across all non-ignored commands.
    pub total_command: u64,
}

/// Body of an alarm notification, JSON-encoded into the `msg` form field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub feature: String,
    pub duration: u64,
    pub threshold: f64,
    pub probability: f64,
    pub command: String,
    pub actual_value: f64,
    pub client_ip: String,
    pub trigger_time: String,
}
