/// Errors from the alarm subsystem. All of them are observability-only:
/// alarm delivery is best-effort and never influences a request outcome.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// The outbound POST failed or timed out.
    #[error("Alarm: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The alarm endpoint answered with a non-success status.
    #[error("Alarm: endpoint returned status {0}")]
    Rejected(u16),

    /// The payload could not be JSON-encoded.
    #[error("Alarm: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for alarm operations.
pub type Result<T> = std::result::Result<T, AlarmError>;
