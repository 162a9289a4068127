/// Errors that can occur within the telemetry store.
///
/// The request path never sees these: the evaluator substitutes default
/// window statistics on any `Err` and the write workers log and drop. They
/// only propagate out of startup wiring and the admin sweep endpoint.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying Redis protocol or I/O error.
    #[error("Store: Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend connection could not be established from configuration.
    #[error("Store: invalid backend configuration: {0}")]
    Config(String),

    /// Generic store error for cases not covered by other variants.
    #[error("Store: {0}")]
    Other(String),
}

/// Convenience `Result` alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
