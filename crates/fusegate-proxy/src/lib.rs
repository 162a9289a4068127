//! The fusegate reverse proxy.
//!
//! Each request is classified into a command, gated by the device rate
//! limiter and the third-party circuit breaker, forwarded upstream, and
//! recorded into the sliding-window telemetry store. A separate
//! localhost-only admin listener exposes the expiry sweep and health.

pub mod admin;
pub mod config;
pub mod context;
pub mod gate;
pub mod logging;
pub mod proxy;
pub mod state;

#[cfg(test)]
mod tests;
