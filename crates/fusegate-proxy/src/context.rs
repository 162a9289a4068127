use std::time::Instant;

use fusegate_common::command::{classify, command_key};

/// Per-request engine state, owned by the handling worker.
///
/// Built once on entry and threaded through the gate and recording phases.
/// A request without a command (empty path, favicon) is ignorable: the
/// engine neither evaluates nor records it.
#[derive(Debug)]
pub struct RequestContext {
    pub started: Instant,
    pub command: Option<String>,
    pub command_key: Option<String>,
    pub client_ip: String,
}

impl RequestContext {
    pub fn new(path: &str, client_ip: String) -> Self {
        let command = classify(path);
        let command_key = command.as_deref().map(command_key);
        Self {
            started: Instant::now(),
            command,
            command_key,
            client_ip,
        }
    }

    pub fn is_ignorable(&self) -> bool {
        self.command.is_none()
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_classifies_and_keys_the_command() {
        let ctx = RequestContext::new("/api/orders/4711/items", "10.0.0.1".into());
        assert_eq!(ctx.command.as_deref(), Some("api/orders/items"));
        assert_eq!(ctx.command_key.as_deref(), Some("api_orders_items"));
        assert!(!ctx.is_ignorable());
    }

    #[test]
    fn favicon_is_ignorable() {
        let ctx = RequestContext::new("/favicon.ico", "10.0.0.1".into());
        assert!(ctx.is_ignorable());
        assert!(ctx.command_key.is_none());
    }
}
