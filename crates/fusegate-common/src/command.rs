/// Derives the logical command for a request path.
///
/// The leading slash is stripped, the path is split on `/`, every segment
/// that parses fully as a base-10 integer is dropped, and the rest is
/// rejoined. `/api/v2/orders/4711/items` therefore maps to
/// `api/v2/orders/items`, so all requests of one route family share a
/// command regardless of embedded ids.
///
/// Returns `None` for paths that yield nothing to classify (empty result or
/// `favicon.ico`); such requests bypass the rule engine entirely.
pub fn classify(path: &str) -> Option<String> {
    let command = path
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty() && segment.parse::<i64>().is_err())
        .collect::<Vec<_>>()
        .join("/");

    if command.is_empty() || command == "favicon.ico" {
        None
    } else {
        Some(command)
    }
}

/// Storage-safe form of a command: every non-alphanumeric byte becomes `_`.
/// Used as the suffix of all per-command storage keys. Idempotent.
pub fn command_key(command: &str) -> String {
    command
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
