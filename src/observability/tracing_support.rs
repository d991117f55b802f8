//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};
use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered by `filter`.
///
/// Returns `false` if the filter does not parse or a global subscriber is
/// already installed (the host's subscriber wins).
pub fn init_logging(filter: &str) -> bool {
    let filter = match EnvFilter::try_new(filter) {
        Ok(filter) => filter,
        Err(_) => return false,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Create a span for one routed mapping call.
///
/// # Example
///
/// ```rust
/// use lowmem::observability::span_request;
///
/// let span = span_request("mmap", 0x1000_0000, 0x1000);
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_request(op: &'static str, addr: usize, len: usize) -> Span {
    span!(Level::DEBUG, "lowmem", op, addr = addr, len = len)
}
