//! Metrics collection using metrics-rs.
//!
//! All labels are static strings so recording never allocates on the
//! mapping path.

use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const MAP_REQUESTS: &str = "lowmem_map_requests";
const REMAP_REQUESTS: &str = "lowmem_remap_requests";
const UNMAP_REQUESTS: &str = "lowmem_unmap_requests";
const REQUEST_FAILURES: &str = "lowmem_request_failures";
const ARENA_FREE_BYTES: &str = "lowmem_arena_free_bytes";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        MAP_REQUESTS,
        Unit::Count,
        "mmap/mmap64 calls, labelled by route (arena or system)"
    );
    metrics::describe_counter!(
        REMAP_REQUESTS,
        Unit::Count,
        "mremap calls, labelled by route (arena or system)"
    );
    metrics::describe_counter!(
        UNMAP_REQUESTS,
        Unit::Count,
        "munmap calls, labelled by route (arena or system)"
    );
    metrics::describe_counter!(
        REQUEST_FAILURES,
        Unit::Count,
        "Failed arena-routed requests, labelled by error kind"
    );
    metrics::describe_gauge!(
        ARENA_FREE_BYTES,
        Unit::Bytes,
        "Free bytes left in the managed window"
    );
}

/// Record a map request.
#[inline]
pub fn record_map(route: &'static str) {
    counter!(MAP_REQUESTS, "route" => route).increment(1);
}

/// Record a remap request.
#[inline]
pub fn record_remap(route: &'static str) {
    counter!(REMAP_REQUESTS, "route" => route).increment(1);
}

/// Record an unmap request.
#[inline]
pub fn record_unmap(route: &'static str) {
    counter!(UNMAP_REQUESTS, "route" => route).increment(1);
}

/// Record a failed arena-routed request.
#[inline]
pub fn record_failure(kind: &'static str) {
    counter!(REQUEST_FAILURES, "kind" => kind).increment(1);
}

/// Record the arena's free space.
#[inline]
pub fn record_free_bytes(free: usize) {
    gauge!(ARENA_FREE_BYTES).set(free as f64);
}
