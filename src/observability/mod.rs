//! Observability: metrics and tracing.
//!
//! - **Metrics**: Counters and gauges via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `lowmem_map_requests` | Counter | mmap calls by route |
//! | `lowmem_remap_requests` | Counter | mremap calls by route |
//! | `lowmem_unmap_requests` | Counter | munmap calls by route |
//! | `lowmem_request_failures` | Counter | failed arena-routed calls by error kind |
//! | `lowmem_arena_free_bytes` | Gauge | free bytes in the managed window |
//!
//! Nothing is exported unless the host process installs a recorder.
//!
//! ## Tracing
//!
//! Window establishment is logged at `info`, fallbacks and compensations at
//! `warn`, routed requests at `debug` and arena cuts at `trace`. Set
//! `LOWMEM_LOG` to install a stderr subscriber when the host has none.

mod metrics;
mod tracing_support;

pub use self::metrics::{
    init_metrics, record_failure, record_free_bytes, record_map, record_remap, record_unmap,
};
pub use self::tracing_support::{init_logging, span_request};
