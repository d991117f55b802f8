//! Runtime configuration.
//!
//! The interposer has no `main` to hand it settings, so everything comes from
//! the environment at first use:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `LOWMEM_DISABLE` | unset | `1`/`true` forces pass-through |
//! | `LOWMEM_BOUNDARY` | `0x100000000` | upper bound of the window |
//! | `LOWMEM_GUARD_PAGES` | `1` | pages left between program data and window |
//! | `LOWMEM_SEGMENT_BATCH` | `100` | segment records added per table growth |
//! | `LOWMEM_LOG` | unset | tracing filter, installs a stderr subscriber |

use crate::error::{Error, Result};
use crate::memory::{DEFAULT_SEGMENT_BATCH, LOW_4G};

/// Environment variable names.
pub mod env {
    /// Force pass-through mode.
    pub const DISABLE: &str = "LOWMEM_DISABLE";
    /// Window upper bound.
    pub const BOUNDARY: &str = "LOWMEM_BOUNDARY";
    /// Guard pages below the window.
    pub const GUARD_PAGES: &str = "LOWMEM_GUARD_PAGES";
    /// Segment table growth batch.
    pub const SEGMENT_BATCH: &str = "LOWMEM_SEGMENT_BATCH";
    /// Tracing filter.
    pub const LOG: &str = "LOWMEM_LOG";
}

/// Configuration for the low-memory interposer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowMemConfig {
    /// Whether to try establishing the window at all.
    pub enabled: bool,

    /// Exclusive upper bound of the window.
    pub boundary: usize,

    /// Pages left unused between the program break and the window.
    pub guard_pages: usize,

    /// Segment records added each time the table runs out.
    pub segment_batch: usize,

    /// Tracing filter directive; `None` leaves logging to the host.
    pub log_filter: Option<String>,
}

impl Default for LowMemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            boundary: LOW_4G,
            guard_pages: 1,
            segment_batch: DEFAULT_SEGMENT_BATCH,
            log_filter: None,
        }
    }
}

impl LowMemConfig {
    /// A config that never reserves a window.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the window upper bound.
    pub fn with_boundary(mut self, boundary: usize) -> Self {
        self.boundary = boundary;
        self
    }

    /// Set the segment table growth batch.
    pub fn with_segment_batch(mut self, batch: usize) -> Self {
        self.segment_batch = batch;
        self
    }

    /// Read the configuration from the process environment.
    ///
    /// Invalid values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(env::DISABLE) {
            config.enabled = !matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(value) = lookup(env::BOUNDARY) {
            apply(&mut config.boundary, env::BOUNDARY, parse_usize(&value));
        }
        if let Some(value) = lookup(env::GUARD_PAGES) {
            apply(&mut config.guard_pages, env::GUARD_PAGES, parse_usize(&value));
        }
        if let Some(value) = lookup(env::SEGMENT_BATCH) {
            let batch = parse_usize(&value).and_then(|b| {
                if b == 0 {
                    Err(Error::Config("segment batch must be > 0".into()))
                } else {
                    Ok(b)
                }
            });
            apply(&mut config.segment_batch, env::SEGMENT_BATCH, batch);
        }
        config.log_filter = lookup(env::LOG).filter(|f| !f.trim().is_empty());

        config
    }
}

fn apply(slot: &mut usize, key: &str, value: Result<usize>) {
    match value {
        Ok(v) => *slot = v,
        Err(e) => tracing::warn!(key, error = %e, default = *slot, "ignoring invalid setting"),
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_usize(value: &str) -> Result<usize> {
    let value = value.trim().replace('_', "");
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| Error::Config(format!("{value:?}: {e}")))
}
