//! Error types for lowmem.

use rustix::io::Errno;
use std::collections::TryReserveError;
use thiserror::Error;

/// Result type alias using lowmem's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lowmem operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The low window could not be reserved at startup.
    ///
    /// Never surfaced to mapping callers: the interposer degrades to
    /// pass-through instead.
    #[error("low window unavailable: {0}")]
    WindowUnavailable(String),

    /// No free range in the arena satisfies the request.
    #[error("arena exhausted: no free range large enough")]
    NoSpace,

    /// The range is not a valid allocated range inside the window.
    #[error("invalid range: addr={addr:#x}, len={len:#x}")]
    InvalidRange {
        /// Start address of the rejected range.
        addr: usize,
        /// Length of the rejected range.
        len: usize,
    },

    /// The operation is deliberately not supported inside the window.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] Errno),

    /// The segment table could not grow.
    #[error("segment table growth failed: {0}")]
    Bookkeeping(#[from] TryReserveError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidRange`].
    pub(crate) fn invalid_range(addr: usize, len: usize) -> Self {
        Error::InvalidRange { addr, len }
    }

    /// The errno a C caller observes for this error.
    pub fn errno(&self) -> Errno {
        match self {
            Error::WindowUnavailable(_) | Error::NoSpace | Error::Bookkeeping(_) => Errno::NOMEM,
            Error::InvalidRange { .. } | Error::Unsupported(_) | Error::Config(_) => Errno::INVAL,
            Error::System(errno) => *errno,
        }
    }

    /// Short label used for failure metrics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::WindowUnavailable(_) => "window_unavailable",
            Error::NoSpace => "no_space",
            Error::InvalidRange { .. } => "invalid_range",
            Error::Unsupported(_) => "unsupported",
            Error::System(_) => "system",
            Error::Bookkeeping(_) => "bookkeeping",
            Error::Config(_) => "config",
        }
    }
}
