//! Mapping interception: decides, per call, whether the low window or the
//! system serves a request.
//!
//! # Architecture
//!
//! - [`SystemMap`]: the real calls ([`RustixSystem`] in production)
//! - [`MapBackend`]: routing interface, implemented by [`PassThrough`] and
//!   [`LowMemBackend`] and selected once as a [`Backend`]
//! - [`Interposer`]: window reservation plus the selected backend
//! - [`interposer()`]: the lazily built process-wide instance
//!
//! # Routing
//!
//! ```text
//!   mmap ──► MAP_32BIT (not MAP_FIXED) or hint in window? ──yes──► arena acquire ──► fixed mmap
//!                          │ no
//!                          └──────────────────────────────────► system mmap
//!
//!   mremap/munmap ──► old address in window? ──yes──► arena resize/release ──► system call
//!                          │ no
//!                          └──────────────────────────────────► system call
//! ```

mod backend;
mod global;
mod interposer;
mod request;
mod system;

pub use backend::{Backend, LowMemBackend, MapBackend, PassThrough};
pub use global::{InitState, init_state, interposer};
pub use interposer::Interposer;
pub use request::{
    MAP_32BIT, MAP_ANONYMOUS, MAP_FIXED, MAP_FIXED_NOREPLACE, MAP_NORESERVE, MAP_PRIVATE,
    MAP_SHARED, MREMAP_FIXED, MREMAP_MAYMOVE, MapRequest, PROT_NONE, PROT_READ, PROT_WRITE,
    RemapRequest, Route,
};
pub use system::{RustixSystem, SystemMap};
