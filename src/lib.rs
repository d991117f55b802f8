//! # lowmem
//!
//! A low-address `mmap` arena for 64-bit Linux processes.
//!
//! lowmem reserves the address range between the end of the program's data
//! segment and the 4 GiB boundary, then serves mapping requests that need a
//! low address (`MAP_32BIT`, or a hint inside the window) from it. Everything
//! else passes straight through to the kernel. Loaded with `LD_PRELOAD`, it
//! shadows `mmap`, `mmap64`, `mremap` and `munmap`, so callers never know which
//! side served them.
//!
//! ## Features
//!
//! - **First-fit arena**: address-ordered free list with split, coalesce and
//!   in-place resize ([`memory::PageArena`])
//! - **Transparent routing**: one-time backend selection, pass-through when the
//!   window cannot be reserved ([`mapping::Interposer`])
//! - **Raw syscalls**: the real calls go through rustix, bypassing libc's
//!   exported symbols
//!
//! ## Quick Start
//!
//! ```rust
//! use lowmem::memory::{PageArena, Window};
//!
//! let window = Window::new(0x1000_0000, 0x1000_0000)?;
//! let mut arena = PageArena::new(window)?;
//!
//! let addr = arena.acquire(None, 0x2000)?;
//! arena.resize(addr, 0x2000, 0x1000)?;
//! arena.release(addr, 0x1000)?;
//! # Ok::<(), lowmem::Error>(())
//! ```
//!
//! As a preload library:
//!
//! ```text
//! cargo build --release --features preload
//! LD_PRELOAD=target/release/liblowmem.so LOWMEM_LOG=lowmem=info ./legacy-jit
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod mapping;
pub mod memory;
pub mod observability;

#[cfg(feature = "preload")]
pub mod ffi;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::LowMemConfig;
    pub use crate::error::{Error, Result};
    pub use crate::mapping::{Interposer, MapRequest, RemapRequest, RustixSystem, SystemMap};
    pub use crate::memory::{PageArena, Window};
}

pub use config::LowMemConfig;
pub use error::{Error, Result};
