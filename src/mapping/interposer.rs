//! The interposer context: window setup plus per-call routing.

use super::backend::{Backend, LowMemBackend, MapBackend, PassThrough};
use super::request::{MAP_NORESERVE, MAP_PRIVATE, MapRequest, PROT_NONE, RemapRequest};
use super::system::SystemMap;
use crate::config::LowMemConfig;
use crate::error::{Error, Result};
use crate::memory::{ArenaStats, FreeRange, Window};
use std::io::Write;

/// Routes mapping calls between the low window and the system.
///
/// One value is built per process by [`interposer()`](super::interposer()), but
/// any number can exist side by side, each over its own window and
/// [`SystemMap`].
///
/// # Example
///
/// ```rust,ignore
/// use lowmem::mapping::{Interposer, MapRequest, RustixSystem, MAP_PRIVATE, MAP_32BIT, PROT_READ, PROT_WRITE};
/// use lowmem::LowMemConfig;
///
/// let interposer = Interposer::initialize(RustixSystem, &LowMemConfig::from_env());
/// let req = MapRequest::anonymous(0, 4096, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_32BIT);
/// let addr = unsafe { interposer.map(&req)? };
/// ```
#[derive(Debug)]
pub struct Interposer<S: SystemMap> {
    system: S,
    backend: Backend,
}

impl<S: SystemMap> Interposer<S> {
    /// An interposer with no window; every call passes through.
    pub const fn pass_through(system: S) -> Self {
        Self {
            system,
            backend: Backend::PassThrough(PassThrough),
        }
    }

    /// An interposer over a window the caller has already reserved.
    ///
    /// # Errors
    ///
    /// Fails if the window is not page aligned or bookkeeping cannot be
    /// allocated.
    pub fn with_window(system: S, window: Window, config: &LowMemConfig) -> Result<Self> {
        let backend = LowMemBackend::new(window, system.page_size(), config.segment_batch)?;
        Ok(Self {
            system,
            backend: Backend::LowMem(backend),
        })
    }

    /// Reserve the low window above the program break and build the arena.
    ///
    /// Never fails: when the window cannot be established the interposer
    /// degrades to pass-through.
    pub fn initialize(system: S, config: &LowMemConfig) -> Self {
        if !config.enabled {
            tracing::info!("low window disabled by configuration");
            return Self::pass_through(system);
        }

        let window = match Self::reserve_window(&system, config) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(error = %e, "falling back to pass-through");
                return Self::pass_through(system);
            }
        };

        match LowMemBackend::new(window, system.page_size(), config.segment_batch) {
            Ok(backend) => {
                tracing::info!(%window, len = window.len(), "low window established");
                Self {
                    system,
                    backend: Backend::LowMem(backend),
                }
            }
            Err(e) => {
                Self::release_reservation(&system, window, config);
                tracing::warn!(error = %e, "falling back to pass-through");
                Self::pass_through(system)
            }
        }
    }

    /// Compute the candidate window and reserve it with one no-access
    /// mapping, guard page included.
    fn reserve_window(system: &S, config: &LowMemConfig) -> Result<Window> {
        let page = system.page_size();
        let brk = system.program_break();
        let (guard, window) = Window::candidate(brk, page, config.guard_pages, config.boundary)
            .ok_or_else(|| {
                Error::WindowUnavailable(format!(
                    "program break {brk:#x} leaves no room below {:#x}",
                    config.boundary
                ))
            })?;

        let len = window.end() - guard;
        let req = MapRequest::anonymous(guard, len, PROT_NONE, MAP_PRIVATE | MAP_NORESERVE);
        // SAFETY: Not MAP_FIXED, so no existing mapping can be replaced.
        let got = unsafe { system.map(&req) }.map_err(|e| {
            Error::WindowUnavailable(format!("reservation at {guard:#x} failed: {e}"))
        })?;

        if got != guard {
            // SAFETY: The kernel just created this mapping for us.
            if let Err(e) = unsafe { system.unmap(got, len) } {
                tracing::warn!(addr = got, len, error = %e, "could not drop misplaced reservation");
            }
            return Err(Error::WindowUnavailable(format!(
                "reservation landed at {got:#x}, wanted {guard:#x}"
            )));
        }
        Ok(window)
    }

    fn release_reservation(system: &S, window: Window, config: &LowMemConfig) {
        let guard = window.start() - config.guard_pages * system.page_size();
        // SAFETY: reserve_window mapped exactly this range and nothing uses it.
        if let Err(e) = unsafe { system.unmap(guard, window.end() - guard) } {
            tracing::warn!(error = %e, "could not release reservation");
        }
    }

    /// Is a low window being managed?
    #[inline]
    pub fn has_arena(&self) -> bool {
        self.backend.low_mem().is_some()
    }

    /// The managed window, if any.
    pub fn window(&self) -> Option<Window> {
        self.backend.low_mem().map(LowMemBackend::window)
    }

    /// Segment statistics, if a window exists.
    pub fn stats(&self) -> Option<ArenaStats> {
        self.backend.low_mem().map(LowMemBackend::stats)
    }

    /// Free list snapshot, if a window exists.
    pub fn free_ranges(&self) -> Option<Vec<FreeRange>> {
        self.backend.low_mem().map(LowMemBackend::free_ranges)
    }

    /// The underlying system.
    #[inline]
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Write a one-line diagnostic summary to `out`.
    pub fn dump_stats<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match self.backend.low_mem() {
            Some(backend) => writeln!(
                out,
                "lowmem: window={} free={:#x} {}",
                backend.window(),
                backend.free_bytes(),
                backend.stats()
            ),
            None => writeln!(out, "lowmem: no managed window (pass-through)"),
        }
    }

    /// Route an `mmap`/`mmap64` call.
    ///
    /// # Safety
    ///
    /// Same contract as `mmap(2)`: with `MAP_FIXED` the caller must own the
    /// target range.
    pub unsafe fn map(&self, req: &MapRequest) -> Result<usize> {
        // SAFETY: Forwarded under the caller's contract.
        unsafe { self.backend.map(&self.system, req) }
    }

    /// Route an `mremap` call.
    ///
    /// # Safety
    ///
    /// Same contract as `mremap(2)`.
    pub unsafe fn remap(&self, req: &RemapRequest) -> Result<usize> {
        // SAFETY: Forwarded under the caller's contract.
        unsafe { self.backend.remap(&self.system, req) }
    }

    /// Route a `munmap` call.
    ///
    /// # Safety
    ///
    /// Same contract as `munmap(2)`.
    pub unsafe fn unmap(&self, addr: usize, len: usize) -> Result<()> {
        // SAFETY: Forwarded under the caller's contract.
        unsafe { self.backend.unmap(&self.system, addr, len) }
    }
}
