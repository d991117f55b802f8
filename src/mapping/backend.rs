//! The two routing backends.
//!
//! A backend is chosen once, when the interposer is built:
//!
//! - [`PassThrough`]: every call goes straight to the system.
//! - [`LowMemBackend`]: calls that want the low window are served from a
//!   [`PageArena`] and backed with fixed mappings; everything else goes to
//!   the system.
//!
//! [`Backend`] is the tagged union the interposer holds.

use super::request::{MREMAP_MAYMOVE, MapRequest, RemapRequest, Route};
use super::system::SystemMap;
use crate::error::{Error, Result};
use crate::memory::{ArenaStats, FreeRange, PageArena, Window, align_down, align_up};
use crate::observability::{
    record_failure, record_free_bytes, record_map, record_remap, record_unmap, span_request,
};
use rustix::io::Errno;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Routing interface shared by both backends.
pub trait MapBackend<S: SystemMap> {
    /// Handle an `mmap`/`mmap64` call.
    ///
    /// # Safety
    ///
    /// Same contract as [`SystemMap::map`].
    unsafe fn map(&self, system: &S, req: &MapRequest) -> Result<usize>;

    /// Handle an `mremap` call.
    ///
    /// # Safety
    ///
    /// Same contract as [`SystemMap::remap`].
    unsafe fn remap(&self, system: &S, req: &RemapRequest) -> Result<usize>;

    /// Handle a `munmap` call.
    ///
    /// # Safety
    ///
    /// Same contract as [`SystemMap::unmap`].
    unsafe fn unmap(&self, system: &S, addr: usize, len: usize) -> Result<()>;
}

/// Backend that forwards everything unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl<S: SystemMap> MapBackend<S> for PassThrough {
    unsafe fn map(&self, system: &S, req: &MapRequest) -> Result<usize> {
        record_map(Route::System.as_str());
        // SAFETY: Forwarded under the caller's contract.
        unsafe { system.map(req) }
    }

    unsafe fn remap(&self, system: &S, req: &RemapRequest) -> Result<usize> {
        record_remap(Route::System.as_str());
        // SAFETY: Forwarded under the caller's contract.
        unsafe { system.remap(req) }
    }

    unsafe fn unmap(&self, system: &S, addr: usize, len: usize) -> Result<()> {
        record_unmap(Route::System.as_str());
        // SAFETY: Forwarded under the caller's contract.
        unsafe { system.unmap(addr, len) }
    }
}

/// Backend serving low-address requests from the managed window.
///
/// The arena lock is held across each bookkeeping step and the system call
/// that backs or unbacks the same range.
#[derive(Debug)]
pub struct LowMemBackend {
    window: Window,
    page_size: usize,
    arena: Mutex<PageArena>,
}

impl LowMemBackend {
    /// Create a backend over an already reserved, page-aligned window.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if the window is not page aligned.
    /// - [`Error::Bookkeeping`] if the segment table cannot be allocated.
    pub fn new(window: Window, page_size: usize, segment_batch: usize) -> Result<Self> {
        if !page_size.is_power_of_two()
            || window.start() % page_size != 0
            || window.end() % page_size != 0
        {
            return Err(Error::invalid_range(window.start(), window.len()));
        }
        Ok(Self {
            window,
            page_size,
            arena: Mutex::new(PageArena::with_batch(window, segment_batch)?),
        })
    }

    /// The managed window.
    #[inline]
    pub fn window(&self) -> Window {
        self.window
    }

    /// Segment table statistics.
    pub fn stats(&self) -> ArenaStats {
        self.lock().stats()
    }

    /// Snapshot of the free list.
    pub fn free_ranges(&self) -> Vec<FreeRange> {
        self.lock().free_ranges().collect()
    }

    /// Free bytes in the window.
    pub fn free_bytes(&self) -> usize {
        self.lock().free_bytes()
    }

    fn lock(&self) -> MutexGuard<'_, PageArena> {
        // Arena updates never panic halfway, so a poisoned lock is usable.
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `len` rounded up to whole pages; zero is rejected.
    fn page_len(&self, addr: usize, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(Error::invalid_range(addr, len));
        }
        align_up(len, self.page_size).ok_or_else(|| Error::invalid_range(addr, len))
    }

    fn check_aligned(&self, addr: usize, len: usize) -> Result<()> {
        if addr % self.page_size != 0 {
            return Err(Error::invalid_range(addr, len));
        }
        Ok(())
    }

    /// Does this map request belong to the window?
    #[inline]
    pub fn routes_to_arena(&self, req: &MapRequest) -> bool {
        (req.wants_low() && !req.is_fixed()) || self.window.contains(req.addr)
    }

    /// An exact-address range that starts below the window and runs into it.
    ///
    /// Passing it through would replace window pages the arena still
    /// considers free.
    fn straddles_window(&self, req: &MapRequest) -> bool {
        let len = align_up(req.len, self.page_size).unwrap_or(usize::MAX);
        req.is_fixed() && !self.window.contains(req.addr) && self.window.overlaps(req.addr, len)
    }

    unsafe fn map_in_window<S: SystemMap>(&self, system: &S, req: &MapRequest) -> Result<usize> {
        let len = self.page_len(req.addr, req.len)?;
        let mut arena = self.lock();

        let start = if req.is_fixed() {
            self.check_aligned(req.addr, req.len)?;
            if arena.is_allocated(req.addr, len) {
                if req.is_noreplace() {
                    return Err(Error::System(Errno::EXIST));
                }
                // The caller is replacing part of a mapping it already owns.
                // SAFETY: The range belongs to the caller.
                return unsafe { system.map(&req.pinned_at(req.addr, len)) };
            }
            match arena.acquire_exact(req.addr, len) {
                Ok(start) => start,
                Err(Error::NoSpace) if req.is_noreplace() => {
                    return Err(Error::System(Errno::EXIST));
                }
                Err(e) => return Err(e),
            }
        } else {
            let hint = req
                .hint()
                .filter(|&addr| self.window.contains(addr))
                .map(|addr| align_down(addr, self.page_size));
            arena.acquire(hint, len)?
        };

        // SAFETY: The arena just handed us [start, start + len); nothing
        // else in the process maps there.
        match unsafe { system.map(&req.pinned_at(start, len)) } {
            Ok(addr) => {
                record_free_bytes(arena.free_bytes());
                tracing::debug!(addr, len, "mapped from low window");
                Ok(addr)
            }
            Err(e) => {
                if let Err(undo) = arena.release(start, len) {
                    tracing::warn!(addr = start, len, error = %undo, "could not return range to arena");
                }
                tracing::warn!(addr = start, len, error = %e, "backing mapping failed");
                Err(e)
            }
        }
    }

    unsafe fn remap_out_of_window<S: SystemMap>(&self, system: &S, req: &RemapRequest) -> Result<usize> {
        self.check_aligned(req.old_addr, req.old_len)?;
        let old_len = self.page_len(req.old_addr, req.old_len)?;
        let mut arena = self.lock();
        if !arena.is_allocated(req.old_addr, old_len) {
            return Err(Error::invalid_range(req.old_addr, req.old_len));
        }
        // SAFETY: The old range is allocated to the caller.
        let addr = unsafe { system.remap(req)? };
        arena.release(req.old_addr, old_len)?;
        record_free_bytes(arena.free_bytes());
        Ok(addr)
    }

    unsafe fn remap_in_window<S: SystemMap>(&self, system: &S, req: &RemapRequest) -> Result<usize> {
        self.check_aligned(req.old_addr, req.old_len)?;
        let addr = req.old_addr;
        let old_len = self.page_len(addr, req.old_len)?;
        let new_len = self.page_len(addr, req.new_len)?;
        let mut arena = self.lock();

        if let Err(e) = arena.resize(addr, old_len, new_len) {
            if matches!(e, Error::NoSpace) && req.may_move() {
                tracing::debug!(addr, old_len, new_len, "cannot grow in place; not relocating");
            }
            return Err(e);
        }

        if new_len > old_len {
            // The tail may still carry the no-access reservation, which would
            // block in-place growth.
            // SAFETY: resize just handed the tail to this allocation.
            if let Err(e) = unsafe { system.unmap(addr + old_len, new_len - old_len) } {
                undo_resize(&mut arena, addr, new_len, old_len);
                return Err(e);
            }
        }

        let in_place = RemapRequest {
            flags: req.flags & !MREMAP_MAYMOVE,
            new_addr: None,
            ..*req
        };
        // SAFETY: The old range is allocated to the caller and the arena now
        // covers the new length.
        match unsafe { system.remap(&in_place) } {
            Ok(new_addr) => {
                record_free_bytes(arena.free_bytes());
                Ok(new_addr)
            }
            Err(e) => {
                undo_resize(&mut arena, addr, new_len, old_len);
                tracing::warn!(addr, old_len, new_len, error = %e, "in-place remap failed");
                Err(e)
            }
        }
    }

    unsafe fn unmap_in_window<S: SystemMap>(&self, system: &S, addr: usize, len: usize) -> Result<()> {
        self.check_aligned(addr, len)?;
        let len = self.page_len(addr, len)?;
        let mut arena = self.lock();
        arena.release(addr, len)?;

        // SAFETY: The range was allocated to the caller, who gives it up.
        if let Err(e) = unsafe { system.unmap(addr, len) } {
            if let Err(undo) = arena.acquire_exact(addr, len) {
                tracing::warn!(addr, len, error = %undo, "could not re-acquire range");
            }
            tracing::warn!(addr, len, error = %e, "system munmap failed");
            return Err(e);
        }
        record_free_bytes(arena.free_bytes());
        Ok(())
    }
}

fn undo_resize(arena: &mut PageArena, addr: usize, from: usize, to: usize) {
    if let Err(e) = arena.resize(addr, from, to) {
        tracing::warn!(addr, from, to, error = %e, "could not undo resize");
    }
}

fn observed<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        record_failure(e.kind());
        tracing::debug!(error = %e, "low window request failed");
    }
    result
}

impl<S: SystemMap> MapBackend<S> for LowMemBackend {
    unsafe fn map(&self, system: &S, req: &MapRequest) -> Result<usize> {
        if self.straddles_window(req) {
            record_map(Route::Arena.as_str());
            return observed(Err(Error::Unsupported(
                "fixed mapping running into the low window",
            )));
        }
        if !self.routes_to_arena(req) {
            record_map(Route::System.as_str());
            // SAFETY: Forwarded under the caller's contract.
            return unsafe { system.map(req) };
        }
        record_map(Route::Arena.as_str());
        let _span = span_request("mmap", req.addr, req.len).entered();
        // SAFETY: Forwarded under the caller's contract.
        observed(unsafe { self.map_in_window(system, req) })
    }

    unsafe fn remap(&self, system: &S, req: &RemapRequest) -> Result<usize> {
        let old_inside = self.window.contains(req.old_addr);

        if req.is_fixed() {
            let Some(dest) = req.new_addr else {
                return observed(Err(Error::invalid_range(req.old_addr, req.old_len)));
            };
            let dest_len = align_up(req.new_len, self.page_size).unwrap_or(usize::MAX);
            if self.window.overlaps(dest, dest_len) {
                record_remap(Route::Arena.as_str());
                return observed(Err(Error::Unsupported(
                    "fixed-destination remap into the low window",
                )));
            }
            if old_inside {
                record_remap(Route::Arena.as_str());
                let _span = span_request("mremap", req.old_addr, req.new_len).entered();
                // SAFETY: Forwarded under the caller's contract.
                return observed(unsafe { self.remap_out_of_window(system, req) });
            }
        } else if old_inside {
            record_remap(Route::Arena.as_str());
            let _span = span_request("mremap", req.old_addr, req.new_len).entered();
            // SAFETY: Forwarded under the caller's contract.
            return observed(unsafe { self.remap_in_window(system, req) });
        }

        record_remap(Route::System.as_str());
        // SAFETY: Forwarded under the caller's contract.
        unsafe { system.remap(req) }
    }

    unsafe fn unmap(&self, system: &S, addr: usize, len: usize) -> Result<()> {
        if !self.window.contains(addr) {
            record_unmap(Route::System.as_str());
            // SAFETY: Forwarded under the caller's contract.
            return unsafe { system.unmap(addr, len) };
        }
        record_unmap(Route::Arena.as_str());
        let _span = span_request("munmap", addr, len).entered();
        // SAFETY: Forwarded under the caller's contract.
        observed(unsafe { self.unmap_in_window(system, addr, len) })
    }
}

/// The backend selected at initialization.
#[derive(Debug)]
pub enum Backend {
    /// No window: forward everything.
    PassThrough(PassThrough),
    /// Window established.
    LowMem(LowMemBackend),
}

impl Backend {
    /// The arena backend, if a window exists.
    pub fn low_mem(&self) -> Option<&LowMemBackend> {
        match self {
            Backend::PassThrough(_) => None,
            Backend::LowMem(backend) => Some(backend),
        }
    }
}

impl<S: SystemMap> MapBackend<S> for Backend {
    unsafe fn map(&self, system: &S, req: &MapRequest) -> Result<usize> {
        // SAFETY: Forwarded under the caller's contract.
        unsafe {
            match self {
                Backend::PassThrough(b) => b.map(system, req),
                Backend::LowMem(b) => b.map(system, req),
            }
        }
    }

    unsafe fn remap(&self, system: &S, req: &RemapRequest) -> Result<usize> {
        // SAFETY: Forwarded under the caller's contract.
        unsafe {
            match self {
                Backend::PassThrough(b) => b.remap(system, req),
                Backend::LowMem(b) => b.remap(system, req),
            }
        }
    }

    unsafe fn unmap(&self, system: &S, addr: usize, len: usize) -> Result<()> {
        // SAFETY: Forwarded under the caller's contract.
        unsafe {
            match self {
                Backend::PassThrough(b) => b.unmap(system, addr, len),
                Backend::LowMem(b) => b.unmap(system, addr, len),
            }
        }
    }
}
