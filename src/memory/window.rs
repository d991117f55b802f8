//! The managed low address window.

use crate::error::{Error, Result};

/// One kibibyte.
pub const KIB: usize = 1024;
/// One mebibyte.
pub const MIB: usize = 1024 * KIB;
/// One gibibyte.
pub const GIB: usize = 1024 * MIB;

/// Default upper bound of the managed window (the 32-bit pointer limit).
#[cfg(target_pointer_width = "64")]
pub const LOW_4G: usize = 4 * GIB;

/// On 32-bit hosts every address is below 4 GiB; the last page is the bound.
#[cfg(not(target_pointer_width = "64"))]
pub const LOW_4G: usize = usize::MAX & !(4 * KIB - 1);

/// Round `value` down to a multiple of `page` (a power of two).
#[inline]
pub const fn align_down(value: usize, page: usize) -> usize {
    value & !(page - 1)
}

/// Round `value` up to a multiple of `page` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
pub const fn align_up(value: usize, page: usize) -> Option<usize> {
    match value.checked_add(page - 1) {
        Some(v) => Some(v & !(page - 1)),
        None => None,
    }
}

/// A fixed, contiguous address range `[start, end)`.
///
/// The window never moves or resizes once an arena is built over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    start: usize,
    end: usize,
}

impl Window {
    /// Create a window of `len` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `len` is zero or the range wraps.
    pub fn new(start: usize, len: usize) -> Result<Self> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::invalid_range(start, len))?;
        if len == 0 {
            return Err(Error::invalid_range(start, len));
        }
        Ok(Self { start, end })
    }

    /// Create a window from its bounds.
    pub fn from_bounds(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(Error::invalid_range(start, end.wrapping_sub(start)));
        }
        Ok(Self { start, end })
    }

    /// Compute the candidate window above the program break.
    ///
    /// The break is rounded to the next page boundary; that page plus
    /// `guard_pages - 1` more are left as a guard, and the window runs from
    /// there up to `boundary`.
    ///
    /// Returns the guard start (the address the reservation begins at) and
    /// the usable window, or `None` when nothing is left below `boundary`.
    pub fn candidate(
        program_break: usize,
        page_size: usize,
        guard_pages: usize,
        boundary: usize,
    ) -> Option<(usize, Window)> {
        let guard = align_down(program_break, page_size).checked_add(page_size)?;
        let start = guard.checked_add(guard_pages.checked_mul(page_size)?)?;
        let end = align_down(boundary, page_size);
        if start >= end {
            return None;
        }
        Some((guard, Window { start, end }))
    }

    /// First address of the window.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last address of the window.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Window length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Always false; a window is never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Does `addr` fall inside the window?
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Does `[addr, addr+len)` fall entirely inside the window?
    #[inline]
    pub fn contains_range(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }

    /// Does `[addr, addr+len)` share any byte with the window?
    #[inline]
    pub fn overlaps(&self, addr: usize, len: usize) -> bool {
        let end = addr.saturating_add(len);
        len != 0 && addr < self.end && end > self.start
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}
