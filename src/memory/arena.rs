//! First-fit page arena over the managed window.
//!
//! [`PageArena`] tracks the free address ranges of a [`Window`] with a
//! [`SegmentTable`]. In-use ranges are never recorded: whatever is not on the
//! free list is allocated. The arena does no system calls; the mapping layer
//! backs and unbacks the ranges it hands out.
//!
//! # Memory Layout
//!
//! ```text
//!  window.start                                                window.end
//!  ┌──────────┬────────┬──────────────┬───────┬─────────────────────┐
//!  │  in use  │  free  │    in use    │ free  │       in use        │
//!  └──────────┴────────┴──────────────┴───────┴─────────────────────┘
//!              seg 0                   seg 1
//! ```
//!
//! After every operation the free list is ascending, pairwise disjoint, has
//! no zero-length segments, and no two segments touch.
//!
//! # Example
//!
//! ```rust
//! use lowmem::memory::{PageArena, Window};
//!
//! let window = Window::new(0x1000_0000, 0x1000_0000).unwrap();
//! let mut arena = PageArena::new(window).unwrap();
//!
//! let a = arena.acquire(None, 0x1000).unwrap();
//! let b = arena.acquire(None, 0x1000).unwrap();
//! assert_eq!((a, b), (0x1000_0000, 0x1000_1000));
//!
//! arena.release(a, 0x1000).unwrap();
//! arena.release(b, 0x1000).unwrap();
//! assert_eq!(arena.free_ranges().count(), 1);
//! ```

use super::segment::{ArenaStats, DEFAULT_SEGMENT_BATCH, Segment, SegmentId, SegmentTable};
use super::window::Window;
use crate::error::{Error, Result};

/// A free range as reported by [`PageArena::free_ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    /// First free address.
    pub start: usize,
    /// Length in bytes.
    pub len: usize,
}

impl FreeRange {
    /// One past the last free address.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Address-range allocator over a fixed window.
#[derive(Debug)]
pub struct PageArena {
    window: Window,
    segments: SegmentTable,
    free_bytes: usize,
}

impl PageArena {
    /// Create an arena whose single free segment spans `window`.
    pub fn new(window: Window) -> Result<Self> {
        Self::with_batch(window, DEFAULT_SEGMENT_BATCH)
    }

    /// Create an arena growing its segment table `batch` records at a time.
    pub fn with_batch(window: Window, batch: usize) -> Result<Self> {
        let mut segments = SegmentTable::new(batch)?;
        let id = segments.take_unused()?;
        *segments.get_mut(id) = Segment {
            start: window.start(),
            len: window.len(),
            prev: None,
            next: None,
        };
        segments.link(id, None, None);

        Ok(Self {
            window,
            segments,
            free_bytes: window.len(),
        })
    }

    /// The window this arena manages.
    #[inline]
    pub fn window(&self) -> Window {
        self.window
    }

    /// Total free bytes.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Total allocated bytes.
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.window.len() - self.free_bytes
    }

    /// Segment table statistics.
    pub fn stats(&self) -> ArenaStats {
        self.segments.stats()
    }

    /// Free ranges in ascending address order.
    pub fn free_ranges(&self) -> impl Iterator<Item = FreeRange> + '_ {
        self.segments.iter().map(|(_, seg)| FreeRange {
            start: seg.start,
            len: seg.len,
        })
    }

    /// Reserve `len` bytes, preferring `hint` when it is free.
    ///
    /// A hint is honored only if `[hint, hint + len)` lies inside a single
    /// free segment; otherwise the first free segment (by address) large
    /// enough is used, cutting from its front.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if `len` is zero.
    /// - [`Error::NoSpace`] if no free segment is large enough.
    pub fn acquire(&mut self, hint: Option<usize>, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(Error::invalid_range(hint.unwrap_or(0), len));
        }
        if let Some(addr) = hint {
            if let Some(id) = self.hinted_segment(addr, len) {
                return self.cut(id, addr, len);
            }
            tracing::trace!(hint = addr, len, "hint unusable, falling back to first fit");
        }

        let id = self
            .segments
            .iter()
            .find(|(_, seg)| seg.len >= len)
            .map(|(id, _)| id)
            .ok_or(Error::NoSpace)?;
        let start = self.segments.get(id).start;
        self.cut(id, start, len)
    }

    /// Reserve exactly `[addr, addr + len)` or fail.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if `len` is zero.
    /// - [`Error::NoSpace`] if any part of the range is not free.
    pub fn acquire_exact(&mut self, addr: usize, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(Error::invalid_range(addr, len));
        }
        let id = self.hinted_segment(addr, len).ok_or(Error::NoSpace)?;
        self.cut(id, addr, len)
    }

    /// Resize the allocation at `addr` in place.
    ///
    /// Shrinking returns the tail to the free list. Growing takes the needed
    /// bytes from the front of a free segment that starts exactly at the end
    /// of the allocation. The address never changes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRange`] if `[addr, addr + old_len)` is not allocated
    ///   or `new_len` is zero.
    /// - [`Error::NoSpace`] if growth cannot happen in place.
    pub fn resize(&mut self, addr: usize, old_len: usize, new_len: usize) -> Result<usize> {
        if new_len == 0 || !self.is_allocated(addr, old_len) {
            return Err(Error::invalid_range(addr, old_len));
        }
        if new_len < old_len {
            self.release(addr + new_len, old_len - new_len)?;
            return Ok(addr);
        }
        if new_len == old_len {
            return Ok(addr);
        }

        let end = addr + old_len;
        let need = new_len - old_len;
        let id = self
            .find_addr(end)
            .filter(|&id| {
                let seg = self.segments.get(id);
                seg.start == end && seg.len >= need
            })
            .ok_or(Error::NoSpace)?;
        self.cut(id, end, need)?;
        Ok(addr)
    }

    /// Return `[addr, addr + len)` to the free list, merging with neighbors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the range is empty, leaves the
    /// window, or overlaps free space (double release or wrong length).
    pub fn release(&mut self, addr: usize, len: usize) -> Result<()> {
        if len == 0 || !self.window.contains_range(addr, len) {
            return Err(Error::invalid_range(addr, len));
        }
        let end = addr + len;

        // First segment starting above addr, and the one before it.
        let mut prev = None;
        let mut cur = self.segments.first();
        while let Some(id) = cur {
            let seg = self.segments.get(id);
            if addr < seg.start {
                break;
            }
            prev = cur;
            cur = seg.next;
        }

        let prev = prev.map(|id| (id, self.segments.get(id).end()));
        let next = cur.map(|id| (id, self.segments.get(id).start));
        if prev.is_some_and(|(_, prev_end)| prev_end > addr)
            || next.is_some_and(|(_, next_start)| next_start < end)
        {
            return Err(Error::invalid_range(addr, len));
        }
        self.free_bytes += len;

        match (prev, next) {
            (_, Some((n, next_start))) if next_start == end => {
                let seg = self.segments.get_mut(n);
                seg.start = addr;
                seg.len += len;
                if let Some((p, prev_end)) = prev {
                    if prev_end == addr {
                        let merged = self.segments.get(n).len;
                        self.segments.get_mut(p).len += merged;
                        self.segments.recycle(n);
                    }
                }
                return Ok(());
            }
            (Some((p, prev_end)), _) if prev_end == addr => {
                self.segments.get_mut(p).len += len;
                return Ok(());
            }
            _ => {}
        }

        let id = match self.segments.take_unused() {
            Ok(id) => id,
            Err(e) => {
                self.free_bytes -= len;
                return Err(e);
            }
        };
        *self.segments.get_mut(id) = Segment {
            start: addr,
            len,
            prev: None,
            next: None,
        };
        self.segments.link(id, prev.map(|(p, _)| p), cur);
        Ok(())
    }

    /// Is `[addr, addr + len)` inside the window and disjoint from free space?
    pub fn is_allocated(&self, addr: usize, len: usize) -> bool {
        if len == 0 || !self.window.contains_range(addr, len) {
            return false;
        }
        let end = addr + len;
        !self
            .segments
            .iter()
            .take_while(|(_, seg)| seg.start < end)
            .any(|(_, seg)| seg.end() > addr)
    }

    /// Segment equal to `addr`, else the one before the first segment
    /// starting above `addr`.
    fn find_addr(&self, addr: usize) -> Option<SegmentId> {
        let mut prev = None;
        for (id, seg) in self.segments.iter() {
            if addr <= seg.start {
                return if addr == seg.start { Some(id) } else { prev };
            }
            prev = Some(id);
        }
        prev
    }

    /// Segment that fully contains `[addr, addr + len)`, if any.
    fn hinted_segment(&self, addr: usize, len: usize) -> Option<SegmentId> {
        let end = addr.checked_add(len)?;
        self.find_addr(addr).filter(|&id| {
            let seg = self.segments.get(id);
            seg.start <= addr && end <= seg.end()
        })
    }

    /// Remove `[addr, addr + len)` from segment `id`, which must contain it.
    fn cut(&mut self, id: SegmentId, addr: usize, len: usize) -> Result<usize> {
        let seg = *self.segments.get(id);
        debug_assert!(seg.start <= addr && addr + len <= seg.end());

        if addr != seg.start {
            // Keep the free space in front of addr as its own segment.
            let extra = self.segments.take_unused()?;
            *self.segments.get_mut(extra) = Segment {
                start: seg.start,
                len: addr - seg.start,
                prev: None,
                next: None,
            };
            self.segments.link(extra, seg.prev, Some(id));
            let seg = self.segments.get_mut(id);
            seg.len -= addr - seg.start;
            seg.start = addr;
        }

        let seg = self.segments.get_mut(id);
        seg.len -= len;
        if seg.len == 0 {
            self.segments.recycle(id);
        } else {
            seg.start += len;
        }
        self.free_bytes -= len;
        tracing::trace!(addr, len, "cut from arena");
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x1000_0000;
    const PAGE: usize = 0x1000;

    fn arena() -> PageArena {
        PageArena::new(Window::new(BASE, 0x1000_0000).unwrap()).unwrap()
    }

    fn free(arena: &PageArena) -> Vec<(usize, usize)> {
        arena.free_ranges().map(|r| (r.start, r.len)).collect()
    }

    fn assert_invariants(arena: &PageArena) {
        let ranges: Vec<_> = arena.free_ranges().collect();
        for pair in ranges.windows(2) {
            assert!(pair[0].end() < pair[1].start, "touching or overlapping: {:?}", pair);
        }
        assert!(ranges.iter().all(|r| r.len > 0));
        let total: usize = ranges.iter().map(|r| r.len).sum();
        assert_eq!(total, arena.free_bytes());
        assert_eq!(arena.free_bytes() + arena.allocated_bytes(), arena.window().len());
        assert_eq!(arena.stats().live, ranges.len());
    }

    #[test]
    fn test_acquire_first_fit_from_front() {
        let mut arena = arena();
        assert_eq!(arena.acquire(None, PAGE).unwrap(), BASE);
        assert_eq!(arena.acquire(None, PAGE).unwrap(), BASE + PAGE);
        assert_eq!(free(&arena), vec![(BASE + 2 * PAGE, 0x1000_0000 - 2 * PAGE)]);
        assert_invariants(&arena);
    }

    #[test]
    fn test_acquire_zero_len_fails() {
        let mut arena = arena();
        assert!(matches!(arena.acquire(None, 0), Err(Error::InvalidRange { .. })));
        assert!(matches!(arena.acquire_exact(BASE, 0), Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn test_hint_in_middle_splits_segment() {
        let mut arena = arena();
        let addr = arena.acquire(Some(BASE + 4 * PAGE), PAGE).unwrap();
        assert_eq!(addr, BASE + 4 * PAGE);
        assert_eq!(
            free(&arena),
            vec![(BASE, 4 * PAGE), (BASE + 5 * PAGE, 0x1000_0000 - 5 * PAGE)]
        );
        assert_invariants(&arena);
    }

    #[test]
    fn test_hint_at_segment_start() {
        let mut arena = arena();
        assert_eq!(arena.acquire(Some(BASE), 2 * PAGE).unwrap(), BASE);
        assert_eq!(free(&arena)[0].0, BASE + 2 * PAGE);
        assert_invariants(&arena);
    }

    #[test]
    fn test_unusable_hint_falls_back_to_first_fit() {
        let mut arena = arena();
        arena.acquire(Some(BASE + 2 * PAGE), PAGE).unwrap();
        // [BASE, BASE+2P) is free but too small for 3 pages at BASE+P.
        let addr = arena.acquire(Some(BASE + PAGE), 3 * PAGE).unwrap();
        assert_eq!(addr, BASE + 3 * PAGE);
        assert_invariants(&arena);
    }

    #[test]
    fn test_hint_below_window_falls_back() {
        let mut arena = arena();
        assert_eq!(arena.acquire(Some(0x1000), PAGE).unwrap(), BASE);
    }

    #[test]
    fn test_acquire_exact_never_substitutes() {
        let mut arena = arena();
        arena.acquire(None, 2 * PAGE).unwrap();
        assert!(matches!(arena.acquire_exact(BASE + PAGE, PAGE), Err(Error::NoSpace)));
        assert!(matches!(arena.acquire_exact(BASE + PAGE, 2 * PAGE), Err(Error::NoSpace)));
        assert_eq!(arena.acquire_exact(BASE + 2 * PAGE, PAGE).unwrap(), BASE + 2 * PAGE);
        assert_invariants(&arena);
    }

    #[test]
    fn test_first_fit_picks_lowest_sufficient_segment() {
        let mut arena = PageArena::new(Window::new(0x10000, 0x1000).unwrap()).unwrap();
        // Free layout: [100 @ 0x10000] used [50 @ 0x10100] used [200 @ 0x10200] used
        arena.acquire_exact(0x10000 + 100, 0x100 - 100).unwrap();
        arena.acquire_exact(0x10100 + 50, 0x100 - 50).unwrap();
        arena.acquire_exact(0x10200 + 200, 0x1000 - 0x200 - 200).unwrap();
        assert_eq!(free(&arena), vec![(0x10000, 100), (0x10100, 50), (0x10200, 200)]);

        assert_eq!(arena.acquire(None, 64).unwrap(), 0x10000);
        assert_eq!(free(&arena), vec![(0x10000 + 64, 36), (0x10100, 50), (0x10200, 200)]);
        assert_invariants(&arena);
    }

    #[test]
    fn test_exhaustion() {
        let mut arena = PageArena::new(Window::new(BASE, PAGE).unwrap()).unwrap();
        assert_eq!(arena.acquire(None, PAGE).unwrap(), BASE);
        assert!(matches!(arena.acquire(None, 1), Err(Error::NoSpace)));
        assert_eq!(arena.free_ranges().count(), 0);
        assert_eq!(arena.stats().live, 0);
    }

    #[test]
    fn test_release_round_trip_collapses() {
        let mut arena = arena();
        let a = arena.acquire(None, PAGE).unwrap();
        let b = arena.acquire(None, PAGE).unwrap();
        arena.release(a, PAGE).unwrap();
        assert_eq!(free(&arena).len(), 2);
        arena.release(b, PAGE).unwrap();
        assert_eq!(free(&arena), vec![(BASE, 0x1000_0000)]);
        assert_invariants(&arena);
    }

    #[test]
    fn test_release_merges_backward() {
        let mut arena = arena();
        let a = arena.acquire(None, PAGE).unwrap();
        let b = arena.acquire(None, PAGE).unwrap();
        let _c = arena.acquire(None, PAGE).unwrap();
        arena.release(a, PAGE).unwrap();
        arena.release(b, PAGE).unwrap();
        assert_eq!(free(&arena)[0], (BASE, 2 * PAGE));
        assert_eq!(free(&arena).len(), 2);
        assert_invariants(&arena);
    }

    #[test]
    fn test_release_merges_both_sides() {
        let mut arena = arena();
        let a = arena.acquire(None, PAGE).unwrap();
        let b = arena.acquire(None, PAGE).unwrap();
        let c = arena.acquire(None, PAGE).unwrap();
        let _d = arena.acquire(None, PAGE).unwrap();
        arena.release(a, PAGE).unwrap();
        arena.release(c, PAGE).unwrap();
        assert_eq!(free(&arena).len(), 3);
        arena.release(b, PAGE).unwrap();
        assert_eq!(free(&arena)[0], (BASE, 3 * PAGE));
        assert_eq!(free(&arena).len(), 2);
        assert_invariants(&arena);
    }

    #[test]
    fn test_release_isolated_creates_segment() {
        let mut arena = arena();
        arena.acquire(None, 3 * PAGE).unwrap();
        arena.release(BASE + PAGE, PAGE).unwrap();
        assert_eq!(free(&arena)[0], (BASE + PAGE, PAGE));
        assert_eq!(free(&arena).len(), 2);
        assert_invariants(&arena);
    }

    #[test]
    fn test_double_release_rejected() {
        let mut arena = arena();
        let a = arena.acquire(None, 2 * PAGE).unwrap();
        arena.release(a, PAGE).unwrap();
        assert!(matches!(arena.release(a, PAGE), Err(Error::InvalidRange { .. })));
        // Overlaps the free page at the front.
        assert!(matches!(arena.release(a, 2 * PAGE), Err(Error::InvalidRange { .. })));
        // Free space that was never allocated.
        assert!(matches!(arena.release(BASE + 8 * PAGE, PAGE), Err(Error::InvalidRange { .. })));
        assert_invariants(&arena);
    }

    #[test]
    fn test_release_outside_window_rejected() {
        let mut arena = arena();
        arena.acquire(None, PAGE).unwrap();
        assert!(arena.release(BASE - PAGE, 2 * PAGE).is_err());
        assert!(arena.release(BASE + 0x1000_0000, PAGE).is_err());
        assert!(arena.release(BASE, 0).is_err());
    }

    #[test]
    fn test_resize_shrink_releases_tail() {
        let mut arena = arena();
        let a = arena.acquire(None, 4 * PAGE).unwrap();
        let _b = arena.acquire(None, PAGE).unwrap();
        assert_eq!(arena.resize(a, 4 * PAGE, PAGE).unwrap(), a);
        assert_eq!(free(&arena)[0], (BASE + PAGE, 3 * PAGE));
        assert_invariants(&arena);
    }

    #[test]
    fn test_resize_shrink_merges_with_following_free() {
        let mut arena = arena();
        let a = arena.acquire(None, 4 * PAGE).unwrap();
        arena.resize(a, 4 * PAGE, 2 * PAGE).unwrap();
        assert_eq!(free(&arena), vec![(BASE + 2 * PAGE, 0x1000_0000 - 2 * PAGE)]);
        assert_invariants(&arena);
    }

    #[test]
    fn test_grow_in_place() {
        let mut arena = arena();
        let a = arena.acquire(None, PAGE).unwrap();
        let b = arena.acquire(None, PAGE).unwrap();
        assert_eq!((a, b), (BASE, BASE + PAGE));
        arena.release(b, PAGE).unwrap();
        assert_eq!(arena.resize(a, PAGE, 2 * PAGE).unwrap(), BASE);
        assert_eq!(free(&arena)[0].0, BASE + 2 * PAGE);
        assert_invariants(&arena);
    }

    #[test]
    fn test_grow_blocked_by_allocation() {
        let mut arena = arena();
        let a = arena.acquire(None, PAGE).unwrap();
        let _b = arena.acquire(None, PAGE).unwrap();
        assert!(matches!(arena.resize(a, PAGE, 2 * PAGE), Err(Error::NoSpace)));
        assert_invariants(&arena);
    }

    #[test]
    fn test_grow_needs_enough_following_space() {
        let mut arena = arena();
        let a = arena.acquire(None, PAGE).unwrap();
        let b = arena.acquire(None, PAGE).unwrap();
        let _c = arena.acquire(None, PAGE).unwrap();
        arena.release(b, PAGE).unwrap();
        assert!(matches!(arena.resize(a, PAGE, 3 * PAGE), Err(Error::NoSpace)));
        // Consuming the whole following segment removes it.
        arena.resize(a, PAGE, 2 * PAGE).unwrap();
        assert_eq!(free(&arena).len(), 1);
        assert_invariants(&arena);
    }

    #[test]
    fn test_shrink_then_grow_restores_layout() {
        let mut arena = arena();
        let a = arena.acquire(None, 4 * PAGE).unwrap();
        let _b = arena.acquire(None, PAGE).unwrap();
        arena.acquire(Some(BASE + 8 * PAGE), PAGE).unwrap();
        let before = free(&arena);

        arena.resize(a, 4 * PAGE, 2 * PAGE).unwrap();
        assert_ne!(free(&arena), before);
        arena.resize(a, 2 * PAGE, 4 * PAGE).unwrap();
        assert_eq!(free(&arena), before);
        assert_invariants(&arena);
    }

    #[test]
    fn test_resize_unknown_range_rejected() {
        let mut arena = arena();
        assert!(matches!(
            arena.resize(BASE, PAGE, 2 * PAGE),
            Err(Error::InvalidRange { .. })
        ));
        let a = arena.acquire(None, PAGE).unwrap();
        assert!(matches!(arena.resize(a, PAGE, 0), Err(Error::InvalidRange { .. })));
        assert_eq!(arena.resize(a, PAGE, PAGE).unwrap(), a);
    }

    #[test]
    fn test_is_allocated() {
        let mut arena = arena();
        assert!(!arena.is_allocated(BASE, PAGE));
        arena.acquire(None, 2 * PAGE).unwrap();
        assert!(arena.is_allocated(BASE, 2 * PAGE));
        assert!(arena.is_allocated(BASE + PAGE, PAGE));
        assert!(!arena.is_allocated(BASE + PAGE, 2 * PAGE));
        assert!(!arena.is_allocated(BASE - PAGE, PAGE));
    }

    #[test]
    fn test_segment_table_grows_in_batches() {
        let mut arena = PageArena::with_batch(Window::new(BASE, 0x1000_0000).unwrap(), 16).unwrap();
        // Every other page allocated: each release creates a new segment.
        let addrs: Vec<_> = (0..64).map(|_| arena.acquire(None, PAGE).unwrap()).collect();
        for addr in addrs.iter().step_by(2) {
            arena.release(*addr, PAGE).unwrap();
        }
        let stats = arena.stats();
        assert_eq!(stats.live, 33);
        assert_eq!((stats.capacity - 4) % 16, 0);
        assert!(stats.capacity >= 33);
        assert_invariants(&arena);
    }
}
