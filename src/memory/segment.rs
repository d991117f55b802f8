//! Segment records and the table that owns them.
//!
//! Every [`Segment`] lives in one growable table and is addressed by index.
//! A record is linked into exactly one of two lists at any time:
//!
//! - the **free list**: doubly linked, ascending by `start`, one record per
//!   maximal free range;
//! - the **unused list**: singly linked stack of recycled records.
//!
//! Moving a record between lists never copies it.

use crate::error::Result;

/// Index of a segment record in the table.
pub type SegmentId = usize;

/// Records the table holds before the first growth step.
pub const INITIAL_SEGMENTS: usize = 4;

/// Records added each time the unused list runs dry.
pub const DEFAULT_SEGMENT_BATCH: usize = 100;

/// A free byte range `[start, start + len)` plus its list links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First free address.
    pub start: usize,
    /// Length in bytes. Never zero while on the free list.
    pub len: usize,
    /// Previous record on the free list.
    pub prev: Option<SegmentId>,
    /// Next record on whichever list links this record.
    pub next: Option<SegmentId>,
}

impl Segment {
    const UNUSED: Segment = Segment {
        start: 0,
        len: 0,
        prev: None,
        next: None,
    };

    /// One past the last free address.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Allocator statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Records in the table (free list + unused list).
    pub capacity: usize,
    /// Records currently linked on the free list.
    pub live: usize,
    /// Highest `live` value observed.
    pub peak_live: usize,
}

impl std::fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seg_len={}, used_segs={}, peak_used_segs={}",
            self.capacity, self.live, self.peak_live
        )
    }
}

/// Owner of all segment records and both list heads.
#[derive(Debug)]
pub struct SegmentTable {
    records: Vec<Segment>,
    free_head: Option<SegmentId>,
    unused_head: Option<SegmentId>,
    batch: usize,
    live: usize,
    peak_live: usize,
}

impl SegmentTable {
    /// Create a table with [`INITIAL_SEGMENTS`] unused records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bookkeeping`](crate::Error::Bookkeeping) if the
    /// initial records cannot be allocated.
    pub fn new(batch: usize) -> Result<Self> {
        let mut table = Self {
            records: Vec::new(),
            free_head: None,
            unused_head: None,
            batch: batch.max(1),
            live: 0,
            peak_live: 0,
        };
        table.grow(INITIAL_SEGMENTS)?;
        Ok(table)
    }

    /// Add `count` records and push them on the unused list.
    ///
    /// Lower indices end up nearer the head, so they are handed out first.
    fn grow(&mut self, count: usize) -> Result<()> {
        let old_len = self.records.len();
        self.records.try_reserve_exact(count)?;
        self.records.resize(old_len + count, Segment::UNUSED);
        let mut next = self.unused_head;
        for id in (old_len..old_len + count).rev() {
            self.records[id].next = next;
            next = Some(id);
        }
        self.unused_head = next;
        tracing::trace!(capacity = self.records.len(), "segment table grown");
        Ok(())
    }

    /// Pop a record off the unused list, growing the table by one batch
    /// when the list is empty.
    ///
    /// The record is counted as live but not yet linked; the caller links it.
    pub fn take_unused(&mut self) -> Result<SegmentId> {
        if self.unused_head.is_none() {
            self.grow(self.batch)?;
        }
        let Some(id) = self.unused_head else {
            unreachable!("grow always pushes at least one record");
        };
        self.unused_head = self.records[id].next;
        self.records[id] = Segment::UNUSED;
        self.live += 1;
        self.peak_live = self.peak_live.max(self.live);
        Ok(id)
    }

    /// Unlink `id` from the free list and push it on the unused list.
    pub fn recycle(&mut self, id: SegmentId) {
        let Segment { prev, next, .. } = self.records[id];
        match prev {
            Some(p) => self.records[p].next = next,
            None => self.free_head = next,
        }
        if let Some(n) = next {
            self.records[n].prev = prev;
        }
        self.records[id] = Segment {
            next: self.unused_head,
            ..Segment::UNUSED
        };
        self.unused_head = Some(id);
        self.live -= 1;
    }

    /// Link an unlinked record between `prev` and `next` on the free list.
    ///
    /// `prev` and `next` must be adjacent on the list (or list ends).
    pub fn link(&mut self, id: SegmentId, prev: Option<SegmentId>, next: Option<SegmentId>) {
        self.records[id].prev = prev;
        self.records[id].next = next;
        match prev {
            Some(p) => self.records[p].next = Some(id),
            None => self.free_head = Some(id),
        }
        if let Some(n) = next {
            self.records[n].prev = Some(id);
        }
    }

    /// Head of the free list.
    #[inline]
    pub fn first(&self) -> Option<SegmentId> {
        self.free_head
    }

    /// Borrow a record.
    #[inline]
    pub fn get(&self, id: SegmentId) -> &Segment {
        &self.records[id]
    }

    /// Mutably borrow a record.
    #[inline]
    pub fn get_mut(&mut self, id: SegmentId) -> &mut Segment {
        &mut self.records[id]
    }

    /// Walk the free list in ascending address order.
    pub fn iter(&self) -> FreeListIter<'_> {
        FreeListIter {
            table: self,
            cur: self.free_head,
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.records.len(),
            live: self.live,
            peak_live: self.peak_live,
        }
    }
}

/// Iterator over `(id, segment)` pairs of the free list.
pub struct FreeListIter<'a> {
    table: &'a SegmentTable,
    cur: Option<SegmentId>,
}

impl<'a> Iterator for FreeListIter<'a> {
    type Item = (SegmentId, &'a Segment);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let seg = self.table.get(id);
        self.cur = seg.next;
        Some((id, seg))
    }
}
