//! Address-range bookkeeping for the managed low window.
//!
//! This module knows nothing about system calls. It answers one question:
//! which byte ranges of the window are free?
//!
//! # Architecture
//!
//! - [`Window`]: the fixed `[start, end)` range under management
//! - [`SegmentTable`]: owner of the segment records and their two lists
//! - [`PageArena`]: first-fit allocator with split, merge and in-place resize
//!
//! # Example
//!
//! ```rust
//! use lowmem::memory::{PageArena, Window};
//!
//! let mut arena = PageArena::new(Window::new(0x1000_0000, 0x1000).unwrap()).unwrap();
//! assert_eq!(arena.acquire(None, 0x1000).unwrap(), 0x1000_0000);
//! assert!(arena.acquire(None, 1).is_err());
//! ```

mod arena;
mod segment;
mod window;

pub use arena::{FreeRange, PageArena};
pub use segment::{
    ArenaStats, DEFAULT_SEGMENT_BATCH, INITIAL_SEGMENTS, Segment, SegmentId, SegmentTable,
};
pub use window::{GIB, KIB, LOW_4G, MIB, Window, align_down, align_up};
