//! Mapping requests and the platform flags used to route them.
//!
//! Flags are kept as the raw `c_int` values callers pass; the interposer only
//! inspects and rewrites the few bits it routes on.

use libc::c_int;
use std::os::unix::io::RawFd;

/// `mmap` fixed-address flag.
pub const MAP_FIXED: c_int = libc::MAP_FIXED;

/// `mmap` fixed-address flag that fails with `EEXIST` instead of replacing.
#[cfg(target_os = "linux")]
pub const MAP_FIXED_NOREPLACE: c_int = libc::MAP_FIXED_NOREPLACE;

/// Platforms without `MAP_FIXED_NOREPLACE` never see the bit.
#[cfg(not(target_os = "linux"))]
pub const MAP_FIXED_NOREPLACE: c_int = 0;

/// `mmap` private flag.
pub const MAP_PRIVATE: c_int = libc::MAP_PRIVATE;
/// `mmap` shared flag.
pub const MAP_SHARED: c_int = libc::MAP_SHARED;
/// `mmap` anonymous flag.
pub const MAP_ANONYMOUS: c_int = libc::MAP_ANONYMOUS;
/// `mmap` no-swap-reservation flag.
pub const MAP_NORESERVE: c_int = libc::MAP_NORESERVE;

/// `mmap` low-address flag (x86_64 only).
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub const MAP_32BIT: c_int = libc::MAP_32BIT;

/// Platforms without `MAP_32BIT` route on the hint address alone.
#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
pub const MAP_32BIT: c_int = 0;

/// No access.
pub const PROT_NONE: c_int = libc::PROT_NONE;
/// Read access.
pub const PROT_READ: c_int = libc::PROT_READ;
/// Write access.
pub const PROT_WRITE: c_int = libc::PROT_WRITE;

/// `mremap` may-move flag.
pub const MREMAP_MAYMOVE: c_int = libc::MREMAP_MAYMOVE;
/// `mremap` fixed-destination flag.
pub const MREMAP_FIXED: c_int = libc::MREMAP_FIXED;

/// Which side handled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Served from the managed window.
    Arena,
    /// Forwarded to the real system call.
    System,
}

impl Route {
    /// Metric/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Arena => "arena",
            Route::System => "system",
        }
    }
}

/// Arguments of an `mmap`/`mmap64` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Address hint (0 for none).
    pub addr: usize,
    /// Length in bytes.
    pub len: usize,
    /// `PROT_*` bits.
    pub prot: c_int,
    /// `MAP_*` bits.
    pub flags: c_int,
    /// File descriptor (ignored for anonymous mappings).
    pub fd: RawFd,
    /// File offset.
    pub offset: u64,
}

impl MapRequest {
    /// An anonymous mapping request.
    pub fn anonymous(addr: usize, len: usize, prot: c_int, flags: c_int) -> Self {
        Self {
            addr,
            len,
            prot,
            flags: flags | MAP_ANONYMOUS,
            fd: -1,
            offset: 0,
        }
    }

    /// Does the caller ask for a low address?
    #[inline]
    pub fn wants_low(&self) -> bool {
        self.flags & MAP_32BIT != 0
    }

    /// Is the address exact (`MAP_FIXED` or `MAP_FIXED_NOREPLACE`)?
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.flags & (MAP_FIXED | MAP_FIXED_NOREPLACE) != 0
    }

    /// Must an existing mapping in the range make the call fail?
    #[inline]
    pub fn is_noreplace(&self) -> bool {
        self.flags & MAP_FIXED_NOREPLACE != 0
    }

    /// Is this an anonymous mapping?
    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.flags & MAP_ANONYMOUS != 0
    }

    /// The hint, if any.
    #[inline]
    pub fn hint(&self) -> Option<usize> {
        (self.addr != 0).then_some(self.addr)
    }

    /// The same request pinned at `addr` with `len` bytes.
    ///
    /// `MAP_32BIT` is dropped since the address is already chosen, and
    /// `MAP_FIXED_NOREPLACE` becomes `MAP_FIXED`: the range is covered by the
    /// window reservation, which the mapping has to replace.
    pub fn pinned_at(&self, addr: usize, len: usize) -> Self {
        Self {
            addr,
            len,
            flags: (self.flags & !(MAP_32BIT | MAP_FIXED_NOREPLACE)) | MAP_FIXED,
            ..*self
        }
    }
}

/// Arguments of an `mremap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapRequest {
    /// Current start address.
    pub old_addr: usize,
    /// Current length.
    pub old_len: usize,
    /// Requested length.
    pub new_len: usize,
    /// `MREMAP_*` bits.
    pub flags: c_int,
    /// Destination, meaningful only with `MREMAP_FIXED`.
    pub new_addr: Option<usize>,
}

impl RemapRequest {
    /// An in-place or may-move resize.
    pub fn new(old_addr: usize, old_len: usize, new_len: usize, flags: c_int) -> Self {
        Self {
            old_addr,
            old_len,
            new_len,
            flags,
            new_addr: None,
        }
    }

    /// A resize that moves to a fixed destination.
    pub fn fixed(old_addr: usize, old_len: usize, new_len: usize, flags: c_int, new_addr: usize) -> Self {
        Self {
            old_addr,
            old_len,
            new_len,
            flags: flags | MREMAP_FIXED | MREMAP_MAYMOVE,
            new_addr: Some(new_addr),
        }
    }

    /// Does the call demand a fixed destination?
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.flags & MREMAP_FIXED != 0
    }

    /// Is the kernel allowed to move the mapping?
    #[inline]
    pub fn may_move(&self) -> bool {
        self.flags & MREMAP_MAYMOVE != 0
    }
}
