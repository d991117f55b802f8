//! The real mapping calls.
//!
//! [`SystemMap`] is the seam between routing and the kernel. The production
//! implementation, [`RustixSystem`], issues raw system calls through rustix,
//! so it stays reachable even while this library exports `mmap` and friends
//! under their libc names.

use super::request::{MAP_ANONYMOUS, MREMAP_FIXED, MapRequest, RemapRequest};
use crate::error::{Error, Result};
use rustix::fd::BorrowedFd;
use rustix::io::Errno;
use rustix::mm::{MapFlags, MremapFlags, ProtFlags};
use std::ffi::c_void;

/// Real address-space operations plus the process facts routing needs.
///
/// # Safety
///
/// The mapping methods change the process address space. Callers must own
/// every range they map over, remap or unmap.
pub trait SystemMap: Send + Sync {
    /// Perform `mmap` exactly as requested.
    ///
    /// # Safety
    ///
    /// With `MAP_FIXED`, any existing mapping in the range is replaced.
    unsafe fn map(&self, req: &MapRequest) -> Result<usize>;

    /// Perform `mremap` exactly as requested.
    ///
    /// # Safety
    ///
    /// The old range must be a mapping owned by the caller.
    unsafe fn remap(&self, req: &RemapRequest) -> Result<usize>;

    /// Perform `munmap`.
    ///
    /// # Safety
    ///
    /// Nothing may reference the range afterwards.
    unsafe fn unmap(&self, addr: usize, len: usize) -> Result<()>;

    /// The system page size.
    fn page_size(&self) -> usize;

    /// Current end of the program's data segment.
    fn program_break(&self) -> usize;
}

/// [`SystemMap`] backed by raw system calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustixSystem;

impl SystemMap for RustixSystem {
    unsafe fn map(&self, req: &MapRequest) -> Result<usize> {
        let prot = ProtFlags::from_bits_retain(req.prot as u32);
        let flags = MapFlags::from_bits_retain((req.flags & !MAP_ANONYMOUS) as u32);
        let addr = req.addr as *mut c_void;

        let ptr = if req.is_anonymous() {
            // SAFETY: Forwarded verbatim; the caller upholds the mmap contract.
            unsafe { rustix::mm::mmap_anonymous(addr, req.len, prot, flags)? }
        } else {
            if req.fd < 0 {
                return Err(Error::System(Errno::BADF));
            }
            // SAFETY: fd is non-negative and only borrowed for the call.
            let fd = unsafe { BorrowedFd::borrow_raw(req.fd) };
            // SAFETY: Forwarded verbatim; the caller upholds the mmap contract.
            unsafe { rustix::mm::mmap(addr, req.len, prot, flags, fd, req.offset)? }
        };
        Ok(ptr as usize)
    }

    unsafe fn remap(&self, req: &RemapRequest) -> Result<usize> {
        let flags = MremapFlags::from_bits_retain((req.flags & !MREMAP_FIXED) as u32);
        let old = req.old_addr as *mut c_void;

        let ptr = match req.new_addr {
            Some(dest) if req.is_fixed() => {
                // SAFETY: Forwarded verbatim; the caller owns the old range.
                unsafe {
                    rustix::mm::mremap_fixed(old, req.old_len, req.new_len, flags, dest as *mut c_void)?
                }
            }
            // SAFETY: Forwarded verbatim; the caller owns the old range.
            _ => unsafe { rustix::mm::mremap(old, req.old_len, req.new_len, flags)? },
        };
        Ok(ptr as usize)
    }

    unsafe fn unmap(&self, addr: usize, len: usize) -> Result<()> {
        // SAFETY: The caller guarantees nothing references the range.
        unsafe { rustix::mm::munmap(addr as *mut c_void, len)? };
        Ok(())
    }

    fn page_size(&self) -> usize {
        rustix::param::page_size()
    }

    fn program_break(&self) -> usize {
        // SAFETY: sbrk(0) only reads the current break.
        unsafe { libc::sbrk(0) as usize }
    }
}
