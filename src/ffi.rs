//! Exported `mmap` family for `LD_PRELOAD`.
//!
//! Only compiled with the `preload` feature. Each symbol shadows its libc
//! namesake, routes through the process-wide [`interposer`] and reports
//! failures the C way: `MAP_FAILED` or `-1` with `errno` set.

use crate::error::Error;
use crate::mapping::{MREMAP_FIXED, MapRequest, RemapRequest, interposer};
use libc::{c_int, c_void, off_t, off64_t, size_t};

fn set_errno(err: &Error) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = err.errno().raw_os_error() };
}

fn map_result(result: crate::Result<usize>) -> *mut c_void {
    match result {
        Ok(addr) => addr as *mut c_void,
        Err(e) => {
            set_errno(&e);
            libc::MAP_FAILED
        }
    }
}

unsafe fn map_common(
    addr: *mut c_void,
    length: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: u64,
) -> *mut c_void {
    let req = MapRequest {
        addr: addr as usize,
        len: length,
        prot,
        flags,
        fd,
        offset,
    };
    // SAFETY: The caller upholds the mmap(2) contract.
    map_result(unsafe { interposer().map(&req) })
}

/// `mmap(2)` replacement.
///
/// # Safety
///
/// Same contract as `mmap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    length: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    // SAFETY: Forwarded under the caller's contract.
    unsafe { map_common(addr, length, prot, flags, fd, offset as u64) }
}

/// `mmap64(2)` replacement.
///
/// # Safety
///
/// Same contract as `mmap64(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mmap64(
    addr: *mut c_void,
    length: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off64_t,
) -> *mut c_void {
    // SAFETY: Forwarded under the caller's contract.
    unsafe { map_common(addr, length, prot, flags, fd, offset as u64) }
}

/// `mremap(2)` replacement.
///
/// C declares this variadic; stable Rust cannot define variadic functions,
/// so the optional fifth argument is taken as a plain pointer. It is read
/// only when `MREMAP_FIXED` is set, which is exactly when callers pass it.
///
/// # Safety
///
/// Same contract as `mremap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mremap(
    old_address: *mut c_void,
    old_size: size_t,
    new_size: size_t,
    flags: c_int,
    new_address: *mut c_void,
) -> *mut c_void {
    let new_addr = (flags & MREMAP_FIXED != 0).then_some(new_address as usize);
    let req = RemapRequest {
        old_addr: old_address as usize,
        old_len: old_size,
        new_len: new_size,
        flags,
        new_addr,
    };
    // SAFETY: The caller upholds the mremap(2) contract.
    map_result(unsafe { interposer().remap(&req) })
}

/// `munmap(2)` replacement.
///
/// # Safety
///
/// Same contract as `munmap(2)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn munmap(addr: *mut c_void, length: size_t) -> c_int {
    // SAFETY: The caller upholds the munmap(2) contract.
    match unsafe { interposer().unmap(addr as usize, length) } {
        Ok(()) => 0,
        Err(e) => {
            set_errno(&e);
            -1
        }
    }
}

/// Print the arena statistics line to stderr.
#[unsafe(no_mangle)]
pub extern "C" fn lowmem_dump_stats() {
    let _ = interposer().dump_stats(&mut std::io::stderr());
}
