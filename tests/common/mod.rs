//! Recording `SystemMap` double shared by the integration tests.

#![allow(dead_code)]

use lowmem::mapping::{MapRequest, RemapRequest, SystemMap};
use lowmem::{Error, Result};
use rustix::io::Errno;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub const PAGE: usize = 0x1000;
/// Where non-fixed, unhinted mappings "land".
pub const HIGH: usize = 0x7f00_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Map(MapRequest),
    Remap(RemapRequest),
    Unmap(usize, usize),
}

/// A fake kernel: records every call and fails on request.
#[derive(Debug, Default)]
pub struct MockSystem {
    calls: Mutex<Vec<Call>>,
    pub fail_map: AtomicBool,
    pub fail_remap: AtomicBool,
    pub fail_unmap: AtomicBool,
    /// Non-fixed hinted maps land at HIGH instead of the hint.
    pub misplace_hints: AtomicBool,
    pub brk: usize,
}

impl MockSystem {
    pub fn with_brk(brk: usize) -> Self {
        Self {
            brk,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<Call> {
        self.calls.lock().unwrap().last().copied()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SystemMap for MockSystem {
    unsafe fn map(&self, req: &MapRequest) -> Result<usize> {
        self.record(Call::Map(*req));
        if self.fail_map.load(Ordering::SeqCst) {
            return Err(Error::System(Errno::NOMEM));
        }
        if req.is_fixed() {
            return Ok(req.addr);
        }
        match req.hint() {
            Some(hint) if !self.misplace_hints.load(Ordering::SeqCst) => Ok(hint),
            _ => Ok(HIGH),
        }
    }

    unsafe fn remap(&self, req: &RemapRequest) -> Result<usize> {
        self.record(Call::Remap(*req));
        if self.fail_remap.load(Ordering::SeqCst) {
            return Err(Error::System(Errno::NOMEM));
        }
        match req.new_addr {
            Some(dest) if req.is_fixed() => Ok(dest),
            _ => Ok(req.old_addr),
        }
    }

    unsafe fn unmap(&self, addr: usize, len: usize) -> Result<()> {
        self.record(Call::Unmap(addr, len));
        if self.fail_unmap.load(Ordering::SeqCst) {
            return Err(Error::System(Errno::INVAL));
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        PAGE
    }

    fn program_break(&self) -> usize {
        self.brk
    }
}
