//! The process-wide interposer.
//!
//! Built lazily by the first mapping call. The fast path is one atomic load;
//! the first caller takes the init lock, re-checks, builds the interposer and
//! only then publishes the state.
//!
//! Building it allocates (config, logging, segment table), and allocation may
//! call `mmap` on the same thread. Such nested calls see the
//! thread-local `INITIALIZING` flag and are served by a static pass-through
//! interposer instead of deadlocking on the init lock.

use super::interposer::Interposer;
use super::system::RustixSystem;
use crate::config::LowMemConfig;
use crate::observability::{init_logging, init_metrics};
use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Lifecycle of the process-wide interposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InitState {
    /// No mapping call has happened yet.
    Uninitialized = 0,
    /// One thread is building the interposer.
    Initializing = 1,
    /// Window established.
    Ready = 2,
    /// Window unavailable or disabled; pass-through only.
    ReadyWithoutArena = 3,
}

impl InitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => InitState::Uninitialized,
            1 => InitState::Initializing,
            2 => InitState::Ready,
            _ => InitState::ReadyWithoutArena,
        }
    }

    /// Has initialization finished (with or without a window)?
    #[inline]
    pub fn is_ready(self) -> bool {
        matches!(self, InitState::Ready | InitState::ReadyWithoutArena)
    }
}

static STATE: AtomicU8 = AtomicU8::new(InitState::Uninitialized as u8);
static INIT_LOCK: Mutex<()> = Mutex::new(());
static INSTANCE: OnceLock<Interposer<RustixSystem>> = OnceLock::new();
static BOOTSTRAP: Interposer<RustixSystem> = Interposer::pass_through(RustixSystem);

thread_local! {
    static INITIALIZING: Cell<bool> = const { Cell::new(false) };
}

/// Current lifecycle state.
pub fn init_state() -> InitState {
    InitState::from_u8(STATE.load(Ordering::Acquire))
}

fn ready() -> Option<&'static Interposer<RustixSystem>> {
    if init_state().is_ready() {
        INSTANCE.get()
    } else {
        None
    }
}

/// The process-wide interposer, built on first use.
pub fn interposer() -> &'static Interposer<RustixSystem> {
    if let Some(instance) = ready() {
        return instance;
    }
    if INITIALIZING.with(Cell::get) {
        return &BOOTSTRAP;
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(instance) = ready() {
        return instance;
    }

    STATE.store(InitState::Initializing as u8, Ordering::Release);
    INITIALIZING.with(|flag| flag.set(true));

    let config = LowMemConfig::from_env();
    if let Some(filter) = config.log_filter.as_deref() {
        init_logging(filter);
    }
    init_metrics();
    let instance = INSTANCE.get_or_init(|| {
        #[cfg(test)]
        tests::BUILDS.fetch_add(1, Ordering::SeqCst);
        Interposer::initialize(RustixSystem, &config)
    });
    #[cfg(feature = "stats-at-exit")]
    register_exit_dump();

    INITIALIZING.with(|flag| flag.set(false));
    let state = if instance.has_arena() {
        InitState::Ready
    } else {
        InitState::ReadyWithoutArena
    };
    STATE.store(state as u8, Ordering::Release);
    instance
}

#[cfg(feature = "stats-at-exit")]
extern "C" fn dump_at_exit() {
    if let Some(instance) = ready() {
        let _ = instance.dump_stats(&mut std::io::stderr());
    }
}

/// Print the stats line to stderr when the process exits.
#[cfg(feature = "stats-at-exit")]
fn register_exit_dump() {
    // SAFETY: dump_at_exit is a plain function that only reads the published
    // instance.
    if unsafe { libc::atexit(dump_at_exit) } != 0 {
        tracing::warn!("could not register exit-time stats dump");
    }
}
