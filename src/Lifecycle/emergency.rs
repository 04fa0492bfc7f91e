// Process-wide registry of live segment headers for crash-time teardown.
//
// Everything reachable from `emergency_teardown` must be async-signal-safe:
// no allocation, no locks, no logging. Slots are plain atomics and segment
// names are read straight from the shared headers.

use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, SeqCst};
use std::sync::atomic::{AtomicPtr, AtomicUsize};
use std::sync::Once;

use lazy_static::lazy_static;

use crate::Core::SharedMemory::SHM_DIR;
use crate::Segment::layout::{SegmentHeader, NAME_BYTES};

/// Segments that can be tracked at once across all transports.
pub const MAX_TRACKED: usize = 1024;

lazy_static! {
    static ref SLOTS: Box<[AtomicPtr<SegmentHeader>]> = (0..MAX_TRACKED)
        .map(|_| AtomicPtr::new(ptr::null_mut()))
        .collect();
}

/// Emergency passes currently touching headers. `untrack` waits for this to
/// drain so a header is never unmapped under a running teardown.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

static FATAL_HANDLERS: Once = Once::new();
static INTERRUPT_HANDLER: Once = Once::new();

/// Register a live header. Returns the slot, or `None` when the table is
/// full (the segment then only gets the normal teardown path).
pub(crate) fn track(header: *mut SegmentHeader) -> Option<usize> {
    for (i, slot) in SLOTS.iter().enumerate() {
        if slot
            .compare_exchange(ptr::null_mut(), header, AcqRel, Acquire)
            .is_ok()
        {
            return Some(i);
        }
    }
    tracing::warn!(max = MAX_TRACKED, "emergency registry full; segment not covered by signal teardown");
    None
}

/// Remove a header before its mapping goes away.
pub(crate) fn untrack(slot: usize, header: *mut SegmentHeader) {
    // SeqCst pairs with `emergency_teardown`: either it sees the cleared
    // slot or we see its IN_FLIGHT increment.
    if let Some(s) = SLOTS.get(slot) {
        let _ = s.compare_exchange(header, ptr::null_mut(), SeqCst, SeqCst);
    }
    // Bounded: a signal landing on this very thread must not deadlock us.
    let mut spins = 0u32;
    while IN_FLIGHT.load(SeqCst) != 0 && spins < 1 << 20 {
        spins += 1;
        std::hint::spin_loop();
    }
}

/// Number of headers currently registered.
pub fn tracked_count() -> usize {
    SLOTS.iter().filter(|s| !s.load(Acquire).is_null()).count()
}

/// Mark every tracked segment destroyed and remove its name, children
/// before top-level segments. Safe to call from a signal handler and safe
/// to race with a normal teardown: each slot is claimed by exactly one
/// path.
pub fn emergency_teardown() {
    IN_FLIGHT.fetch_add(1, SeqCst);
    for children_pass in [true, false] {
        for slot in SLOTS.iter() {
            let header = slot.load(SeqCst);
            if header.is_null() {
                continue;
            }
            // Safety: a non-null slot points at a mapped header; `untrack`
            // clears the slot and waits for IN_FLIGHT before unmapping.
            let h = unsafe { &*header };
            if (h.is_child != 0) != children_pass {
                continue;
            }
            if slot
                .compare_exchange(header, ptr::null_mut(), SeqCst, SeqCst)
                .is_err()
            {
                continue;
            }
            h.begin_destroy();
            unlink_raw(&h.name);
            h.finish_destroy();
        }
    }
    IN_FLIGHT.fetch_sub(1, SeqCst);
}

/// `unlink("/dev/shm/<name>")` with the path assembled on the stack.
fn unlink_raw(name: &[u8; NAME_BYTES]) {
    let mut path = [0u8; 16 + NAME_BYTES];
    let dir = SHM_DIR.as_bytes();
    path[..dir.len()].copy_from_slice(dir);
    path[dir.len()] = b'/';
    let start = dir.len() + 1;
    let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_BYTES - 1);
    if len == 0 {
        return;
    }
    path[start..start + len].copy_from_slice(&name[..len]);
    unsafe {
        libc::unlink(path.as_ptr() as *const libc::c_char);
    }
}

extern "C" fn on_fatal_signal(sig: libc::c_int) {
    emergency_teardown();
    // SA_RESETHAND restored the default action; re-raise so the process
    // still dies of the original signal.
    unsafe {
        libc::raise(sig);
    }
}

/// Install handlers for crash signals (`SIGSEGV`, `SIGBUS`, `SIGABRT`) that
/// run [`emergency_teardown`] and then let the default action proceed.
/// Idempotent.
pub fn install_fatal_signal_handlers() {
    FATAL_HANDLERS.call_once(|| {
        lazy_static::initialize(&SLOTS);
        for sig in [libc::SIGSEGV, libc::SIGBUS, libc::SIGABRT] {
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = on_fatal_signal as usize;
                action.sa_flags = libc::SA_RESETHAND | libc::SA_NODEFER;
                libc::sigemptyset(&mut action.sa_mask);
                if libc::sigaction(sig, &action, ptr::null_mut()) != 0 {
                    tracing::warn!(
                        signal = sig,
                        error = %std::io::Error::last_os_error(),
                        "failed to install crash handler"
                    );
                }
            }
        }
        tracing::debug!("crash signal handlers installed");
    });
}

/// Install a Ctrl+C / SIGTERM handler that tears down every tracked
/// segment and exits with status 130. Idempotent; a handler installed by
/// someone else is left in place.
pub fn install_interrupt_handler() {
    INTERRUPT_HANDLER.call_once(|| {
        lazy_static::initialize(&SLOTS);
        let result = ctrlc::set_handler(|| {
            emergency_teardown();
            std::process::exit(130);
        });
        match result {
            Ok(()) => tracing::debug!("interrupt handler installed"),
            Err(e) => tracing::warn!(error = %e, "interrupt handler not installed"),
        }
    });
}
