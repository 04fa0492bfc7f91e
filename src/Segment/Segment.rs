// One shared-memory ring segment: the producer-side handle.

use super::cursor::RingArea;
use super::layout::SegmentHeader;
use crate::Core::SharedMemory::SharedMemoryBackend;
use crate::Schema::registry::EventDeclaration;

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

/// Busy-wait behaviour when a segment is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Retries between two liveness checks of the monitor.
    pub check_interval: u32,
    /// Hard cap on retries of a single wait, if any.
    pub max_retries: Option<u64>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            check_interval: 5000,
            max_retries: None,
        }
    }
}

/// Counters kept per segment. Only the segment's writer updates them.
#[derive(Debug, Default)]
pub struct SegmentStats {
    pub(crate) committed: AtomicU64,
    pub(crate) waits: AtomicU64,
}

/// Snapshot of [`SegmentStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCounters {
    /// Records published by `finish`.
    pub events: u64,
    /// Busy-wait retries spent waiting for free space.
    pub waits: u64,
}

impl std::ops::AddAssign for SegmentCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.events += rhs.events;
        self.waits += rhs.waits;
    }
}

/// Link from a child segment to the slot it occupies in its parent's
/// child table.
pub(crate) struct ParentLink {
    pub(crate) segment: Arc<RingSegment>,
    pub(crate) slot: usize,
}

/// Producer-side handle to one ring segment.
///
/// ### Concurrency Design:
/// - **Writer**: exactly one [`WriteTransaction`](super::transaction::WriteTransaction)
///   may be open at a time; the `writer_busy` flag enforces it.
///   Publishing is a single release store of `write_cursor`.
/// - **Reader**: the monitor advances `read_cursor` with release; the writer
///   acquires it before reusing space, so unread bytes are never overwritten.
/// - **Teardown**: `set_destroyed`, `is_destroyed` and `destroy` may be
///   called from any thread at any time. The mapping itself is released
///   when the last handle is dropped, so no in-flight writer can touch
///   unmapped memory.
pub struct RingSegment {
    pub(crate) shm: Box<dyn SharedMemoryBackend>,
    pub(crate) header: *mut SegmentHeader,
    pub(crate) ring: RingArea,
    pub(crate) name: String,
    /// Schema as declared, with kinds filled in once negotiated.
    pub(crate) events: Vec<EventDeclaration>,
    pub(crate) policy: WaitPolicy,
    pub(crate) writer_busy: AtomicBool,
    /// Id of the last published record.
    pub(crate) last_id: AtomicU64,
    pub(crate) stats: SegmentStats,
    pub(crate) released: AtomicBool,
    pub(crate) emergency_slot: Option<usize>,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) unit_id: u64,
}

unsafe impl Send for RingSegment {}
unsafe impl Sync for RingSegment {}
