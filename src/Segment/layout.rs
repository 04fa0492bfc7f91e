use crate::Schema::registry::{MAX_ARGS, MAX_EVENTS, MAX_NAME_LEN};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// "DMXP_EVT"
pub const MAGIC_NUMBER: u64 = 0x444D58505F455654;

/// Version of the shared layout below.
pub const LAYOUT_VERSION: u32 = 1;

/// Maximum number of child segments registered in one top-level header.
pub const MAX_CHILDREN: usize = 256;

/// Bytes reserved for a NUL-terminated name.
pub const NAME_BYTES: usize = MAX_NAME_LEN + 1;

/// Bytes of the `{kind, id}` prefix of every record.
pub const RECORD_HEADER_SIZE: usize = 16;

/// Bytes of the length word in front of each variable field.
pub const VAR_LEN_SIZE: usize = 4;

/// Segment lifecycle word. Transitions only move forward.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active = 0,
    Destroying = 1,
    Destroyed = 2,
}

impl Lifecycle {
    pub fn from_raw(v: u32) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Destroying,
            _ => Self::Destroyed,
        }
    }
}

/// Monitor attachment word.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Waiting = 0,
    Attached = 1,
    Detached = 2,
}

impl ReaderState {
    pub fn from_raw(v: u32) -> Self {
        match v {
            0 => Self::Waiting,
            1 => Self::Attached,
            _ => Self::Detached,
        }
    }
}

/// State of one entry in the child table.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Free = 0,
    Claimed = 1,
    Live = 2,
    Released = 3,
}

impl ChildState {
    pub fn from_raw(v: u32) -> Self {
        match v {
            0 => Self::Free,
            1 => Self::Claimed,
            2 => Self::Live,
            _ => Self::Released,
        }
    }
}

/// One declared event kind as seen by the monitor.
///
/// Written by the producer at creation; `kind` is written by the monitor
/// during negotiation (or copied from the parent for child segments).
#[repr(C)]
pub struct SchemaEntry {
    pub name: [u8; NAME_BYTES],
    pub signature: [u8; MAX_ARGS],
    pub signature_len: u32,
    /// Fixed payload bytes, excluding the record header.
    pub fixed_size: u32,
    pub kind: AtomicU64,
}

/// One child registration in the top-level header.
#[repr(C, align(64))]
pub struct ChildEntry {
    pub unit_id: AtomicU64,
    pub state: AtomicU32,
    pub _reserved: u32,
}

/// Control block at the very beginning of every segment region.
///
/// The circular data area starts at [`data_offset`] and is exactly
/// `capacity` bytes long. Cursors are monotonically increasing byte
/// positions; the physical offset is `cursor % capacity`.
#[repr(C, align(128))]
pub struct SegmentHeader {
    /// Identifies the region as an event segment. Written last by the
    /// creator, so a reader that sees it also sees the rest of the header.
    pub magic: AtomicU64,

    pub version: u32,

    /// [`Lifecycle`] as a raw word.
    pub lifecycle: AtomicU32,

    /// Size of the data area in bytes.
    pub capacity: u64,

    /// Number of valid entries in `events`.
    pub event_count: u32,

    /// [`ReaderState`] as a raw word.
    pub reader: AtomicU32,

    /// Non-zero for child segments.
    pub is_child: u32,

    pub _reserved: u32,

    /// Producer unit owning a child segment (0 for the top segment).
    pub unit_id: u64,

    /// Name of this segment, NUL-terminated.
    pub name: [u8; NAME_BYTES],

    /// Published end of committed data. Written only by the producer.
    pub write_cursor: CachePadded<AtomicU64>,

    /// End of consumed data. Written only by the monitor.
    pub read_cursor: CachePadded<AtomicU64>,

    pub events: [SchemaEntry; MAX_EVENTS],

    pub children: [ChildEntry; MAX_CHILDREN],
}

impl SegmentHeader {
    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_raw(self.lifecycle.load(Ordering::Acquire))
    }

    /// `Active -> Destroying`. Returns true only for the caller that made
    /// the transition; later calls are no-ops.
    #[inline]
    pub fn begin_destroy(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                Lifecycle::Active as u32,
                Lifecycle::Destroying as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    pub fn finish_destroy(&self) {
        self.lifecycle
            .store(Lifecycle::Destroyed as u32, Ordering::Release);
    }

    #[inline]
    pub fn reader_state(&self) -> ReaderState {
        ReaderState::from_raw(self.reader.load(Ordering::Acquire))
    }

    pub fn name_str(&self) -> &str {
        str_from_padded(&self.name)
    }
}

/// Byte offset of the data area from the start of the region.
#[inline]
pub const fn data_offset() -> usize {
    (std::mem::size_of::<SegmentHeader>() + 127) & !127
}

/// Total region size for a data area of `capacity` bytes.
#[inline]
pub const fn region_size(capacity: usize) -> usize {
    data_offset() + capacity
}

/// Copy `src` into a NUL-padded fixed buffer. `src` must leave room for
/// the terminator; callers validate lengths beforehand.
pub fn copy_padded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len().saturating_sub(1));
    dst[..n].copy_from_slice(&src[..n]);
    for b in &mut dst[n..] {
        *b = 0;
    }
}

pub fn str_from_padded(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}
