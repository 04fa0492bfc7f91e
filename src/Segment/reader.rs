// Monitor side of a segment: open by name, negotiate, drain records.
//
// The transport core only needs the producer side; this reader is the
// counterpart used by monitors, tools and the integration tests.

use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use super::cursor::RingArea;
use super::layout::{
    data_offset, region_size, str_from_padded, ChildState, Lifecycle, ReaderState, SegmentHeader,
    LAYOUT_VERSION, MAGIC_NUMBER, RECORD_HEADER_SIZE, VAR_LEN_SIZE,
};
use crate::error::ReaderError;
use crate::Core::SharedMemory::{attach_shared_memory, SharedMemoryBackend};
use crate::Hierarchy::child::child_name;
use crate::Schema::registry::{EventKindId, Signature, KIND_DECLINED};

/// A declared event as read from a segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredEvent {
    pub name: String,
    pub signature: Signature,
    pub fixed_size: usize,
    pub kind: EventKindId,
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: EventKindId,
    pub id: u64,
    /// Fixed payload bytes in signature order.
    pub fixed: Vec<u8>,
    /// Variable fields in signature order.
    pub variable: Vec<Vec<u8>>,
}

impl Record {
    pub fn fixed_u64(&self, offset: usize) -> Option<u64> {
        let bytes = self.fixed.get(offset..offset + 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn variable_str(&self, index: usize) -> Option<&str> {
        std::str::from_utf8(self.variable.get(index)?).ok()
    }
}

/// A live child segment announced in a top-level header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    pub unit_id: u64,
    pub name: String,
}

/// Monitor-side view of one segment.
pub struct SegmentReader {
    shm: Box<dyn SharedMemoryBackend>,
    header: *const SegmentHeader,
    ring: RingArea,
    name: String,
    events: Vec<DeclaredEvent>,
    attached: bool,
}

unsafe impl Send for SegmentReader {}

impl SegmentReader {
    /// Open the segment `name` and read its declared schema.
    pub fn open(name: &str) -> Result<Self, ReaderError> {
        let shm = attach_shared_memory(name, data_offset()).map_err(|source| ReaderError::Open {
            name: name.to_string(),
            source,
        })?;

        let header = shm.as_ptr() as *const SegmentHeader;
        let h = unsafe { &*header };
        if h.magic.load(Acquire) != MAGIC_NUMBER {
            return Err(ReaderError::BadMagic {
                name: name.to_string(),
            });
        }
        if h.version != LAYOUT_VERSION {
            return Err(ReaderError::VersionMismatch {
                expected: LAYOUT_VERSION,
                found: h.version,
            });
        }
        let capacity = h.capacity as usize;
        if capacity == 0 || shm.size() < region_size(capacity) {
            return Err(ReaderError::Corrupt {
                position: 0,
                reason: format!("region of {} bytes cannot hold capacity {}", shm.size(), capacity),
            });
        }

        let count = (h.event_count as usize).min(h.events.len());
        let mut events = Vec::with_capacity(count);
        for entry in &h.events[..count] {
            let event_name = str_from_padded(&entry.name).to_string();
            let sig_len = (entry.signature_len as usize).min(entry.signature.len());
            let sig_text = std::str::from_utf8(&entry.signature[..sig_len]).unwrap_or("?");
            let signature = Signature::parse(&event_name, sig_text).map_err(|e| ReaderError::Corrupt {
                position: 0,
                reason: e.to_string(),
            })?;
            events.push(DeclaredEvent {
                name: event_name,
                fixed_size: entry.fixed_size as usize,
                kind: entry.kind.load(Acquire),
                signature,
            });
        }

        let ring = unsafe { RingArea::new(shm.as_ptr().add(data_offset()), capacity as u64) };
        Ok(Self {
            shm,
            header,
            ring,
            name: name.to_string(),
            events,
            attached: false,
        })
    }

    #[inline]
    fn header(&self) -> &SegmentHeader {
        unsafe { &*self.header }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity() as usize
    }

    /// Bytes mapped for this segment, header included.
    pub fn mapped_size(&self) -> usize {
        self.shm.size()
    }

    pub fn events(&self) -> &[DeclaredEvent] {
        &self.events
    }

    pub fn is_child(&self) -> bool {
        self.header().is_child != 0
    }

    /// Assign a kind to every declared event (0 declines it), then mark the
    /// monitor attached. Kinds are visible to the producer before the
    /// attached flag.
    pub fn negotiate<F>(&mut self, mut choose: F) -> Result<Vec<EventKindId>, ReaderError>
    where
        F: FnMut(&str, &Signature) -> EventKindId,
    {
        let kinds: Vec<EventKindId> = self
            .events
            .iter()
            .map(|e| choose(&e.name, &e.signature))
            .collect();
        self.accept(&kinds)?;
        Ok(kinds)
    }

    /// Negotiate with an explicit, order-preserving list of kinds.
    pub fn accept(&mut self, kinds: &[EventKindId]) -> Result<(), ReaderError> {
        if kinds.len() != self.events.len() {
            return Err(ReaderError::KindCount {
                expected: self.events.len(),
                got: kinds.len(),
            });
        }
        let h = unsafe { &*self.header };
        for ((entry, event), &kind) in h.events.iter().zip(&mut self.events).zip(kinds) {
            entry.kind.store(kind, Relaxed);
            event.kind = kind;
        }
        h.reader.store(ReaderState::Attached as u32, Release);
        self.attached = true;
        Ok(())
    }

    /// Attach to a segment whose kinds are already negotiated (children).
    pub fn attach(&mut self) {
        let h = unsafe { &*self.header };
        for (entry, event) in h.events.iter().zip(&mut self.events) {
            event.kind = entry.kind.load(Acquire);
        }
        h.reader.store(ReaderState::Attached as u32, Release);
        self.attached = true;
    }

    /// Mark the monitor gone. Producers spinning on this segment notice it at
    /// their next liveness check.
    pub fn detach(&mut self) {
        if self.attached {
            self.header()
                .reader
                .store(ReaderState::Detached as u32, Release);
            self.attached = false;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_destroyed(&self) -> bool {
        self.header().lifecycle() != Lifecycle::Active
    }

    /// Bytes published but not read yet.
    pub fn pending_bytes(&self) -> u64 {
        let h = self.header();
        h.write_cursor.load(Acquire) - h.read_cursor.load(Relaxed)
    }

    pub fn event_for_kind(&self, kind: EventKindId) -> Option<&DeclaredEvent> {
        if kind == KIND_DECLINED {
            return None;
        }
        self.events.iter().find(|e| e.kind == kind)
    }

    /// Decode and consume the next published record, if any.
    pub fn read_record(&mut self) -> Result<Option<Record>, ReaderError> {
        let h = self.header();
        let read = h.read_cursor.load(Relaxed);
        let write = h.write_cursor.load(Acquire);
        if read == write {
            return Ok(None);
        }

        let corrupt = |position: u64, reason: String| ReaderError::Corrupt { position, reason };
        if write - read < RECORD_HEADER_SIZE as u64 {
            return Err(corrupt(read, "truncated record header".into()));
        }

        let kind = self.ring.read_u64(read);
        let id = self.ring.read_u64(read + 8);
        let event = self
            .event_for_kind(kind)
            .ok_or_else(|| corrupt(read, format!("unknown kind {}", kind)))?;

        let mut pos = read + RECORD_HEADER_SIZE as u64;
        if pos + event.fixed_size as u64 > write {
            return Err(corrupt(read, "truncated fixed payload".into()));
        }
        let mut fixed = vec![0u8; event.fixed_size];
        self.ring.read(pos, &mut fixed);
        pos += event.fixed_size as u64;

        let var_count = event.signature.variable_count();
        let mut variable = Vec::with_capacity(var_count);
        for _ in 0..var_count {
            if pos + VAR_LEN_SIZE as u64 > write {
                return Err(corrupt(read, "truncated variable length".into()));
            }
            let len = self.ring.read_u32(pos) as u64;
            pos += VAR_LEN_SIZE as u64;
            if pos + len > write {
                return Err(corrupt(read, format!("variable field of {} bytes overruns", len)));
            }
            let mut data = vec![0u8; len as usize];
            self.ring.read(pos, &mut data);
            pos += len;
            variable.push(data);
        }

        h.read_cursor.store(pos, Release);
        Ok(Some(Record {
            kind,
            id,
            fixed,
            variable,
        }))
    }

    /// Read every record currently published.
    pub fn drain(&mut self) -> Result<Vec<Record>, ReaderError> {
        let mut out = Vec::new();
        while let Some(record) = self.read_record()? {
            out.push(record);
        }
        Ok(out)
    }

    /// Child segments currently registered as live in this header.
    pub fn children(&self) -> Vec<ChildInfo> {
        self.header()
            .children
            .iter()
            .filter(|c| ChildState::from_raw(c.state.load(Acquire)) == ChildState::Live)
            .map(|c| {
                let unit_id = c.unit_id.load(Relaxed);
                ChildInfo {
                    unit_id,
                    name: child_name(&self.name, unit_id),
                }
            })
            .collect()
    }

    /// Open and attach the child segment of `unit_id`.
    pub fn open_child(&self, unit_id: u64) -> Result<SegmentReader, ReaderError> {
        if !self.children().iter().any(|c| c.unit_id == unit_id) {
            return Err(ReaderError::UnknownChild(unit_id));
        }
        let mut child = SegmentReader::open(&child_name(&self.name, unit_id))?;
        child.attach();
        Ok(child)
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        self.detach();
    }
}
