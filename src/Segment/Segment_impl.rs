use std::io;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::{Duration, Instant};

use super::backoff::Spin;
use super::cursor::RingArea;
use super::layout::{
    copy_padded, data_offset, region_size, Lifecycle, ReaderState, SegmentHeader, LAYOUT_VERSION,
    MAGIC_NUMBER, RECORD_HEADER_SIZE, VAR_LEN_SIZE,
};
use super::transaction::WriteTransaction;
use super::Segment::{ParentLink, RingSegment, SegmentCounters, SegmentStats, WaitPolicy};
use crate::error::{AttachError, SegmentCreateError, TransportError};
use crate::Core::SharedMemory::{create_shared_memory, unlink_shared_memory};
use crate::Lifecycle::emergency;
use crate::Schema::registry::EventDeclaration;

/// Smallest data area accepted for a segment.
pub const MIN_CAPACITY: usize = 64;

/// Bytes a record of `event` needs before any variable data is pushed:
/// the record header, the fixed payload and one length word per variable
/// field.
#[inline]
pub fn base_record_size(event: &EventDeclaration) -> usize {
    RECORD_HEADER_SIZE + event.computed_size + VAR_LEN_SIZE * event.signature.variable_count()
}

fn create_error(name: &str, e: io::Error) -> SegmentCreateError {
    match e.kind() {
        io::ErrorKind::AlreadyExists => SegmentCreateError::NameCollision {
            name: name.to_string(),
        },
        io::ErrorKind::InvalidInput => SegmentCreateError::InvalidName {
            name: name.to_string(),
        },
        _ => match e.raw_os_error() {
            Some(libc::ENOSPC) | Some(libc::ENOMEM) | Some(libc::EDQUOT) | Some(libc::EFBIG) => {
                SegmentCreateError::ResourceExhausted {
                    name: name.to_string(),
                    source: e,
                }
            }
            _ => SegmentCreateError::Io {
                name: name.to_string(),
                source: e,
            },
        },
    }
}

impl RingSegment {
    /// Create the shared region `name` with a data area of `capacity` bytes
    /// and write the schema into its header.
    ///
    /// Cursors start at zero, no reader is attached and the segment is
    /// active. Fails on a name collision or when the shared memory quota
    /// cannot back the region.
    pub fn create(
        name: &str,
        capacity: usize,
        declarations: &[EventDeclaration],
    ) -> Result<Self, SegmentCreateError> {
        Self::create_region(name, capacity, declarations, None, 0)
    }

    pub(crate) fn create_region(
        name: &str,
        capacity: usize,
        declarations: &[EventDeclaration],
        parent: Option<ParentLink>,
        unit_id: u64,
    ) -> Result<Self, SegmentCreateError> {
        let min = declarations
            .iter()
            .map(base_record_size)
            .max()
            .unwrap_or(0)
            .max(MIN_CAPACITY);
        if capacity < min {
            return Err(SegmentCreateError::CapacityTooSmall { capacity, min });
        }

        let shm = create_shared_memory(region_size(capacity), name)
            .map_err(|e| create_error(name, e))?;

        let header = shm.as_ptr() as *mut SegmentHeader;
        if (header as usize) % 128 != 0 {
            let _ = unlink_shared_memory(name);
            return Err(SegmentCreateError::Io {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidData, "Shared memory not properly aligned"),
            });
        }

        // The region is freshly created and zero-filled, which is a valid
        // state for every field. Nobody else can see it until `magic` is set.
        unsafe {
            let h = &mut *header;
            h.version = LAYOUT_VERSION;
            h.capacity = capacity as u64;
            h.event_count = declarations.len() as u32;
            h.is_child = parent.is_some() as u32;
            h.unit_id = unit_id;
            copy_padded(&mut h.name, name.as_bytes());

            for (entry, decl) in h.events.iter_mut().zip(declarations) {
                copy_padded(&mut entry.name, decl.name.as_bytes());
                let sig = decl.signature.to_string();
                entry.signature[..sig.len()].copy_from_slice(sig.as_bytes());
                entry.signature_len = sig.len() as u32;
                entry.fixed_size = decl.computed_size as u32;
                entry.kind.store(decl.assigned_kind, Relaxed);
            }

            h.magic.store(MAGIC_NUMBER, Release);
        }

        let ring = unsafe { RingArea::new(shm.as_ptr().add(data_offset()), capacity as u64) };
        let policy = parent
            .as_ref()
            .map(|p| p.segment.policy)
            .unwrap_or_default();
        let emergency_slot = emergency::track(header);

        tracing::info!(segment = %name, capacity, events = declarations.len(), "segment created");

        Ok(Self {
            shm,
            header,
            ring,
            name: name.to_string(),
            events: declarations.to_vec(),
            policy,
            writer_busy: AtomicBool::new(false),
            last_id: AtomicU64::new(0),
            stats: SegmentStats::default(),
            released: AtomicBool::new(false),
            emergency_slot,
            parent,
            unit_id,
        })
    }

    #[inline]
    pub(crate) fn header(&self) -> &SegmentHeader {
        // Safety: the header lives at the start of our mapping, which stays
        // mapped for as long as `self` exists.
        unsafe { &*self.header }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the circular data area in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity() as usize
    }

    /// The schema carried by this segment (kinds are zero until negotiated).
    pub fn events(&self) -> &[EventDeclaration] {
        &self.events
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.policy
    }

    pub fn set_wait_policy(&mut self, policy: WaitPolicy) {
        self.policy = policy;
    }

    /// Producer unit id of a child segment, 0 for a top-level one.
    pub fn unit_id(&self) -> u64 {
        self.unit_id
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Block until a monitor marks itself attached.
    pub fn wait_for_reader(&self, timeout: Option<Duration>) -> Result<(), AttachError> {
        self.wait_for_reader_with(timeout, None)
    }

    /// Like [`wait_for_reader`](Self::wait_for_reader), additionally giving
    /// up with `Interrupted` once `cancel` is set.
    ///
    /// Spins briefly, then sleep-polls at millisecond granularity. A segment
    /// marked destroyed (for instance by the signal path) also interrupts.
    pub fn wait_for_reader_with(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&AtomicBool>,
    ) -> Result<(), AttachError> {
        const SPINS_BEFORE_SLEEP: u32 = 1000;

        let start = Instant::now();
        let mut spins = 0u32;
        tracing::info!(segment = %self.name, "waiting for the monitor to attach");

        loop {
            match self.header().reader_state() {
                ReaderState::Attached => {
                    tracing::info!(segment = %self.name, waited = ?start.elapsed(), "monitor attached");
                    return Ok(());
                }
                ReaderState::Detached => return Err(AttachError::Interrupted),
                ReaderState::Waiting => {}
            }

            if self.is_destroyed() || cancel.map_or(false, |c| c.load(Acquire)) {
                return Err(AttachError::Interrupted);
            }

            let elapsed = start.elapsed();
            if let Some(limit) = timeout {
                if elapsed >= limit {
                    return Err(AttachError::TimedOut(limit));
                }
            }

            if spins < SPINS_BEFORE_SLEEP {
                spins += 1;
                std::hint::spin_loop();
            } else {
                let nap = timeout
                    .map(|t| t.saturating_sub(elapsed))
                    .unwrap_or(Duration::MAX)
                    .min(Duration::from_millis(1));
                std::thread::sleep(nap);
            }
        }
    }

    /// Try to reserve space for one record of `event`.
    ///
    /// Returns `Ok(None)` when the segment is currently full; the caller is
    /// expected to retry (see [`start_transaction_spin`](Self::start_transaction_spin)).
    /// On success the `{kind, id}` record header is already written.
    pub fn start_transaction<'a>(
        &'a self,
        event: &EventDeclaration,
    ) -> Result<Option<WriteTransaction<'a>>, TransportError> {
        let kind = event.kind().ok_or_else(|| TransportError::KindDeclined {
            name: event.name.clone(),
        })?;

        let header = self.header();
        if header.lifecycle() != Lifecycle::Active {
            return Err(TransportError::MonitorGone);
        }

        let base = base_record_size(event);
        let capacity = self.ring.capacity();
        if base as u64 > capacity {
            return Err(TransportError::RecordTooLarge {
                len: base,
                capacity: capacity as usize,
            });
        }

        if self
            .writer_busy
            .compare_exchange(false, true, Acquire, Relaxed)
            .is_err()
        {
            return Err(TransportError::TransactionInProgress);
        }

        // Only this writer moves write_cursor; the acquire on read_cursor
        // orders our overwrite after the monitor finished reading the space.
        let start = header.write_cursor.load(Relaxed);
        let limit = header.read_cursor.load(Acquire) + capacity;
        if start + base as u64 > limit {
            self.writer_busy.store(false, Release);
            return Ok(None);
        }

        let id = self.last_id.load(Relaxed) + 1;
        self.ring.write(start, &kind.to_le_bytes());
        self.ring.write(start + 8, &id.to_le_bytes());

        Ok(Some(WriteTransaction::new(self, event, start, id, limit)))
    }

    /// Reserve space for one record, busy-waiting while the segment is full.
    ///
    /// Liveness is re-checked every `check_interval` retries; a destroyed
    /// segment or a detached monitor ends the wait with `MonitorGone`.
    pub fn start_transaction_spin<'a>(
        &'a self,
        event: &EventDeclaration,
    ) -> Result<WriteTransaction<'a>, TransportError> {
        let mut spin = Spin::new(self);
        loop {
            if let Some(txn) = self.start_transaction(event)? {
                return Ok(txn);
            }
            spin.pause()?;
        }
    }

    /// Refresh the writable limit from the monitor's read cursor.
    #[inline]
    pub(crate) fn write_limit(&self) -> u64 {
        self.header().read_cursor.load(Acquire) + self.ring.capacity()
    }

    /// Publish everything up to `end`. The single release store is the
    /// point at which the record becomes visible to the monitor.
    #[inline]
    pub(crate) fn publish(&self, end: u64, id: u64) {
        self.header().write_cursor.store(end, Release);
        self.last_id.store(id, Relaxed);
        self.stats.committed.fetch_add(1, Relaxed);
    }

    #[inline]
    pub(crate) fn release_writer(&self) {
        self.writer_busy.store(false, Release);
    }

    pub fn is_reader_attached(&self) -> bool {
        self.header().reader_state() == ReaderState::Attached
    }

    /// Mark the segment destroyed. Idempotent; safe to call concurrently
    /// with an open transaction, whose `finish` then publishes nothing.
    pub fn set_destroyed(&self) {
        if self.header().begin_destroy() {
            tracing::debug!(segment = %self.name, "segment marked destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.header().lifecycle() != Lifecycle::Active
    }

    /// True when producing into this segment is pointless: it was destroyed
    /// or its monitor detached. A child also counts its parent, since the
    /// monitor may leave before it ever opens the child.
    pub fn monitor_gone(&self) -> bool {
        if self.is_destroyed() || self.header().reader_state() == ReaderState::Detached {
            return true;
        }
        self.parent
            .as_ref()
            .map_or(false, |link| link.segment.monitor_gone())
    }

    /// Release the segment: mark it destroyed, drop its child registration,
    /// and remove its name. Idempotent; the mapping goes away with the last
    /// handle.
    pub fn destroy(&self) {
        self.set_destroyed();
        if self.released.swap(true, AcqRel) {
            return;
        }

        if let Some(slot) = self.emergency_slot {
            emergency::untrack(slot, self.header);
        }
        if let Some(link) = &self.parent {
            link.segment.release_child_slot(link.slot, self.unit_id);
        }

        self.header().finish_destroy();
        if let Err(e) = unlink_shared_memory(&self.name) {
            tracing::warn!(segment = %self.name, error = %e, "failed to unlink segment");
        }
        tracing::debug!(segment = %self.name, stats = ?self.stats(), "segment destroyed");
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Acquire)
    }

    pub fn stats(&self) -> SegmentCounters {
        SegmentCounters {
            events: self.stats.committed.load(Relaxed),
            waits: self.stats.waits.load(Relaxed),
        }
    }

    pub(crate) fn record_waits(&self, n: u64) {
        self.stats.waits.fetch_add(n, Relaxed);
    }

    /// Id of the last published record (0 before the first one).
    pub fn last_id(&self) -> u64 {
        self.last_id.load(Relaxed)
    }

    /// Bytes written but not yet consumed by the monitor.
    pub fn pending_bytes(&self) -> u64 {
        let h = self.header();
        h.write_cursor.load(Acquire) - h.read_cursor.load(Acquire)
    }
}

impl Drop for RingSegment {
    fn drop(&mut self) {
        self.destroy();
    }
}
