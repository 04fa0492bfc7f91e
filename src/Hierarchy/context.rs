use std::sync::Arc;

use crate::error::TransportError;
use crate::Schema::registry::EventDeclaration;
use crate::Segment::transaction::WriteTransaction;
use crate::Segment::Segment::RingSegment;

/// Outcome of [`ProducerUnitContext::emit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    /// Published with this record id.
    Emitted(u64),
    /// The monitor declined the kind; nothing was marshalled.
    Skipped,
}

/// Everything one producer unit needs to emit events: its own segment and
/// the negotiated schema.
///
/// Owned by the unit's task. It is not shared between units, so emitting
/// never contends with siblings.
pub struct ProducerUnitContext {
    unit_id: u64,
    segment: Arc<RingSegment>,
}

impl ProducerUnitContext {
    pub fn new(unit_id: u64, segment: Arc<RingSegment>) -> Self {
        Self { unit_id, segment }
    }

    pub fn unit_id(&self) -> u64 {
        self.unit_id
    }

    pub fn segment(&self) -> &Arc<RingSegment> {
        &self.segment
    }

    pub fn events(&self) -> &[EventDeclaration] {
        self.segment.events()
    }

    /// Whether the monitor wants event `index`. Check this before doing any
    /// work to produce the payload.
    #[inline]
    pub fn wants(&self, index: usize) -> bool {
        self.segment
            .events()
            .get(index)
            .map_or(false, EventDeclaration::is_wanted)
    }

    /// Emit one event of declaration `index`.
    ///
    /// `fill` pushes the payload; it is not called at all for a declined
    /// kind. Waits for space while the segment is full. If `fill` fails the
    /// record is discarded.
    pub fn emit<F>(&self, index: usize, fill: F) -> Result<Emit, TransportError>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<(), TransportError>,
    {
        let event = self
            .segment
            .events()
            .get(index)
            .ok_or(TransportError::UnknownEvent(index))?;
        if !event.is_wanted() {
            return Ok(Emit::Skipped);
        }

        let mut txn = self.segment.start_transaction_spin(event)?;
        fill(&mut txn)?;
        txn.finish().map(Emit::Emitted)
    }

    /// [`emit`](Self::emit) by event name.
    pub fn emit_named<F>(&self, name: &str, fill: F) -> Result<Emit, TransportError>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<(), TransportError>,
    {
        let index = self
            .segment
            .events()
            .iter()
            .position(|e| e.name == name)
            .ok_or(TransportError::UnknownEvent(usize::MAX))?;
        self.emit(index, fill)
    }

    pub fn is_monitor_gone(&self) -> bool {
        self.segment.monitor_gone()
    }
}
