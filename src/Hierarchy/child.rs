// Child segments: one private ring per producer unit, registered in the
// parent's header so the monitor can discover them.

use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::Arc;

use crate::error::SegmentCreateError;
use crate::Core::SharedMemory::is_valid_name;
use crate::Segment::layout::{ChildState, MAX_CHILDREN};
use crate::Segment::Segment::{ParentLink, RingSegment};

/// Name of the child segment of `unit_id` under `parent`.
pub fn child_name(parent: &str, unit_id: u64) -> String {
    format!("{}.{}", parent, unit_id)
}

impl RingSegment {
    /// Create the child segment for producer unit `unit_id`.
    ///
    /// The child carries a copy of this segment's negotiated schema; nothing
    /// is re-negotiated. It shows up in [`children`](crate::Segment::reader::SegmentReader::children)
    /// once fully initialized.
    pub fn create_child(
        self: &Arc<Self>,
        unit_id: u64,
        capacity: usize,
    ) -> Result<RingSegment, SegmentCreateError> {
        if self.is_child() {
            return Err(SegmentCreateError::InvalidName {
                name: child_name(&self.name, unit_id),
            });
        }
        if self.is_destroyed() {
            return Err(SegmentCreateError::ParentDestroyed {
                parent: self.name.clone(),
            });
        }

        let name = child_name(&self.name, unit_id);
        if !is_valid_name(&name) {
            return Err(SegmentCreateError::InvalidName { name });
        }

        let slot = self.claim_child_slot(unit_id)?;
        let link = ParentLink {
            segment: Arc::clone(self),
            slot,
        };

        match RingSegment::create_region(&name, capacity, &self.events, Some(link), unit_id) {
            Ok(child) => {
                self.header().children[slot]
                    .state
                    .store(ChildState::Live as u32, Release);
                tracing::debug!(parent = %self.name, child = %name, unit_id, slot, "child segment created");
                Ok(child)
            }
            Err(e) => {
                self.header().children[slot]
                    .state
                    .store(ChildState::Free as u32, Release);
                Err(e)
            }
        }
    }

    fn claim_child_slot(&self, unit_id: u64) -> Result<usize, SegmentCreateError> {
        let table = &self.header().children;
        for (i, entry) in table.iter().enumerate() {
            for from in [ChildState::Free, ChildState::Released] {
                if entry
                    .state
                    .compare_exchange(from as u32, ChildState::Claimed as u32, AcqRel, Acquire)
                    .is_ok()
                {
                    entry.unit_id.store(unit_id, Relaxed);
                    return Ok(i);
                }
            }
        }
        Err(SegmentCreateError::TooManyChildren {
            parent: self.name.clone(),
            max: MAX_CHILDREN,
        })
    }

    /// Mark the child entry in `slot` released, if it still belongs to
    /// `unit_id`.
    pub(crate) fn release_child_slot(&self, slot: usize, unit_id: u64) {
        let Some(entry) = self.header().children.get(slot) else {
            return;
        };
        if entry.unit_id.load(Relaxed) != unit_id {
            return;
        }
        let _ = entry.state.compare_exchange(
            ChildState::Live as u32,
            ChildState::Released as u32,
            AcqRel,
            Acquire,
        );
    }

    /// Number of child entries currently live in this header.
    pub fn live_children(&self) -> usize {
        self.header()
            .children
            .iter()
            .filter(|c| ChildState::from_raw(c.state.load(Acquire)) == ChildState::Live)
            .count()
    }
}

/// Stop producing into `child` and destroy it.
///
/// A monitor in the middle of reading keeps its own mapping, so the bytes
/// it is looking at stay valid; it sees the segment as destroyed.
pub fn release_child(child: &RingSegment) {
    child.destroy();
    tracing::debug!(child = %child.name(), unit_id = child.unit_id(), stats = ?child.stats(), "child segment released");
}
