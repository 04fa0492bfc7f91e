use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use parking_lot::Mutex;

use super::child::release_child;
use crate::error::SegmentCreateError;
use crate::Segment::Segment::{RingSegment, SegmentCounters};

/// Slot holding one unit's child once created. Its own lock serializes
/// creation for that unit only.
type UnitSlot = Arc<Mutex<Option<Arc<RingSegment>>>>;

/// Producer unit -> its child segment, for all children of one top-level
/// segment.
///
/// The map lock only covers slot lookup and removal. Creating a child runs
/// under the unit's slot lock, so first use of different units proceeds in
/// parallel, and producing into a child never touches either lock.
pub struct SubBufferRegistry {
    parent: Arc<RingSegment>,
    child_capacity: usize,
    units: Mutex<HashMap<u64, UnitSlot>>,
    released_events: AtomicU64,
    released_waits: AtomicU64,
    released_count: AtomicU64,
}

impl SubBufferRegistry {
    pub fn new(parent: Arc<RingSegment>, child_capacity: usize) -> Self {
        Self {
            parent,
            child_capacity,
            units: Mutex::new(HashMap::new()),
            released_events: AtomicU64::new(0),
            released_waits: AtomicU64::new(0),
            released_count: AtomicU64::new(0),
        }
    }

    pub fn parent(&self) -> &Arc<RingSegment> {
        &self.parent
    }

    fn is_current(&self, unit_id: u64, slot: &UnitSlot) -> bool {
        self.units
            .lock()
            .get(&unit_id)
            .map_or(false, |s| Arc::ptr_eq(s, slot))
    }

    /// The child segment of `unit_id`, created on first use.
    ///
    /// Concurrent callers for the same unit get the same segment.
    pub fn get_or_create(&self, unit_id: u64) -> Result<Arc<RingSegment>, SegmentCreateError> {
        loop {
            let slot = Arc::clone(self.units.lock().entry(unit_id).or_default());
            let mut cell = slot.lock();
            if let Some(existing) = cell.as_ref() {
                return Ok(Arc::clone(existing));
            }
            // Released while we waited for the slot; start over.
            if !self.is_current(unit_id, &slot) {
                continue;
            }

            return match self.parent.create_child(unit_id, self.child_capacity) {
                Ok(child) => {
                    let child = Arc::new(child);
                    *cell = Some(Arc::clone(&child));
                    Ok(child)
                }
                Err(e) => {
                    let mut units = self.units.lock();
                    if units.get(&unit_id).map_or(false, |s| Arc::ptr_eq(s, &slot)) {
                        units.remove(&unit_id);
                    }
                    Err(e)
                }
            };
        }
    }

    pub fn get(&self, unit_id: u64) -> Option<Arc<RingSegment>> {
        let slot = self.units.lock().get(&unit_id).cloned()?;
        let child = slot.lock().clone();
        child
    }

    /// Destroy the child of `unit_id` and forget it. Returns its final
    /// counters, or `None` if the unit had no child.
    pub fn release(&self, unit_id: u64) -> Option<SegmentCounters> {
        let slot = self.units.lock().remove(&unit_id)?;
        let child = slot.lock().take()?;
        Some(self.retire(&child))
    }

    /// Destroy every child still registered. Returns the unit ids that
    /// were still live.
    pub fn release_all(&self) -> Vec<u64> {
        let drained: Vec<(u64, UnitSlot)> = self.units.lock().drain().collect();
        drained
            .into_iter()
            .filter_map(|(unit_id, slot)| {
                let child = slot.lock().take()?;
                self.retire(&child);
                Some(unit_id)
            })
            .collect()
    }

    /// Mark every registered child destroyed without releasing it.
    pub fn mark_all_destroyed(&self) {
        for (_, child) in self.live() {
            child.set_destroyed();
        }
    }

    fn retire(&self, child: &RingSegment) -> SegmentCounters {
        release_child(child);
        let stats = child.stats();
        self.released_events.fetch_add(stats.events, Relaxed);
        self.released_waits.fetch_add(stats.waits, Relaxed);
        self.released_count.fetch_add(1, Relaxed);
        stats
    }

    /// Units with a created child. Slot locks are taken after the map lock
    /// is dropped, never while holding it.
    fn live(&self) -> Vec<(u64, Arc<RingSegment>)> {
        let slots: Vec<(u64, UnitSlot)> = self
            .units
            .lock()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();
        slots
            .into_iter()
            .filter_map(|(id, slot)| {
                let child = slot.lock().clone()?;
                Some((id, child))
            })
            .collect()
    }

    pub fn unit_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.live().into_iter().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters of all children released so far.
    pub fn released_totals(&self) -> SegmentCounters {
        SegmentCounters {
            events: self.released_events.load(Relaxed),
            waits: self.released_waits.load(Relaxed),
        }
    }

    pub fn released_count(&self) -> u64 {
        self.released_count.load(Relaxed)
    }
}
