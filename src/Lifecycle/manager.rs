use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;

use super::config::TransportConfig;
use super::emergency;
use crate::error::{SegmentCreateError, StartupError};
use crate::Hierarchy::context::ProducerUnitContext;
use crate::Hierarchy::registry::SubBufferRegistry;
use crate::Schema::negotiate::negotiate_with;
use crate::Schema::registry::{EventDeclaration, SchemaRegistry};
use crate::Segment::Segment::{RingSegment, SegmentCounters};

/// Diagnostics returned by [`EventTransport::teardown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Records published across the top segment and every child.
    pub events: u64,
    /// Busy-wait retries spent waiting for space.
    pub waits: u64,
    /// Child segments destroyed over the transport's life.
    pub children_released: u64,
    /// Units still registered at teardown (never released by their owner).
    pub leaked_units: usize,
}

/// A negotiated top-level segment plus its per-unit children.
///
/// Dropping the transport tears it down.
pub struct EventTransport {
    config: TransportConfig,
    top: Arc<RingSegment>,
    units: SubBufferRegistry,
    report: Mutex<Option<TeardownReport>>,
}

impl EventTransport {
    /// Create the top segment, wait for the monitor and negotiate `schema`.
    ///
    /// On any failure the segment created so far is destroyed before the
    /// error is returned.
    pub fn startup(schema: &SchemaRegistry, config: TransportConfig) -> Result<Self, StartupError> {
        Self::startup_with(schema, config, None)
    }

    /// [`startup`](Self::startup) whose attach wait gives up once `cancel`
    /// is set.
    pub fn startup_with(
        schema: &SchemaRegistry,
        config: TransportConfig,
        cancel: Option<&AtomicBool>,
    ) -> Result<Self, StartupError> {
        if config.install_signal_handlers {
            emergency::install_fatal_signal_handlers();
            emergency::install_interrupt_handler();
        }

        let mut top = RingSegment::create(&config.key, config.capacity, schema.events())?;
        top.set_wait_policy(config.wait_policy);

        if let Err(e) = negotiate_with(schema, &mut top, config.attach_timeout, cancel) {
            tracing::warn!(segment = %config.key, error = %e, "startup failed; releasing segment");
            top.destroy();
            return Err(e);
        }

        let top = Arc::new(top);
        let units = SubBufferRegistry::new(Arc::clone(&top), config.child_capacity);
        tracing::info!(segment = %config.key, "transport started");
        Ok(Self {
            config,
            top,
            units,
            report: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The negotiated declarations; index `i` is the event passed to `emit`.
    pub fn events(&self) -> &[EventDeclaration] {
        self.top.events()
    }

    pub fn top_segment(&self) -> &Arc<RingSegment> {
        &self.top
    }

    /// Context for producing lifecycle/meta events into the top segment.
    /// Only one thread may emit into the top segment at a time.
    pub fn top_context(&self) -> ProducerUnitContext {
        ProducerUnitContext::new(0, Arc::clone(&self.top))
    }

    /// Context of producer unit `unit_id`, creating its child segment on
    /// first use.
    pub fn unit_context(&self, unit_id: u64) -> Result<ProducerUnitContext, SegmentCreateError> {
        let segment = self.units.get_or_create(unit_id)?;
        Ok(ProducerUnitContext::new(unit_id, segment))
    }

    /// Destroy the child segment of a unit that has finished.
    pub fn release_unit(&self, unit_id: u64) -> Option<SegmentCounters> {
        self.units.release(unit_id)
    }

    pub fn unit_ids(&self) -> Vec<u64> {
        self.units.unit_ids()
    }

    pub fn is_torn_down(&self) -> bool {
        self.report.lock().is_some()
    }

    /// Destroy every child, then the top segment, and report totals.
    ///
    /// Everything is marked destroyed before anything is released, so a
    /// unit in the middle of a transaction publishes nothing. Idempotent:
    /// later calls return the first report.
    pub fn teardown(&self) -> TeardownReport {
        let mut guard = self.report.lock();
        if let Some(report) = *guard {
            return report;
        }

        self.units.mark_all_destroyed();
        self.top.set_destroyed();

        let leaked = self.units.release_all();
        if !leaked.is_empty() {
            tracing::warn!(units = ?leaked, "units still live at teardown; released");
        }
        self.top.destroy();

        let mut totals = self.units.released_totals();
        totals += self.top.stats();
        let report = TeardownReport {
            events: totals.events,
            waits: totals.waits,
            children_released: self.units.released_count(),
            leaked_units: leaked.len(),
        };
        tracing::info!(
            segment = %self.config.key,
            events = report.events,
            waits = report.waits,
            children_released = report.children_released,
            "transport torn down"
        );
        *guard = Some(report);
        report
    }
}

impl Drop for EventTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}
