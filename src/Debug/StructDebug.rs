use std::fmt;

use crate::Hierarchy::context::ProducerUnitContext;
use crate::Hierarchy::registry::SubBufferRegistry;
use crate::Lifecycle::manager::EventTransport;
use crate::Segment::reader::SegmentReader;
use crate::Segment::transaction::WriteTransaction;
use crate::Segment::Segment::RingSegment;

/// Debug function for RingSegment
///
/// Shows the header location and the control words without touching the
/// data area.
pub fn debug_ring_segment(segment: &RingSegment, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let header = segment.header();
    f.debug_struct("RingSegment")
        .field("name", &segment.name())
        .field("header", &format_args!("{:p}", segment.header))
        .field("mapped", &segment.shm.size())
        .field("capacity", &segment.capacity())
        .field("unit_id", &segment.unit_id())
        .field("lifecycle", &header.lifecycle())
        .field("reader", &header.reader_state())
        .field("pending_bytes", &segment.pending_bytes())
        .field("last_id", &segment.last_id())
        .field("stats", &segment.stats())
        .finish()
}

/// Debug function for WriteTransaction
pub fn debug_write_transaction(txn: &WriteTransaction<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WriteTransaction")
        .field("event_id", &txn.event_id())
        .field("reservation_start", &txn.reservation_start())
        .field("reserved_len", &txn.reserved_len())
        .field("variable_left", &txn.remaining_variable_fields())
        .finish_non_exhaustive()
}

/// Debug function for SegmentReader
pub fn debug_segment_reader(reader: &SegmentReader, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SegmentReader")
        .field("name", &reader.name())
        .field("capacity", &reader.capacity())
        .field("mapped", &reader.mapped_size())
        .field("events", &reader.events().len())
        .field("attached", &reader.is_attached())
        .field("destroyed", &reader.is_destroyed())
        .field("pending_bytes", &reader.pending_bytes())
        .finish()
}

pub fn debug_sub_buffer_registry(registry: &SubBufferRegistry, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubBufferRegistry")
        .field("parent", &registry.parent().name())
        .field("units", &registry.unit_ids())
        .field("released", &registry.released_count())
        .finish()
}

pub fn debug_unit_context(ctx: &ProducerUnitContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProducerUnitContext")
        .field("unit_id", &ctx.unit_id())
        .field("segment", &ctx.segment().name())
        .finish()
}

pub fn debug_event_transport(transport: &EventTransport, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EventTransport")
        .field("key", &transport.config().key)
        .field("top", transport.top_segment())
        .field("units", &transport.unit_ids())
        .field("torn_down", &transport.is_torn_down())
        .finish()
}
