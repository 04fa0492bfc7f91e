use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Acquire;
use std::time::Duration;

use super::registry::{EventDeclaration, EventKindId, SchemaRegistry, KIND_DECLINED};
use crate::error::StartupError;
use crate::Segment::Segment::RingSegment;

/// Fill in `assigned_kind` from the kinds the monitor wrote back, in
/// declaration order.
///
/// Nonzero kinds must be unique; zero may repeat (every declined event).
pub fn apply_kinds(
    declarations: &[EventDeclaration],
    kinds: &[EventKindId],
) -> Result<Vec<EventDeclaration>, StartupError> {
    if kinds.len() != declarations.len() {
        return Err(StartupError::NegotiationFailed {
            reason: format!(
                "monitor answered {} kinds for {} declared events",
                kinds.len(),
                declarations.len()
            ),
        });
    }

    for (i, &kind) in kinds.iter().enumerate() {
        if kind == KIND_DECLINED {
            continue;
        }
        if let Some(j) = kinds[..i].iter().position(|&k| k == kind) {
            return Err(StartupError::NegotiationFailed {
                reason: format!(
                    "kind {} assigned to both '{}' and '{}'",
                    kind, declarations[j].name, declarations[i].name
                ),
            });
        }
    }

    Ok(declarations
        .iter()
        .zip(kinds)
        .map(|(decl, &kind)| EventDeclaration {
            assigned_kind: kind,
            ..decl.clone()
        })
        .collect())
}

/// Exchange `registry` with the monitor attaching to `segment`.
///
/// Blocks until the monitor has read the schema from the segment header and
/// written one kind per declaration back, then returns the declarations
/// with `assigned_kind` populated (zero for declined events). The segment
/// keeps its own copy, so transactions and child segments use the
/// negotiated kinds from here on.
pub fn negotiate(
    registry: &SchemaRegistry,
    segment: &mut RingSegment,
    timeout: Option<Duration>,
) -> Result<Vec<EventDeclaration>, StartupError> {
    negotiate_with(registry, segment, timeout, None)
}

/// [`negotiate`] with an optional cancellation flag for the attach wait.
pub fn negotiate_with(
    registry: &SchemaRegistry,
    segment: &mut RingSegment,
    timeout: Option<Duration>,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<EventDeclaration>, StartupError> {
    let header_count = segment.header().event_count as usize;
    if header_count != registry.len() {
        return Err(StartupError::NegotiationFailed {
            reason: format!(
                "segment '{}' carries {} events, registry declares {}",
                segment.name(),
                header_count,
                registry.len()
            ),
        });
    }

    segment.wait_for_reader_with(timeout, cancel)?;

    // The monitor stores kinds before flipping the reader word; the acquire
    // in wait_for_reader makes them visible here.
    let kinds: Vec<EventKindId> = segment.header().events[..header_count]
        .iter()
        .map(|e| e.kind.load(Acquire))
        .collect();

    if segment.is_destroyed() {
        return Err(StartupError::NegotiationFailed {
            reason: format!("segment '{}' destroyed during negotiation", segment.name()),
        });
    }

    let negotiated = apply_kinds(registry.events(), &kinds)?;
    let accepted = negotiated.iter().filter(|d| d.is_wanted()).count();
    tracing::info!(
        segment = %segment.name(),
        accepted,
        declined = negotiated.len() - accepted,
        "schema negotiated"
    );
    for decl in negotiated.iter().filter(|d| !d.is_wanted()) {
        tracing::debug!(event = %decl.name, "event declined by monitor");
    }

    segment.events = negotiated.clone();
    Ok(negotiated)
}
