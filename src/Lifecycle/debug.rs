use std::fmt;

use super::manager::EventTransport;
use crate::Hierarchy::context::ProducerUnitContext;
use crate::Hierarchy::registry::SubBufferRegistry;

impl fmt::Debug for EventTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_event_transport(self, f)
    }
}

impl fmt::Debug for SubBufferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_sub_buffer_registry(self, f)
    }
}

impl fmt::Debug for ProducerUnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_unit_context(self, f)
    }
}
