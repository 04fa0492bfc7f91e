// Module naming follows project convention (Core / Segment / Lifecycle families)
#[allow(non_snake_case)]
pub mod Core {
    pub mod SharedMemory;
    pub use SharedMemory::{
        attach_shared_memory, create_shared_memory, unlink_shared_memory, RawHandle, SharedMemoryBackend,
    };
}

#[allow(non_snake_case)]
pub mod Schema {
    pub mod negotiate;
    pub mod registry;
    pub use negotiate::{apply_kinds, negotiate, negotiate_with};
    pub use registry::{EventDeclaration, EventKindId, FieldCode, SchemaRegistry, Signature, KIND_DECLINED}; // re-export for stable path
}

#[allow(non_snake_case)]
pub mod Segment {
    pub mod Segment;
    pub mod Segment_impl;
    mod backoff;
    pub mod cursor;
    mod debug;
    pub mod layout;
    pub mod reader;
    pub mod transaction;
    pub use reader::{ChildInfo, DeclaredEvent, Record, SegmentReader};
    pub use transaction::WriteTransaction;
    pub use Segment::{RingSegment, SegmentCounters, WaitPolicy}; // re-export for stable path
}

#[allow(non_snake_case)]
pub mod Hierarchy {
    pub mod child;
    pub mod context;
    pub mod registry;
    pub use child::{child_name, release_child};
    pub use context::{Emit, ProducerUnitContext};
    pub use registry::SubBufferRegistry;
}

#[allow(non_snake_case)]
pub mod Lifecycle {
    pub mod config;
    mod debug;
    pub mod emergency;
    pub mod manager;
    pub use config::{TransportBuilder, TransportConfig};
    pub use manager::{EventTransport, TeardownReport};
}

#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;
pub mod ffi;
