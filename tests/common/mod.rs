// Helpers shared by the integration tests.
#![allow(dead_code)]

use dmxp_eventring::Schema::{EventDeclaration, SchemaRegistry};
use dmxp_eventring::Segment::RingSegment;

/// Segment name unique to this test process and `tag`, so test binaries
/// and tests inside one binary can run in parallel.
pub fn unique_name(tag: &str) -> String {
    let name = format!("evt_{}_{}", std::process::id(), tag);
    cleanup_shared_memory(&name);
    name
}

/// Remove a leftover region from an earlier aborted run.
pub fn cleanup_shared_memory(name: &str) {
    let _ = std::fs::remove_file(format!("/dev/shm/{}", name));
}

pub fn shm_exists(name: &str) -> bool {
    std::path::Path::new(&format!("/dev/shm/{}", name)).exists()
}

/// Declarations with the given kinds already assigned, as negotiation
/// would leave them.
pub fn negotiated(schema: &SchemaRegistry, kinds: &[u64]) -> Vec<EventDeclaration> {
    dmxp_eventring::Schema::apply_kinds(schema.events(), kinds).unwrap()
}

/// Create a segment whose schema is already negotiated with `kinds`.
pub fn segment_with(name: &str, capacity: usize, decls: &[(&str, &str)], kinds: &[u64]) -> RingSegment {
    let schema = SchemaRegistry::define(decls.iter().copied()).unwrap();
    RingSegment::create(name, capacity, &negotiated(&schema, kinds)).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open `name` as soon as it is fully initialized, retrying for up to
/// five seconds.
pub fn open_when_ready(name: &str) -> dmxp_eventring::Segment::SegmentReader {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        match dmxp_eventring::Segment::SegmentReader::open(name) {
            Ok(reader) => return reader,
            Err(e) if std::time::Instant::now() >= deadline => panic!("segment {name} never appeared: {e}"),
            Err(_) => std::thread::sleep(std::time::Duration::from_millis(1)),
        }
    }
}

/// Play the monitor: open `name`, answer `kinds` and hand the attached
/// reader back.
pub fn spawn_monitor(
    name: &str,
    kinds: Vec<u64>,
) -> std::thread::JoinHandle<dmxp_eventring::Segment::SegmentReader> {
    let name = name.to_string();
    std::thread::spawn(move || {
        let mut reader = open_when_ready(&name);
        reader.accept(&kinds).unwrap();
        reader
    })
}
