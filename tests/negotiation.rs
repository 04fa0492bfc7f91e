// Schema negotiation between a producer and an attaching monitor.
// Run with: cargo test --test negotiation -- --nocapture

mod common;

use common::{init_tracing, shm_exists, spawn_monitor, unique_name};
use dmxp_eventring::error::{AttachError, StartupError};
use dmxp_eventring::Hierarchy::Emit;
use dmxp_eventring::Lifecycle::{EventTransport, TransportBuilder};
use dmxp_eventring::Schema::{negotiate, SchemaRegistry};
use dmxp_eventring::Segment::RingSegment;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(name: &str) -> dmxp_eventring::Lifecycle::TransportConfig {
    TransportBuilder::new()
        .with_key(name)
        .with_capacity(4096)
        .with_attach_timeout(Duration::from_secs(5))
        .with_signal_handlers(false)
        .build()
}

#[test]
fn test_negotiate_returns_kinds_in_declaration_order() {
    init_tracing();
    let name = unique_name("neg_order");
    let schema = SchemaRegistry::define([("a", "l"), ("b", "S"), ("c", "tt")]).unwrap();
    let mut segment = RingSegment::create(&name, 1024, schema.events()).unwrap();
    assert!(segment.events().iter().all(|e| !e.is_wanted()));

    let monitor = std::thread::spawn({
        let name = name.clone();
        move || {
            let mut reader = common::open_when_ready(&name);
            let seen: Vec<String> = reader.events().iter().map(|e| e.name.clone()).collect();
            let kinds = reader
                .negotiate(|name, _| match name {
                    "a" => 11,
                    "c" => 13,
                    _ => 0,
                })
                .unwrap();
            (reader, seen, kinds)
        }
    });

    let negotiated = negotiate(&schema, &mut segment, Some(Duration::from_secs(5))).unwrap();
    let (_reader, seen, kinds) = monitor.join().unwrap();

    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(kinds, vec![11, 0, 13]);
    let assigned: Vec<u64> = negotiated.iter().map(|d| d.assigned_kind).collect();
    assert_eq!(assigned, kinds);
    assert_eq!(segment.events(), negotiated.as_slice());
}

#[test]
fn test_declined_kind_never_reaches_segment() {
    init_tracing();
    let name = unique_name("neg_declined");
    let schema = SchemaRegistry::define([("wanted", "l"), ("unwanted", "S")]).unwrap();

    let monitor = spawn_monitor(&name, vec![3, 0]);
    let transport = EventTransport::startup(&schema, config(&name)).unwrap();
    let mut reader = monitor.join().unwrap();

    assert_eq!(transport.events()[0].assigned_kind, 3);
    assert!(!transport.events()[1].is_wanted());

    let ctx = transport.top_context();
    assert!(ctx.wants(0));
    assert!(!ctx.wants(1));

    let emitted = ctx
        .emit(0, |txn| {
            txn.push_i64(1);
            Ok(())
        })
        .unwrap();
    assert_eq!(emitted, Emit::Emitted(1));

    let marshalled = AtomicBool::new(false);
    let skipped = ctx
        .emit(1, |txn| {
            marshalled.store(true, Ordering::SeqCst);
            txn.push_str("never")?;
            Ok(())
        })
        .unwrap();
    assert_eq!(skipped, Emit::Skipped);
    assert!(!marshalled.load(Ordering::SeqCst), "declined payload must not be built");

    let records = reader.drain().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, 3);
}

#[test]
fn test_attach_timeout_releases_segment() {
    let name = unique_name("neg_timeout");
    let schema = SchemaRegistry::define([("ev", "l")]).unwrap();
    let cfg = TransportBuilder::new()
        .with_key(&name)
        .with_capacity(1024)
        .with_attach_timeout(Duration::from_millis(30))
        .with_signal_handlers(false)
        .build();

    let err = EventTransport::startup(&schema, cfg).unwrap_err();
    assert!(matches!(
        err,
        StartupError::AttachFailed(AttachError::TimedOut(_))
    ));
    assert!(!shm_exists(&name), "failed startup must not leave the segment behind");
}

#[test]
fn test_attach_can_be_cancelled() {
    let name = unique_name("neg_cancel");
    let schema = SchemaRegistry::define([("ev", "l")]).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));

    let canceller = {
        let cancel = Arc::clone(&cancel);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.store(true, Ordering::SeqCst);
        })
    };

    let err = EventTransport::startup_with(&schema, config(&name), Some(&cancel)).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, StartupError::AttachFailed(AttachError::Interrupted)));
    assert!(!shm_exists(&name));
}

#[test]
fn test_duplicate_kinds_fail_negotiation() {
    let name = unique_name("neg_dup");
    let schema = SchemaRegistry::define([("a", "l"), ("b", "l")]).unwrap();

    let monitor = spawn_monitor(&name, vec![4, 4]);
    let err = EventTransport::startup(&schema, config(&name)).unwrap_err();
    let _reader = monitor.join().unwrap();

    assert!(matches!(err, StartupError::NegotiationFailed { .. }));
    assert!(!shm_exists(&name));
}

#[test]
fn test_name_collision_is_create_failure() {
    let name = unique_name("neg_collide");
    let schema = SchemaRegistry::define([("a", "l")]).unwrap();
    let _existing = RingSegment::create(&name, 1024, schema.events()).unwrap();

    let err = EventTransport::startup(&schema, config(&name)).unwrap_err();
    assert!(matches!(err, StartupError::CreateFailed(_)));
    assert!(shm_exists(&name), "the other owner's segment is untouched");
}
