// Ring segment transaction tests: reservation, framing, FIFO order,
// fullness and liveness.
// Run with: cargo test --test ring_segment -- --nocapture

mod common;

use common::{init_tracing, segment_with, unique_name};
use dmxp_eventring::error::TransportError;
use dmxp_eventring::Segment::{Record, SegmentReader, WaitPolicy};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_fills_then_reports_full_then_recovers() {
    let name = unique_name("rs_full");
    let segment = segment_with(&name, 256, &[("addr", "p")], &[7]);
    let addr = &segment.events()[0];

    // 16-byte record header + 8-byte pointer.
    let mut committed = 0;
    while let Some(mut txn) = segment.start_transaction(addr).unwrap() {
        txn.push_ptr(0x1000 + committed);
        txn.finish().unwrap();
        committed += 1;
    }
    assert_eq!(committed, 10);
    assert!(segment.start_transaction(addr).unwrap().is_none(), "full is not an error");

    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();
    let first = reader.read_record().unwrap().unwrap();
    assert_eq!(first.kind, 7);
    assert_eq!(first.id, 1);
    assert_eq!(first.fixed_u64(0), Some(0x1000));

    let mut txn = segment.start_transaction(addr).unwrap().expect("space after drain");
    txn.push_ptr(0xbeef);
    assert_eq!(txn.finish().unwrap(), 11);

    let rest = reader.drain().unwrap();
    assert_eq!(rest.len(), 10);
    assert_eq!(rest.last().unwrap().fixed_u64(0), Some(0xbeef));
}

#[test]
fn test_records_carry_fixed_and_variable_fields() {
    let name = unique_name("rs_frame");
    let segment = segment_with(&name, 4096, &[("open", "iSl"), ("line", "L")], &[5, 6]);
    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();

    let mut txn = segment.start_transaction(&segment.events()[0]).unwrap().unwrap();
    txn.push_i32(3);
    txn.push_str("/etc/hosts").unwrap();
    txn.push_i64(-1);
    let id = txn.finish().unwrap();

    let mut txn = segment.start_transaction(&segment.events()[1]).unwrap().unwrap();
    txn.push_str("").unwrap();
    txn.finish().unwrap();

    let records = reader.drain().unwrap();
    assert_eq!(records.len(), 2);

    let open = &records[0];
    assert_eq!((open.kind, open.id), (5, id));
    assert_eq!(&open.fixed[..4], &3i32.to_le_bytes());
    assert_eq!(&open.fixed[4..], &(-1i64).to_le_bytes());
    assert_eq!(open.variable_str(0), Some("/etc/hosts"));

    assert_eq!(records[1].kind, 6);
    assert_eq!(records[1].variable, vec![Vec::<u8>::new()]);
}

#[test]
fn test_unfilled_fields_are_zeroed_and_empty() {
    let name = unique_name("rs_unfilled");
    let segment = segment_with(&name, 1024, &[("ev", "lSS")], &[1]);
    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();

    let txn = segment.start_transaction(&segment.events()[0]).unwrap().unwrap();
    txn.finish().unwrap();

    let record = reader.read_record().unwrap().unwrap();
    assert_eq!(record.fixed, vec![0u8; 8]);
    assert_eq!(record.variable, vec![Vec::<u8>::new(), Vec::new()]);
}

#[test]
fn test_variable_field_wraps_around_ring_end() {
    let name = unique_name("rs_wrap");
    let segment = segment_with(&name, 64, &[("msg", "S")], &[2]);
    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();
    let msg = &segment.events()[0];

    // Each record is 16 + 4 + 30 = 50 bytes, so the second one straddles
    // the end of the 64-byte area.
    for round in 0..5u8 {
        let payload = vec![b'a' + round; 30];
        let mut txn = segment.start_transaction(msg).unwrap().unwrap();
        txn.push_variable(&payload).unwrap();
        txn.finish().unwrap();

        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.id, round as u64 + 1);
        assert_eq!(record.variable[0], payload);
    }
}

#[test]
fn test_fifo_with_concurrent_reader() {
    init_tracing();
    let name = unique_name("rs_fifo");
    let segment = Arc::new(segment_with(&name, 2048, &[("blob", "tS")], &[9]));
    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();

    const COUNT: u64 = 3000;
    let seed = fastrand::u64(..);
    println!("seed: {seed}");

    let producer = {
        let segment = Arc::clone(&segment);
        std::thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(seed);
            let blob = &segment.events()[0];
            for i in 0..COUNT {
                let len = rng.usize(0..400);
                let payload: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
                let mut txn = segment.start_transaction_spin(blob).unwrap();
                txn.push_u64(i);
                txn.push_variable(&payload).unwrap();
                txn.finish().unwrap();
            }
        })
    };

    let mut rng = fastrand::Rng::with_seed(seed);
    let mut expected = 0u64;
    while expected < COUNT {
        match reader.read_record().unwrap() {
            Some(Record { kind, id, fixed, variable }) => {
                let len = rng.usize(0..400);
                let payload: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
                assert_eq!(kind, 9);
                assert_eq!(id, expected + 1, "records must arrive in commit order");
                assert_eq!(u64::from_le_bytes(fixed[..8].try_into().unwrap()), expected);
                assert_eq!(
                    Sha256::digest(&variable[0]),
                    Sha256::digest(&payload),
                    "payload {} corrupted",
                    expected
                );
                expected += 1;
            }
            None => std::hint::spin_loop(),
        }
    }

    producer.join().unwrap();
    assert!(reader.read_record().unwrap().is_none(), "no duplicates");
    assert_eq!(segment.stats().events, COUNT);
}

#[test]
fn test_single_writer_per_segment() {
    let name = unique_name("rs_single");
    let segment = segment_with(&name, 1024, &[("x", "l")], &[1]);
    let x = &segment.events()[0];

    let txn = segment.start_transaction(x).unwrap().unwrap();
    assert!(format!("{txn:?}").contains("event_id: 1"));
    assert_eq!(
        segment.start_transaction(x).unwrap_err(),
        TransportError::TransactionInProgress
    );
    drop(txn);

    // Abandoned transaction published nothing and freed the writer.
    assert_eq!(segment.pending_bytes(), 0);
    let txn = segment.start_transaction(x).unwrap().unwrap();
    assert_eq!(txn.finish().unwrap(), 1);
}

#[test]
fn test_declined_kind_cannot_start() {
    let name = unique_name("rs_declined");
    let segment = segment_with(&name, 1024, &[("keep", "l"), ("skip", "l")], &[3, 0]);
    let err = segment.start_transaction(&segment.events()[1]).unwrap_err();
    assert_eq!(err, TransportError::KindDeclined { name: "skip".into() });
    assert_eq!(segment.pending_bytes(), 0);
}

#[test]
fn test_signature_mismatch() {
    let name = unique_name("rs_mismatch");
    let segment = segment_with(&name, 1024, &[("ev", "iS")], &[1]);
    let ev = &segment.events()[0];

    let mut txn = segment.start_transaction(ev).unwrap().unwrap();
    txn.push_str("one").unwrap();
    assert!(matches!(
        txn.push_str("two"),
        Err(TransportError::SignatureMismatch { .. })
    ));
    drop(txn);

    let mut txn = segment.start_transaction(ev).unwrap().unwrap();
    txn.push_u64(1); // 8 bytes into a 4-byte fixed portion
    assert!(matches!(txn.finish(), Err(TransportError::SignatureMismatch { .. })));
    assert_eq!(segment.pending_bytes(), 0);
}

#[test]
fn test_record_too_large() {
    let name = unique_name("rs_large");
    let segment = segment_with(&name, 128, &[("ev", "S")], &[1]);
    let mut txn = segment.start_transaction(&segment.events()[0]).unwrap().unwrap();
    assert!(matches!(
        txn.push_variable(&[0u8; 200]),
        Err(TransportError::RecordTooLarge { capacity: 128, .. })
    ));
}

#[test]
fn test_finish_after_destroy_publishes_nothing() {
    let name = unique_name("rs_destroyed");
    let segment = segment_with(&name, 1024, &[("ev", "l")], &[1]);
    let reader = SegmentReader::open(&name).unwrap();

    let mut txn = segment.start_transaction(&segment.events()[0]).unwrap().unwrap();
    txn.push_i64(42);
    segment.set_destroyed();
    assert_eq!(txn.finish().unwrap_err(), TransportError::MonitorGone);

    assert!(reader.is_destroyed());
    assert_eq!(reader.pending_bytes(), 0);
    assert_eq!(
        segment.start_transaction(&segment.events()[0]).unwrap_err(),
        TransportError::MonitorGone
    );
}

#[test]
fn test_spin_ends_when_destroyed() {
    init_tracing();
    let name = unique_name("rs_spin_destroy");
    let segment = Arc::new(segment_with(&name, 64, &[("ev", "l")], &[1]));
    let ev = segment.events()[0].clone();
    while let Some(txn) = segment.start_transaction(&ev).unwrap() {
        txn.finish().unwrap();
    }

    let killer = {
        let segment = Arc::clone(&segment);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            segment.set_destroyed();
        })
    };

    let err = segment.start_transaction_spin(&ev).unwrap_err();
    assert_eq!(err, TransportError::MonitorGone);
    killer.join().unwrap();
    assert!(segment.stats().waits > 0);
}

#[test]
fn test_spin_ends_when_monitor_detaches() {
    let name = unique_name("rs_spin_detach");
    let mut segment = segment_with(&name, 64, &[("ev", "l")], &[1]);
    segment.set_wait_policy(WaitPolicy {
        check_interval: 100,
        max_retries: None,
    });
    let ev = segment.events()[0].clone();

    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();
    while let Some(txn) = segment.start_transaction(&ev).unwrap() {
        txn.finish().unwrap();
    }
    drop(reader);

    assert_eq!(
        segment.start_transaction_spin(&ev).unwrap_err(),
        TransportError::MonitorGone
    );
    let waits = segment.stats().waits;
    assert!(waits >= 100 && waits < 200, "liveness checked every 100 retries, waited {waits}");
}

#[test]
fn test_spin_retry_limit() {
    let name = unique_name("rs_spin_limit");
    let mut segment = segment_with(&name, 64, &[("ev", "l")], &[1]);
    segment.set_wait_policy(WaitPolicy {
        check_interval: 1000,
        max_retries: Some(50),
    });
    let ev = segment.events()[0].clone();
    while let Some(txn) = segment.start_transaction(&ev).unwrap() {
        txn.finish().unwrap();
    }

    assert_eq!(
        segment.start_transaction_spin(&ev).unwrap_err(),
        TransportError::RetryLimit(50)
    );
}

#[test]
fn test_variable_push_waits_for_space() {
    let name = unique_name("rs_var_wait");
    let segment = Arc::new(segment_with(&name, 128, &[("ev", "S")], &[1]));
    let mut reader = SegmentReader::open(&name).unwrap();
    reader.attach();
    let ev = segment.events()[0].clone();

    // Leave 128 - 100 = 28 bytes free: enough to reserve (20) but not for
    // a 60-byte string.
    let mut txn = segment.start_transaction(&ev).unwrap().unwrap();
    txn.push_variable(&[1u8; 80]).unwrap();
    txn.finish().unwrap();

    let drainer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        let first = reader.read_record().unwrap().unwrap();
        assert_eq!(first.variable[0].len(), 80);
        loop {
            if let Some(second) = reader.read_record().unwrap() {
                return second;
            }
            std::hint::spin_loop();
        }
    });

    let mut txn = segment.start_transaction(&ev).unwrap().unwrap();
    txn.push_variable(&[2u8; 60]).unwrap();
    txn.finish().unwrap();

    let second = drainer.join().unwrap();
    assert_eq!(second.variable[0], vec![2u8; 60]);
}

#[test]
fn test_destroy_is_idempotent_and_unlinks() {
    let name = unique_name("rs_destroy");
    let segment = segment_with(&name, 256, &[("ev", "l")], &[1]);
    assert!(common::shm_exists(&name));

    segment.destroy();
    segment.destroy();
    assert!(segment.is_released());
    assert!(segment.is_destroyed());
    assert!(!common::shm_exists(&name));
    drop(segment);
}
