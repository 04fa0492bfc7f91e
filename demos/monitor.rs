// In demos/monitor.rs
//
// Attaches to the producer's top segment, accepts every declared event
// (kind = index + 1) and drains the top segment and all children until the
// producer tears down.
use dmxp_eventring::Segment::SegmentReader;
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let key = env::args()
        .nth(1)
        .or_else(|| env::var("DMXP_EVT_KEY").ok())
        .unwrap_or_else(|| "dmxp_events".to_string());

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })?;

    println!("Monitor: opening segment '{}'", key);
    let mut top = loop {
        match SegmentReader::open(&key) {
            Ok(reader) => break reader,
            Err(_) if running.load(Ordering::SeqCst) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(e.into()),
        }
    };

    let mut next_kind = 0;
    let kinds = top.negotiate(|name, signature| {
        next_kind += 1;
        println!("Monitor: accepting {}({}) as kind {}", name, signature, next_kind);
        next_kind
    })?;
    println!("Monitor: negotiated {} kinds", kinds.len());

    let mut children: HashMap<u64, SegmentReader> = HashMap::new();
    let mut counts: HashMap<String, u64> = HashMap::new();

    while running.load(Ordering::SeqCst) {
        let mut idle = true;

        for record in top.drain()? {
            idle = false;
            let name = top.event_for_kind(record.kind).map(|e| e.name.clone());
            println!(
                "[top] #{} {} unit={:?}",
                record.id,
                name.as_deref().unwrap_or("?"),
                record.fixed_u64(0)
            );
        }

        for child in top.children() {
            if !children.contains_key(&child.unit_id) {
                if let Ok(reader) = top.open_child(child.unit_id) {
                    children.insert(child.unit_id, reader);
                }
            }
        }

        for reader in children.values_mut() {
            for record in reader.drain()? {
                idle = false;
                let name = reader
                    .event_for_kind(record.kind)
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                *counts.entry(name).or_default() += 1;
            }
        }
        children.retain(|_, r| !(r.is_destroyed() && r.pending_bytes() == 0));

        if top.is_destroyed() && children.is_empty() && top.pending_bytes() == 0 {
            break;
        }
        if idle {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    println!("Monitor: received per event: {:?}", counts);
    Ok(())
}
