// In demos/producer.rs
//
// Emits `<num_events>` events into the top segment and spreads the same
// number across four worker threads, each with its own child segment.
// Start `monitor` in another shell to attach.
use dmxp_eventring::Hierarchy::Emit;
use dmxp_eventring::Lifecycle::{EventTransport, TransportBuilder};
use dmxp_eventring::Schema::SchemaRegistry;
use sha2::{Digest, Sha256};
use std::env;
use std::sync::Arc;

const WORKERS: u64 = 4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <num_events>", args[0]);
        std::process::exit(1);
    }
    let num_events: u64 = args[1].parse()?;

    let schema = SchemaRegistry::define([
        ("unit_started", "t"),
        ("digest", "tS"),
        ("unit_finished", "tl"),
    ])?;

    println!("Producer: waiting for a monitor on the configured key...");
    let transport = Arc::new(EventTransport::startup(&schema, TransportBuilder::from_env().build())?);
    for (i, e) in transport.events().iter().enumerate() {
        println!("  [{}] {} ({}) -> kind {}", i, e.name, e.signature, e.assigned_kind);
    }

    let start = std::time::Instant::now();
    let handles: Vec<_> = (1..=WORKERS)
        .map(|unit| {
            let transport = Arc::clone(&transport);
            std::thread::spawn(move || -> Result<u64, String> {
                let ctx = transport.unit_context(unit).map_err(|e| e.to_string())?;
                let mut sent = 0u64;
                for i in (0..num_events).filter(|i| i % WORKERS == unit - 1) {
                    let emitted = ctx
                        .emit(1, |txn| {
                            let digest = Sha256::digest(format!("event_{}", i).as_bytes());
                            txn.push_u64(i).push_str(&format!("{:x}", digest))?;
                            Ok(())
                        })
                        .map_err(|e| e.to_string())?;
                    if let Emit::Emitted(_) = emitted {
                        sent += 1;
                    }
                }
                transport.release_unit(unit);
                Ok(sent)
            })
        })
        .collect();

    let top = transport.top_context();
    for unit in 1..=WORKERS {
        top.emit(0, |txn| {
            txn.push_u64(unit);
            Ok(())
        })?;
    }

    let mut sent = 0;
    for (unit, handle) in (1..=WORKERS).zip(handles) {
        match handle.join() {
            Ok(Ok(n)) => {
                sent += n;
                top.emit(2, |txn| {
                    txn.push_u64(unit).push_i64(n as i64);
                    Ok(())
                })?;
            }
            Ok(Err(e)) => eprintln!("Producer: unit {} stopped: {}", unit, e),
            Err(_) => eprintln!("Producer: unit {} panicked", unit),
        }
    }

    let elapsed = start.elapsed();
    println!("Producer: Sent {} events in {:.2?}", sent, elapsed);
    println!(
        "Producer: Throughput: {:.2} events/sec",
        sent as f64 / elapsed.as_secs_f64()
    );

    let report = transport.teardown();
    println!("Producer: {:?}", report);
    Ok(())
}
