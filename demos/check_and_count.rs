//! Check-and-count walkthrough for bloomcount
//!
//! This example demonstrates:
//! - Opening the service, optionally from a JSON options file
//! - Recording new sub-keys and counting repeat ones
//! - Inspecting filter statistics as a collection grows
//! - Flushing everything
//!
//! Run with `RUST_LOG=debug` to see filter growth.

use anyhow::Context;
use bloomcount::counter::MemoryCounterStore;
use bloomcount::{BloomCounter, Options, Reply};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let options = match std::env::args().nth(1) {
        Some(path) => Options::from_json_file(&path)
            .with_context(|| format!("loading options from {}", path))?,
        None => Options::default().filter_dir("./demo_filters").capacity(1000),
    };

    let store = Arc::new(MemoryCounterStore::new());
    let counter = BloomCounter::open(options, store.clone()).context("opening bloomcount")?;
    println!("Commands: {:?}", counter.commands().names());

    // First sighting records, second sighting counts
    for visitor in ["alice", "bob", "alice", "carol", "alice", "bob"] {
        let count = counter.check_and_count(b"page:home", visitor.as_bytes())?;
        println!("page:home {:<6} => {}", visitor, count);
    }

    // The same protocol through the command surface
    let reply = counter.execute_raw("bf.hincr", &["page:about", "alice"])?;
    println!("bf.hincr page:about alice => {:?}", reply);

    // Grow one collection past a single page
    for i in 0..3500 {
        counter.check_and_count(b"events", format!("event-{}", i).as_bytes())?;
    }

    for stats in counter.registry().stats() {
        println!(
            "{:<12} pages={} count={} bytes={} est_fp={:.5} file={}",
            String::from_utf8_lossy(&stats.name),
            stats.pages,
            stats.count,
            stats.size_bytes,
            stats.estimated_false_positive_rate,
            stats.path.display()
        );
    }

    println!("alice on page:home counted {:?} times", store.get(b"page:home", b"alice"));

    let none: [&str; 0] = [];
    assert_eq!(counter.execute_raw("bf.flushall", &none)?, Reply::Ok);
    println!("Flushed; {} collections remain", counter.registry().len());

    Ok(())
}
