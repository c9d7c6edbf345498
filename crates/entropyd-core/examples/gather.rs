//! Basic gathering example.
//!
//! Drives two in-process sources through the scheduler for a second, then
//! withdraws conditioned entropy and prints it as hex.
//!
//! Run: `cargo run --example gather`

use std::time::Duration;

use entropyd_core::pool::{Pool, shared_pool};
use entropyd_core::source::{Fetcher, SourceSpec};
use entropyd_core::Scheduler;

#[tokio::main]
async fn main() {
    let pool = shared_pool(Pool::new(1024 * 1024, 64 * 1024));

    // A subprocess source and a callback source sharing one pool.
    let uptime = SourceSpec::new(
        "uptime",
        Fetcher::Command {
            argv: vec!["cat".into(), "/proc/uptime".into()],
        },
        Duration::from_millis(200),
    );
    let mut clock = SourceSpec::new(
        "clock_ns",
        Fetcher::Callback {
            producer: Box::new(|| {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default();
                Ok(now.as_nanos().to_le_bytes().to_vec())
            }),
        },
        Duration::from_millis(100),
    );
    clock.scale = 0.1; // a clock is mostly predictable

    let scheduler = Scheduler::start(pool.clone(), vec![uptime, clock]).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    scheduler.quiesce().await;

    let stats = pool.lock().unwrap().stats();
    println!(
        "Pool: {} bytes, {} bits in {} chunks",
        stats.total_bytes, stats.total_bits, stats.chunks
    );

    let (bytes, bits) = pool.lock().unwrap().withdraw(32);
    print!("Withdrew {} bytes ({bits} bits): ", bytes.len());
    for b in &bytes {
        print!("{b:02x}");
    }
    println!();
}
