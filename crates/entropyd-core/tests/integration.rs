//! End-to-end pipeline tests: scheduler → conditioner → pool → persistence.
//!
//! These run real source tasks against a shared pool with short intervals,
//! then restart against the same snapshot the way the daemon does.

use std::sync::Arc;
use std::time::Duration;

use entropyd_core::pool::{Pool, shared_pool};
use entropyd_core::source::{Fetcher, SourceSpec};
use entropyd_core::{Persister, Scheduler};

fn fast_callback(name: &str, blob: Vec<u8>) -> SourceSpec {
    let mut spec = SourceSpec::new(
        name,
        Fetcher::Callback {
            producer: Box::new(move || Ok(blob.clone())),
        },
        Duration::from_millis(10),
    );
    spec.compress = false;
    spec
}

#[tokio::test]
async fn pipeline_accumulates_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.snapshot");

    // First daemon life: gather from a callback source, snapshot, shut down.
    let pool = shared_pool(Pool::new(1 << 20, 4096));
    let persister = Arc::new(Persister::new(path.clone(), pool.clone()));
    assert!(!persister.load().unwrap(), "fresh directory has no snapshot");

    let scheduler = Scheduler::start(
        pool.clone(),
        vec![fast_callback("steady", (0u8..=255).collect())],
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.quiesce().await;
    persister.persist().unwrap();

    let stats = pool.lock().unwrap().stats();
    assert!(stats.total_bytes > 0);
    assert!(stats.total_bits > 0);

    // Second daemon life against the same file.
    let restored = shared_pool(Pool::new(1 << 20, 4096));
    let persister = Persister::new(path, restored.clone());
    assert!(persister.load().unwrap());
    assert_eq!(restored.lock().unwrap().stats(), stats);
}

#[tokio::test]
async fn failing_command_source_leaves_ledger_untouched() {
    let pool = shared_pool(Pool::new(1 << 20, 4096));
    let mut spec = SourceSpec::new(
        "always-fails",
        Fetcher::Command {
            argv: vec!["false".into()],
        },
        Duration::from_millis(10),
    );
    spec.compress = false;

    let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    let status = scheduler.status();
    scheduler.quiesce().await;

    let stats = pool.lock().unwrap().stats();
    assert_eq!(stats.total_bytes, 0);
    assert_eq!(stats.total_bits, 0);
    assert!(!status[0].healthy);
    assert!(status[0].consecutive_failures >= 1);
}

#[tokio::test]
async fn command_source_stdout_reaches_pool() {
    let pool = shared_pool(Pool::new(1 << 20, 4096));
    let mut spec = SourceSpec::new(
        "dates",
        Fetcher::Command {
            argv: vec!["date".into(), "+%s%N".into()],
        },
        Duration::from_millis(20),
    );
    spec.compress = false;

    let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.quiesce().await;

    assert!(pool.lock().unwrap().stats().total_bytes > 0);
}

#[tokio::test]
async fn mixed_sources_share_one_pool() {
    let pool = shared_pool(Pool::new(1 << 20, 4096));
    let sources = vec![
        fast_callback("alpha", vec![0x11u8; 64]),
        fast_callback("beta", vec![0x22u8; 64]),
    ];

    let scheduler = Scheduler::start(pool.clone(), sources).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    let status = scheduler.status();
    scheduler.quiesce().await;

    assert_eq!(status.len(), 2);
    assert!(status.iter().all(|s| s.healthy));
    let contributed: u64 = status.iter().map(|s| s.total_bits).sum();
    // Both sources contributed, and the pool ledger never exceeds what the
    // sources were credited (eviction can only shrink it).
    assert!(status.iter().all(|s| s.total_bits > 0));
    assert!(pool.lock().unwrap().stats().total_bits <= contributed);
}

#[tokio::test]
async fn scaled_source_is_derated_in_the_ledger() {
    let pool = shared_pool(Pool::new(1 << 20, 4096));
    let mut spec = fast_callback("distrusted", vec![0x5Au8; 128]);
    spec.scale = 0.25;

    let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = scheduler.status();
    scheduler.quiesce().await;

    // Each 128-byte blob is worth 1024 raw bits, derated to 256.
    assert!(status[0].total_blobs > 0);
    assert_eq!(status[0].total_bits, status[0].total_blobs * 256);
}
