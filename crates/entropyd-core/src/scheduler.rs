//! Drives every enabled source on its own cadence.
//!
//! One tokio task per source: wait out the init delay, then fetch →
//! `min_size` gate → condition → pool append, and sleep the configured
//! interval (±10% jitter) before the next attempt. The loop is strictly
//! serial per source, so there is never more than one in-flight fetch for a
//! source, and a slow fetch delays nobody else.
//!
//! Every failure path — fetch error, short blob, conditioner drop — is a
//! soft failure: logged with the source name, credited zero entropy, and
//! rescheduled. The scheduler never exits on source errors; it exits only
//! when [`Scheduler::quiesce`] flips the shutdown signal, at which point
//! in-flight I/O is abandoned and its partial result discarded.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::conditioning::condition;
use crate::error::{Error, Result};
use crate::pool::SharedPool;
use crate::source::{FETCH_TIMEOUT, SourceSpec, SourceState, SourceStatus};

/// Shared, lock-protected table of per-source health snapshots.
pub type StatusRegistry = Arc<Mutex<Vec<SourceStatus>>>;

/// Owns the per-source tasks and their shutdown signal.
pub struct Scheduler {
    tasks: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    registry: StatusRegistry,
}

impl Scheduler {
    /// Spawn one task per enabled source. Must run inside a tokio runtime.
    pub fn start(pool: SharedPool, sources: Vec<SourceSpec>) -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .use_rustls_tls()
            .build()?;
        let (shutdown, _) = watch::channel(false);

        let enabled: Vec<SourceSpec> = sources.into_iter().filter(|s| s.enabled).collect();
        let registry: StatusRegistry = Arc::new(Mutex::new(
            enabled
                .iter()
                .map(|s| SourceStatus::new(s.name.clone()))
                .collect(),
        ));

        let tasks = enabled
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| {
                tokio::spawn(run_source(
                    spec,
                    pool.clone(),
                    client.clone(),
                    shutdown.subscribe(),
                    registry.clone(),
                    idx,
                ))
            })
            .collect();

        Ok(Self {
            tasks,
            shutdown,
            registry,
        })
    }

    /// Handle to the health table, for the control channel.
    pub fn status_registry(&self) -> StatusRegistry {
        self.registry.clone()
    }

    /// Current health snapshot of every driven source.
    pub fn status(&self) -> Vec<SourceStatus> {
        self.registry.lock().unwrap().clone()
    }

    /// Signal shutdown and wait for every source task to finish.
    pub async fn quiesce(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        log::info!("scheduler quiesced");
    }
}

async fn run_source(
    spec: SourceSpec,
    pool: SharedPool,
    client: Client,
    mut shutdown: watch::Receiver<bool>,
    registry: StatusRegistry,
    idx: usize,
) {
    let mut state = SourceState::new(Instant::now() + spec.init_delay);
    if !sleep_until_or_shutdown(state.next_fire_at, &mut shutdown).await {
        return;
    }

    loop {
        let result = tokio::select! {
            r = spec.fetch(&client) => r,
            _ = shutdown.changed() => break,
        };

        match result.and_then(|blob| check_min_size(&spec, blob)) {
            Ok(blob) => {
                let conditioned = condition(&blob, spec.compress, spec.scale);
                if conditioned.bytes.is_empty() {
                    record_failure(&spec, &mut state, &registry, idx, "conditioner dropped blob");
                } else {
                    pool.lock()
                        .unwrap()
                        .append(&conditioned.bytes, conditioned.entropy_bits);
                    state.last_ok_at = Some(Instant::now());
                    state.consecutive_failures = 0;
                    record_success(&registry, idx, conditioned.entropy_bits);
                    log::debug!(
                        "source {}: {} raw bytes conditioned to {} bytes, {} bits credited",
                        spec.name,
                        blob.len(),
                        conditioned.bytes.len(),
                        conditioned.entropy_bits
                    );
                }
            }
            Err(e) => record_failure(&spec, &mut state, &registry, idx, &e.to_string()),
        }

        state.next_fire_at = Instant::now() + jittered(spec.interval);
        if !sleep_until_or_shutdown(state.next_fire_at, &mut shutdown).await {
            break;
        }
    }
}

fn check_min_size(spec: &SourceSpec, blob: Vec<u8>) -> Result<Vec<u8>> {
    let min = spec.min_size.unwrap_or(1);
    if blob.len() < min.max(1) {
        return Err(Error::BelowMinSize {
            got: blob.len(),
            min: min.max(1),
        });
    }
    Ok(blob)
}

fn record_success(registry: &StatusRegistry, idx: usize, bits: u64) {
    let mut table = registry.lock().unwrap();
    let row = &mut table[idx];
    row.healthy = true;
    row.consecutive_failures = 0;
    row.total_blobs += 1;
    row.total_bits += bits;
}

fn record_failure(
    spec: &SourceSpec,
    state: &mut SourceState,
    registry: &StatusRegistry,
    idx: usize,
    reason: &str,
) {
    state.consecutive_failures += 1;
    log::warn!(
        "source {}: {reason} ({} consecutive failures)",
        spec.name,
        state.consecutive_failures
    );
    let mut table = registry.lock().unwrap();
    let row = &mut table[idx];
    row.healthy = false;
    row.consecutive_failures = state.consecutive_failures;
}

/// Interval with ±10% jitter, so a fleet of sources with the same interval
/// does not fire in lockstep.
fn jittered(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(0.9..=1.1);
    interval.mul_f64(factor)
}

/// Sleep until `deadline`; `false` means shutdown fired first.
async fn sleep_until_or_shutdown(
    deadline: Instant,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(deadline.into()) => true,
        _ = shutdown.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, shared_pool};
    use crate::source::Fetcher;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn callback_spec(name: &str, interval_ms: u64, producer: crate::source::Producer) -> SourceSpec {
        let mut spec = SourceSpec::new(
            name,
            Fetcher::Callback { producer },
            Duration::from_millis(interval_ms),
        );
        spec.compress = false;
        spec
    }

    #[tokio::test]
    async fn callback_source_feeds_pool() {
        let pool = shared_pool(Pool::new(1 << 20, 4096));
        let spec = callback_spec("feeder", 10, Box::new(|| Ok(vec![0xABu8; 100])));

        let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.quiesce().await;

        let stats = pool.lock().unwrap().stats();
        assert!(stats.total_bytes > 0, "pool never received material");
        assert!(stats.total_bits > 0);
    }

    #[tokio::test]
    async fn failing_source_credits_nothing_and_keeps_running() {
        let pool = shared_pool(Pool::new(1 << 20, 4096));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_cb = calls.clone();
        let spec = callback_spec(
            "broken",
            5,
            Box::new(move || {
                calls_in_cb.fetch_add(1, Ordering::SeqCst);
                Err(Error::Callback("no bytes today".into()))
            }),
        );

        let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let status = scheduler.status();
        scheduler.quiesce().await;

        assert_eq!(pool.lock().unwrap().stats().total_bits, 0);
        assert!(calls.load(Ordering::SeqCst) >= 2, "scheduler stopped retrying");
        assert!(!status[0].healthy);
        assert!(status[0].consecutive_failures >= 2);
    }

    #[tokio::test]
    async fn min_size_gate_discards_short_blobs() {
        let pool = shared_pool(Pool::new(1 << 20, 4096));
        let mut spec = callback_spec("short", 5, Box::new(|| Ok(vec![1u8; 8])));
        spec.min_size = Some(64);

        let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.quiesce().await;

        assert_eq!(pool.lock().unwrap().stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn disabled_source_is_not_driven() {
        let pool = shared_pool(Pool::new(1 << 20, 4096));
        let mut spec = callback_spec("off", 1, Box::new(|| Ok(vec![7u8; 32])));
        spec.enabled = false;

        let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.status().is_empty());
        scheduler.quiesce().await;

        assert_eq!(pool.lock().unwrap().stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn init_delay_defers_first_fetch() {
        let pool = shared_pool(Pool::new(1 << 20, 4096));
        let mut spec = callback_spec("deferred", 5, Box::new(|| Ok(vec![1u8; 32])));
        spec.init_delay = Duration::from_secs(60);

        let scheduler = Scheduler::start(pool.clone(), vec![spec]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.quiesce().await;

        assert_eq!(pool.lock().unwrap().stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn successive_fetches_respect_interval() {
        let pool = shared_pool(Pool::new(1 << 20, 4096));
        let stamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let stamps_in_cb = stamps.clone();
        let spec = callback_spec(
            "cadence",
            50,
            Box::new(move || {
                stamps_in_cb.lock().unwrap().push(Instant::now());
                Ok(vec![3u8; 16])
            }),
        );

        let scheduler = Scheduler::start(pool, vec![spec]).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.quiesce().await;

        let stamps = stamps.lock().unwrap();
        assert!(stamps.len() >= 2, "expected at least two fetches");
        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            // 50ms interval with -10% jitter allowance.
            assert!(
                gap >= Duration::from_millis(44),
                "fetches only {gap:?} apart"
            );
        }
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let interval = Duration::from_secs(100);
        for _ in 0..200 {
            let j = jittered(interval);
            // Millisecond slack covers f64 rounding at the range edges.
            assert!(j >= Duration::from_millis(89_999), "{j:?}");
            assert!(j <= Duration::from_millis(110_001), "{j:?}");
        }
    }
}
