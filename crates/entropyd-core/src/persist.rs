//! Pool persistence: snapshot codec, atomic writer, pid lock.
//!
//! Entropy accumulated over days must survive a restart, so the pool is
//! serialized to an explicit, self-describing binary format:
//!
//! ```text
//! [8]  magic "ENTROPYD"
//! [4]  version (le u32)
//! [8]  chunk count K (le u64)
//! K ×  [8] len (le u64) · [8] entropy_bits (le u64) · [len] raw bytes
//! [32] SHA-256 of everything preceding
//! ```
//!
//! Writes go to `<path>.tmp` first, are fsynced, and land with a rename —
//! the standard atomic replacement primitive, so a torn snapshot is never
//! observable. Loads verify the trailer digest before parsing anything and
//! reject any structural inconsistency.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::pool::{Pool, SharedPool};

/// Snapshot file magic.
pub const MAGIC: [u8; 8] = *b"ENTROPYD";

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 1;

const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = 8 + 4 + 8;

/// Serialize the pool into the snapshot wire format.
pub fn encode_snapshot(pool: &Pool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(pool.stats().chunks as u64).to_le_bytes());
    for chunk in pool.chunks() {
        out.extend_from_slice(&(chunk.len_bytes() as u64).to_le_bytes());
        out.extend_from_slice(&chunk.entropy_bits().to_le_bytes());
        out.extend_from_slice(chunk.bytes());
    }
    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    out
}

/// Parse and validate a snapshot blob into `(bytes, entropy_bits)` chunk
/// parts. Structural validation only; cap checks happen when the parts are
/// installed into a pool.
pub fn decode_snapshot(data: &[u8]) -> Result<Vec<(Vec<u8>, u64)>> {
    if data.len() < HEADER_LEN + DIGEST_LEN {
        return Err(Error::Snapshot(format!("{} bytes is too short", data.len())));
    }

    let (body, trailer) = data.split_at(data.len() - DIGEST_LEN);
    let digest = Sha256::digest(body);
    if digest.as_slice() != trailer {
        return Err(Error::Snapshot("integrity digest mismatch".into()));
    }

    if body[..8] != MAGIC {
        return Err(Error::Snapshot("bad magic".into()));
    }
    let version = u32::from_le_bytes(body[8..12].try_into().expect("fixed slice"));
    if version != FORMAT_VERSION {
        return Err(Error::Snapshot(format!("unknown version {version}")));
    }
    let count = u64::from_le_bytes(body[12..20].try_into().expect("fixed slice"));

    let mut parts = Vec::new();
    let mut offset = HEADER_LEN;
    for i in 0..count {
        if body.len() - offset < 16 {
            return Err(Error::Snapshot(format!("truncated header for chunk {i}")));
        }
        let len = u64::from_le_bytes(body[offset..offset + 8].try_into().expect("fixed slice"));
        let bits =
            u64::from_le_bytes(body[offset + 8..offset + 16].try_into().expect("fixed slice"));
        offset += 16;

        let len = usize::try_from(len)
            .map_err(|_| Error::Snapshot(format!("chunk {i} length does not fit memory")))?;
        if body.len() - offset < len {
            return Err(Error::Snapshot(format!("truncated body for chunk {i}")));
        }
        parts.push((body[offset..offset + len].to_vec(), bits));
        offset += len;
    }
    if offset != body.len() {
        return Err(Error::Snapshot(format!(
            "{} trailing bytes after chunk table",
            body.len() - offset
        )));
    }

    Ok(parts)
}

/// Owns the persist path and snapshots the shared pool to it.
pub struct Persister {
    path: PathBuf,
    pool: SharedPool,
}

impl Persister {
    /// Persister writing to `path`.
    pub fn new(path: PathBuf, pool: SharedPool) -> Self {
        Self { path, pool }
    }

    /// The configured persist path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot the pool and atomically replace the persist file.
    ///
    /// The snapshot is encoded under the pool lock (pure memory); all file
    /// I/O happens after the lock is released.
    pub fn persist(&self) -> Result<PathBuf> {
        let blob = {
            let pool = self.pool.lock().unwrap();
            encode_snapshot(&pool)
        };

        let tmp = tmp_path(&self.path);
        let mut file = File::create(&tmp)?;
        file.write_all(&blob)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;

        log::info!(
            "persisted {} bytes to {}",
            blob.len(),
            self.path.display()
        );
        Ok(self.path.clone())
    }

    /// Install the persisted snapshot into the pool, if one exists.
    ///
    /// Returns `Ok(true)` when a snapshot was installed, `Ok(false)` when no
    /// file exists. A malformed or invariant-violating file is an error; the
    /// caller logs it and starts empty.
    pub fn load(&self) -> Result<bool> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let parts = decode_snapshot(&data)?;
        self.pool.lock().unwrap().install_chunks(parts)?;
        Ok(true)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Persist on a fixed cadence until the shutdown signal flips.
///
/// The blocking file write runs on the blocking thread pool so the timer
/// task never stalls the runtime.
pub fn spawn_persist_task(
    persister: std::sync::Arc<Persister>,
    every: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let persister = persister.clone();
                    match tokio::task::spawn_blocking(move || persister.persist()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => log::warn!("periodic persist failed: {e}"),
                        Err(e) => log::warn!("persist task panicked: {e}"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Pid marker preventing two daemon instances from interleaving writes to
/// the same persist file. Removed on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Record this process as the owner of `persist_file`.
    ///
    /// Refuses if a marker already exists, unless `force` steals it (for
    /// locks left behind by a crashed instance).
    pub fn acquire(persist_file: &Path, force: bool) -> Result<Self> {
        let path = pid_path(persist_file);
        if let Ok(existing) = fs::read_to_string(&path) {
            let pid = existing.trim().parse::<u32>().unwrap_or(0);
            if !force {
                return Err(Error::Locked { path, pid });
            }
            log::warn!("stealing pid lock {} from pid {pid}", path.display());
        }
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to remove pid lock {}: {e}", self.path.display());
        }
    }
}

fn pid_path(persist_file: &Path) -> PathBuf {
    let mut os = persist_file.as_os_str().to_os_string();
    os.push(".pid");
    PathBuf::from(os)
}
