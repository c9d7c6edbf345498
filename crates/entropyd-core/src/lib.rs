//! # entropyd-core
//!
//! Core pipeline of the entropy gathering daemon: fetch raw bytes from
//! heterogeneous external sources, condition them, and account for them in a
//! bounded in-memory pool that survives restarts.
//!
//! ## Architecture
//!
//! ```text
//! Source → raw bytes → Conditioner → (conditioned bytes, entropy bits) → Pool
//!                                                                          ↓
//!                                   control channel ← withdraw ← ─ ─ ─ ─ ─ ┘
//! ```
//!
//! - Every source is a [`SourceSpec`]: an immutable descriptor naming how to
//!   obtain one raw blob ([`Fetcher`]) and on what cadence.
//! - The [`Scheduler`] drives each enabled source on its own tokio task,
//!   routing fetched blobs through [`condition`] into the shared [`Pool`].
//! - [`condition`] compresses (LZMA) and stirs (SHA-512 counter mode) raw
//!   bytes, yielding a conservative entropy-bit estimate that never exceeds
//!   the compressed length.
//! - The [`Pool`] is an ordered sequence of bounded [`PoolChunk`]s with a
//!   per-chunk and total entropy ledger; eviction drops whole oldest chunks.
//! - The [`Persister`] snapshots the pool atomically (write-then-rename) in
//!   the explicit binary format of [`persist`], and restores it at startup.
//!
//! The pool is the only shared mutable state and is guarded by a single
//! mutex; pool operations are pure memory and never suspend.

pub mod chunk;
pub mod conditioning;
pub mod config;
pub mod error;
pub mod persist;
pub mod pool;
pub mod scheduler;
pub mod source;

pub use chunk::PoolChunk;
pub use conditioning::{Conditioned, DIGEST_WIDTH, condition};
pub use config::{DaemonConfig, FetchConfig, SourceConfig};
pub use error::{Error, Result};
pub use persist::{Persister, PidLock};
pub use pool::{Pool, PoolStats, SharedPool, shared_pool};
pub use scheduler::{Scheduler, StatusRegistry};
pub use source::{FETCH_TIMEOUT, Fetcher, SourceSpec, SourceStatus};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
