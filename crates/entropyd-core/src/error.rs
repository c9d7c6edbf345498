//! Crate error type.
//!
//! Source-side variants (`Http`, `Io`, `Timeout`, `CommandStatus`,
//! `EmptyUrl`, `Callback`, `BelowMinSize`) are *soft* failures: the scheduler
//! logs them, credits zero entropy for the cycle, and reschedules. The
//! remaining variants surface at startup or on the persistence path. Pool
//! ledger violations are not represented here — they are bugs and abort the
//! process.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// All errors produced by the entropyd core.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP fetch failed (connect, TLS, status, or body read).
    #[error("http fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem or socket error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A fetch exceeded the fixed ceiling and was abandoned.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// A Command source exited non-zero.
    #[error("command {argv:?} exited with {status}")]
    CommandStatus {
        /// The argv that was spawned.
        argv: Vec<String>,
        /// Its exit status.
        status: ExitStatus,
    },

    /// A dynamic URL provider produced an empty URL this cycle.
    #[error("dynamic url provider returned an empty url")]
    EmptyUrl,

    /// A Callback source reported failure.
    #[error("callback source failed: {0}")]
    Callback(String),

    /// A fetched blob was shorter than the source's `min_size`.
    #[error("blob of {got} bytes is below the {min}-byte minimum")]
    BelowMinSize {
        /// Bytes actually fetched.
        got: usize,
        /// Configured minimum.
        min: usize,
    },

    /// A persisted snapshot failed validation and was not installed.
    #[error("snapshot rejected: {0}")]
    Snapshot(String),

    /// Another daemon instance holds the pid lock.
    #[error("{} is locked by pid {pid} (use --force to steal a stale lock)", path.display())]
    Locked {
        /// Path of the pid marker file.
        path: PathBuf,
        /// Pid recorded in it.
        pid: u32,
    },

    /// The configuration is malformed.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
