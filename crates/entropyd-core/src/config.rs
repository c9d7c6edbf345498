//! Typed daemon configuration.
//!
//! The daemon consumes configuration as plain records, loadable from a JSON
//! file. Only the static fetcher shapes (`http`, `file`, `command`) can be
//! expressed in a file; `HttpDynamic` and `Callback` sources hold closures
//! and are registered through the library API instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::source::{Fetcher, SourceSpec};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Pool byte cap.
    #[serde(default = "default_max_entropy_bytes")]
    pub max_entropy_bytes: usize,
    /// Per-chunk byte cap.
    #[serde(default = "default_chunk_max_bytes")]
    pub pool_chunk_max_bytes: usize,
    /// Snapshot path.
    pub persist_file: PathBuf,
    /// Seconds between background snapshots.
    #[serde(default = "default_persist_interval_s")]
    pub persist_interval_s: u64,
    /// Loopback control port.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Entropy sources, in configuration order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl DaemonConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_entropy_bytes == 0 {
            return Err(Error::Config("max_entropy_bytes must be non-zero".into()));
        }
        if self.pool_chunk_max_bytes == 0 {
            return Err(Error::Config("pool_chunk_max_bytes must be non-zero".into()));
        }

        let mut enabled: Vec<&str> = self
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.as_str())
            .collect();
        enabled.sort_unstable();
        if let Some(dup) = enabled.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::Config(format!(
                "duplicate enabled source name {:?}",
                dup[0]
            )));
        }

        for source in &self.sources {
            if source.interval_s == 0 {
                return Err(Error::Config(format!(
                    "source {:?}: interval_s must be non-zero",
                    source.name
                )));
            }
            if !(0.0..=1.0).contains(&source.scale) {
                return Err(Error::Config(format!(
                    "source {:?}: scale {} outside [0, 1]",
                    source.name, source.scale
                )));
            }
        }
        Ok(())
    }

    /// Materialize the configured sources as scheduler-ready descriptors.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources.iter().map(SourceConfig::to_spec).collect()
    }
}

/// One configured entropy source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name among enabled sources.
    pub name: String,
    /// Whether the scheduler drives this source.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum seconds between fetches.
    pub interval_s: u64,
    /// Seconds before the first fetch.
    #[serde(default)]
    pub init_delay_s: u64,
    /// What to fetch.
    pub fetch: FetchConfig,
    /// URL visited and discarded before the real fetch.
    #[serde(default)]
    pub prefetch_url: Option<String>,
    /// Maximum bytes to read.
    #[serde(default)]
    pub size_hint: Option<usize>,
    /// Minimum acceptable blob size.
    #[serde(default)]
    pub min_size: Option<usize>,
    /// Whether the conditioner compresses this source's blobs.
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Entropy derating factor.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl SourceConfig {
    fn to_spec(&self) -> SourceSpec {
        let fetcher = match &self.fetch {
            FetchConfig::Http { url } => Fetcher::Http { url: url.clone() },
            FetchConfig::File { path } => Fetcher::File { path: path.clone() },
            FetchConfig::Command { argv } => Fetcher::Command { argv: argv.clone() },
        };
        SourceSpec {
            name: self.name.clone(),
            enabled: self.enabled,
            interval: Duration::from_secs(self.interval_s),
            init_delay: Duration::from_secs(self.init_delay_s),
            fetcher,
            prefetch_url: self.prefetch_url.clone(),
            size_hint: self.size_hint,
            min_size: self.min_size,
            compress: self.compress,
            scale: self.scale,
        }
    }
}

/// File-expressible fetcher shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchConfig {
    /// HTTP GET of a fixed URL.
    Http {
        /// The URL.
        url: String,
    },
    /// Read a local file.
    File {
        /// The path.
        path: PathBuf,
    },
    /// Capture a subprocess's stdout.
    Command {
        /// Program and arguments, no shell.
        argv: Vec<String>,
    },
}

fn default_max_entropy_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_chunk_max_bytes() -> usize {
    64 * 1024
}

fn default_persist_interval_s() -> u64 {
    300
}

fn default_tcp_port() -> u16 {
    8042
}

fn default_true() -> bool {
    true
}

fn default_scale() -> f64 {
    1.0
}
