//! Entropy source descriptors and their fetch methods.
//!
//! A [`SourceSpec`] is immutable after construction: it names one producer
//! of raw bytes and how the scheduler should treat it. The per-run state the
//! scheduler mutates lives in [`SourceState`]; read-only snapshots of it are
//! exposed as [`SourceStatus`] for the control channel.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Ceiling applied to every fetch: HTTP via the shared client's own timeout,
/// file reads and subprocesses via an explicit timer.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Computes a URL at fetch time, for time-keyed endpoints.
pub type UrlProvider = Box<dyn Fn() -> String + Send + Sync>;

/// Produces a raw blob directly; a returned error is a soft failure.
pub type Producer = Box<dyn Fn() -> Result<Vec<u8>> + Send + Sync>;

/// How a source obtains one raw blob.
pub enum Fetcher {
    /// HTTP GET of a fixed URL.
    Http {
        /// The URL to fetch.
        url: String,
    },
    /// HTTP GET of a URL computed per fetch; an empty URL skips the cycle.
    HttpDynamic {
        /// Called at the start of every cycle.
        provider: UrlProvider,
    },
    /// Read a local file (device files included).
    File {
        /// Path opened in binary mode.
        path: PathBuf,
    },
    /// Spawn a subprocess (no shell) and capture its stdout.
    Command {
        /// Program and arguments.
        argv: Vec<String>,
    },
    /// Invoke an arbitrary producer closure.
    Callback {
        /// The producer.
        producer: Producer,
    },
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { url } => f.debug_struct("Http").field("url", url).finish(),
            Self::HttpDynamic { .. } => f.debug_struct("HttpDynamic").finish_non_exhaustive(),
            Self::File { path } => f.debug_struct("File").field("path", path).finish(),
            Self::Command { argv } => f.debug_struct("Command").field("argv", argv).finish(),
            Self::Callback { .. } => f.debug_struct("Callback").finish_non_exhaustive(),
        }
    }
}

/// Immutable descriptor of one entropy source.
#[derive(Debug)]
pub struct SourceSpec {
    /// Unique name among enabled sources; appears in every log line.
    pub name: String,
    /// Whether the scheduler considers this source at all.
    pub enabled: bool,
    /// Minimum spacing between fetch attempts.
    pub interval: Duration,
    /// Delay before the first fetch.
    pub init_delay: Duration,
    /// How to obtain the raw blob.
    pub fetcher: Fetcher,
    /// URL fetched and discarded before the real fetch, for sites that
    /// require a prior visit.
    pub prefetch_url: Option<String>,
    /// Read at most this many bytes (HTTP and File fetchers).
    pub size_hint: Option<usize>,
    /// Blobs shorter than this are dropped with zero credit.
    pub min_size: Option<usize>,
    /// Run the compression stage of the conditioner.
    pub compress: bool,
    /// Entropy derating factor in `[0, 1]`.
    pub scale: f64,
}

impl SourceSpec {
    /// Descriptor with defaults: enabled, no init delay, no size bounds,
    /// compression on, full scale.
    pub fn new(name: impl Into<String>, fetcher: Fetcher, interval: Duration) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            interval,
            init_delay: Duration::ZERO,
            fetcher,
            prefetch_url: None,
            size_hint: None,
            min_size: None,
            compress: true,
            scale: 1.0,
        }
    }

    /// Obtain one raw blob. Every error is a soft failure for the cycle.
    pub async fn fetch(&self, client: &Client) -> Result<Vec<u8>> {
        match &self.fetcher {
            Fetcher::Http { url } => self.fetch_http(client, url).await,
            Fetcher::HttpDynamic { provider } => {
                let url = provider();
                if url.is_empty() {
                    return Err(Error::EmptyUrl);
                }
                self.fetch_http(client, &url).await
            }
            Fetcher::File { path } => {
                tokio::time::timeout(FETCH_TIMEOUT, read_file(path, self.size_hint))
                    .await
                    .map_err(|_| Error::Timeout(FETCH_TIMEOUT))?
            }
            Fetcher::Command { argv } => run_command(argv).await,
            Fetcher::Callback { producer } => producer(),
        }
    }

    async fn fetch_http(&self, client: &Client, url: &str) -> Result<Vec<u8>> {
        if let Some(prefetch) = &self.prefetch_url {
            let resp = client.get(prefetch).send().await?;
            let _ = resp.bytes().await?;
        }

        let mut resp = client.get(url).send().await?.error_for_status()?;
        match self.size_hint {
            None => Ok(resp.bytes().await?.to_vec()),
            Some(limit) => {
                let mut out = Vec::with_capacity(limit.min(64 * 1024));
                while out.len() < limit {
                    match resp.chunk().await? {
                        Some(chunk) => {
                            let room = limit - out.len();
                            out.extend_from_slice(&chunk[..chunk.len().min(room)]);
                        }
                        None => break,
                    }
                }
                Ok(out)
            }
        }
    }
}

async fn read_file(path: &Path, size_hint: Option<usize>) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut out = Vec::new();
    match size_hint {
        Some(limit) => {
            file.take(limit as u64).read_to_end(&mut out).await?;
        }
        None => {
            let mut file = file;
            file.read_to_end(&mut out).await?;
        }
    }
    Ok(out)
}

async fn run_command(argv: &[String]) -> Result<Vec<u8>> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Config("command source has an empty argv".into()))?;

    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(FETCH_TIMEOUT, output)
        .await
        .map_err(|_| Error::Timeout(FETCH_TIMEOUT))??;

    if !output.status.success() {
        return Err(Error::CommandStatus {
            argv: argv.to_vec(),
            status: output.status,
        });
    }
    Ok(output.stdout)
}

/// Per-source runtime state, mutated only by the scheduler task driving the
/// source.
#[derive(Debug)]
pub struct SourceState {
    /// When the next attempt is due.
    pub next_fire_at: Instant,
    /// Completion time of the last successful cycle.
    pub last_ok_at: Option<Instant>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl SourceState {
    pub(crate) fn new(first_fire: Instant) -> Self {
        Self {
            next_fire_at: first_fire,
            last_ok_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Read-only health snapshot of one source, served by the `sources` command.
#[derive(Debug, Clone)]
pub struct SourceStatus {
    /// Source name.
    pub name: String,
    /// Whether the most recent cycle succeeded.
    pub healthy: bool,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successful cycles so far.
    pub total_blobs: u64,
    /// Entropy bits credited to the pool so far.
    pub total_bits: u64,
}

impl SourceStatus {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            healthy: false,
            consecutive_failures: 0,
            total_blobs: 0,
            total_bits: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::builder().timeout(FETCH_TIMEOUT).build().unwrap()
    }

    // -----------------------------------------------------------------------
    // Command fetcher
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn command_captures_stdout() {
        let spec = SourceSpec::new(
            "echo",
            Fetcher::Command {
                argv: vec!["echo".into(), "-n".into(), "noise".into()],
            },
            Duration::from_secs(60),
        );
        let out = spec.fetch(&client()).await.unwrap();
        assert_eq!(out, b"noise");
    }

    #[tokio::test]
    async fn command_nonzero_exit_is_error() {
        let spec = SourceSpec::new(
            "false",
            Fetcher::Command {
                argv: vec!["false".into()],
            },
            Duration::from_secs(60),
        );
        let err = spec.fetch(&client()).await.unwrap_err();
        assert!(matches!(err, Error::CommandStatus { .. }));
    }

    #[tokio::test]
    async fn command_empty_argv_is_error() {
        let spec = SourceSpec::new(
            "empty",
            Fetcher::Command { argv: vec![] },
            Duration::from_secs(60),
        );
        assert!(matches!(
            spec.fetch(&client()).await.unwrap_err(),
            Error::Config(_)
        ));
    }

    #[tokio::test]
    async fn command_missing_binary_is_error() {
        let spec = SourceSpec::new(
            "missing",
            Fetcher::Command {
                argv: vec!["/nonexistent/entropy-binary".into()],
            },
            Duration::from_secs(60),
        );
        assert!(matches!(spec.fetch(&client()).await.unwrap_err(), Error::Io(_)));
    }

    // -----------------------------------------------------------------------
    // File fetcher
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn file_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let spec = SourceSpec::new(
            "file",
            Fetcher::File { path },
            Duration::from_secs(60),
        );
        assert_eq!(spec.fetch(&client()).await.unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn file_honours_size_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![0x55u8; 1000]).unwrap();

        let mut spec = SourceSpec::new("file", Fetcher::File { path }, Duration::from_secs(60));
        spec.size_hint = Some(100);
        assert_eq!(spec.fetch(&client()).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn file_missing_is_error() {
        let spec = SourceSpec::new(
            "file",
            Fetcher::File {
                path: "/nonexistent/entropy-file".into(),
            },
            Duration::from_secs(60),
        );
        assert!(matches!(spec.fetch(&client()).await.unwrap_err(), Error::Io(_)));
    }

    // -----------------------------------------------------------------------
    // Callback and dynamic URL fetchers
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn callback_passes_bytes_through() {
        let spec = SourceSpec::new(
            "cb",
            Fetcher::Callback {
                producer: Box::new(|| Ok(vec![1, 2, 3])),
            },
            Duration::from_secs(60),
        );
        assert_eq!(spec.fetch(&client()).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn callback_error_is_soft() {
        let spec = SourceSpec::new(
            "cb",
            Fetcher::Callback {
                producer: Box::new(|| Err(Error::Callback("producer broke".into()))),
            },
            Duration::from_secs(60),
        );
        assert!(matches!(
            spec.fetch(&client()).await.unwrap_err(),
            Error::Callback(_)
        ));
    }

    #[tokio::test]
    async fn dynamic_empty_url_is_soft_failure() {
        let spec = SourceSpec::new(
            "dyn",
            Fetcher::HttpDynamic {
                provider: Box::new(String::new),
            },
            Duration::from_secs(60),
        );
        assert!(matches!(spec.fetch(&client()).await.unwrap_err(), Error::EmptyUrl));
    }

    #[test]
    fn fetcher_debug_hides_closures() {
        let f = Fetcher::HttpDynamic {
            provider: Box::new(String::new),
        };
        assert!(format!("{f:?}").starts_with("HttpDynamic"));
    }
}
