//! Loopback TCP control channel.
//!
//! The daemon is driven through a line-oriented text protocol: one command
//! per connection, one response, close. The server trusts any local
//! connector (it binds loopback only) and never lets a protocol error touch
//! the pool.
//!
//! | Command | Success reply |
//! |---------|---------------|
//! | `status` | `OK total_bytes=<n> total_bits=<b> max_bytes=<m> chunks=<k>` |
//! | `getentropy <n>` | `OK bytes=<k> bits=<b>` then `k` raw bytes |
//! | `sources` | `OK sources=<j>` then one health line per source |
//! | `persist` | `OK persisted=<path>` |
//! | `stop` | `OK stopping`, then the server shuts down |
//!
//! Every connection is handled on its own task, so a slow client blocks
//! neither the scheduler nor other clients. `stop` halts the accept loop,
//! gives in-flight handlers a short grace period, and returns from
//! [`ControlServer::serve`] — the daemon then quiesces and persists.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use entropyd_core::{Persister, SharedPool, StatusRegistry};

/// Largest `getentropy` request honoured; larger requests are clamped and
/// the reply header says so.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// Longest accepted command line, protocol overhead included.
const MAX_LINE_BYTES: u64 = 256;

/// How long in-flight handlers may keep running after `stop`.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct ServerState {
    pool: SharedPool,
    persister: Arc<Persister>,
    sources: StatusRegistry,
}

/// The bound control socket plus everything commands dispatch to.
pub struct ControlServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl ControlServer {
    /// Bind `127.0.0.1:<port>`. Port 0 picks an ephemeral port; use
    /// [`local_addr`](Self::local_addr) to discover it.
    pub async fn bind(
        port: u16,
        pool: SharedPool,
        persister: Arc<Persister>,
        sources: StatusRegistry,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                pool,
                persister,
                sources,
            }),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and dispatch until a `stop` command arrives, then drain
    /// in-flight handlers and return.
    pub async fn serve(self) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        let state = self.state.clone();
                        let stop = stop_tx.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, state, stop).await {
                                log::debug!("control connection error: {e}");
                            }
                        });
                    }
                    Err(e) => log::warn!("accept failed: {e}"),
                }
            }
        }

        drop(self.listener);
        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(STOP_GRACE, drain).await.is_err() {
            log::warn!("aborting control handlers still running after {STOP_GRACE:?}");
            handlers.abort_all();
        }
        log::info!("control server stopped");
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
    stop: watch::Sender<bool>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut line = String::new();
    BufReader::new(reader.take(MAX_LINE_BYTES))
        .read_line(&mut line)
        .await?;

    match dispatch(line.trim(), &state, &stop).await {
        Reply::Line(text) => {
            writer.write_all(text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Reply::Entropy { header, payload } => {
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.write_all(&payload).await?;
        }
    }
    writer.flush().await
}

enum Reply {
    Line(String),
    Entropy { header: String, payload: Vec<u8> },
}

fn err(reason: impl Into<String>) -> Reply {
    Reply::Line(format!("ERR {}", reason.into()))
}

async fn dispatch(line: &str, state: &ServerState, stop: &watch::Sender<bool>) -> Reply {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return err("empty command");
    };
    let arg = words.next();
    if words.next().is_some() {
        return err("too many arguments");
    }

    match command {
        "status" | "sources" | "persist" | "stop" if arg.is_some() => {
            err(format!("{command} takes no argument"))
        }
        "status" => {
            let s = state.pool.lock().unwrap().stats();
            Reply::Line(format!(
                "OK total_bytes={} total_bits={} max_bytes={} chunks={}",
                s.total_bytes, s.total_bits, s.max_bytes, s.chunks
            ))
        }
        "getentropy" => {
            let Some(n) = arg.and_then(|a| a.parse::<usize>().ok()).filter(|&n| n > 0) else {
                return err(format!(
                    "getentropy needs a byte count between 1 and {MAX_REQUEST_BYTES}"
                ));
            };
            let clamped = n > MAX_REQUEST_BYTES;
            let want = n.min(MAX_REQUEST_BYTES);
            let (payload, bits) = state.pool.lock().unwrap().withdraw(want);
            let mut header = format!("OK bytes={} bits={bits}", payload.len());
            if clamped {
                header.push_str(&format!(" clamped={MAX_REQUEST_BYTES}"));
            }
            Reply::Entropy { header, payload }
        }
        "sources" => {
            let rows = state.sources.lock().unwrap().clone();
            let mut text = format!("OK sources={}", rows.len());
            for row in &rows {
                text.push_str(&format!(
                    "\n{} ok={} failures={} bits={}",
                    row.name, row.healthy, row.consecutive_failures, row.total_bits
                ));
            }
            Reply::Line(text)
        }
        "persist" => {
            let persister = state.persister.clone();
            match tokio::task::spawn_blocking(move || persister.persist()).await {
                Ok(Ok(path)) => Reply::Line(format!("OK persisted={}", path.display())),
                Ok(Err(e)) => err(e.to_string()),
                Err(e) => err(format!("persist task failed: {e}")),
            }
        }
        "stop" => {
            let _ = stop.send(true);
            Reply::Line("OK stopping".into())
        }
        other => err(format!("unknown command {other:?}")),
    }
}
