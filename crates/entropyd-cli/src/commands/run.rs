//! The daemon proper: wires configuration, pool, persistence, scheduler,
//! and the control channel together, then runs until `stop` or SIGINT.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use entropyd_core::persist::spawn_persist_task;
use entropyd_core::pool::{Pool, shared_pool};
use entropyd_core::{DaemonConfig, Persister, PidLock, Scheduler};
use entropyd_server::ControlServer;

pub fn run(config_path: &Path, force: bool) -> ExitCode {
    match run_daemon(config_path, force) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_daemon(config_path: &Path, force: bool) -> entropyd_core::Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    let _lock = PidLock::acquire(&config.persist_file, force)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(daemon_main(config))
}

async fn daemon_main(config: DaemonConfig) -> entropyd_core::Result<()> {
    let pool = shared_pool(Pool::new(
        config.max_entropy_bytes,
        config.pool_chunk_max_bytes,
    ));
    let persister = Arc::new(Persister::new(config.persist_file.clone(), pool.clone()));

    // Restore before the scheduler or control channel can touch the pool.
    match persister.load() {
        Ok(true) => {
            let s = pool.lock().unwrap().stats();
            log::info!(
                "restored pool: {} bytes, {} bits in {} chunks",
                s.total_bytes,
                s.total_bits,
                s.chunks
            );
        }
        Ok(false) => log::info!(
            "no snapshot at {}, starting empty",
            config.persist_file.display()
        ),
        Err(e) => log::error!("ignoring persisted pool ({e}), starting empty"),
    }

    let scheduler = Scheduler::start(pool.clone(), config.source_specs())?;
    let server = ControlServer::bind(
        config.tcp_port,
        pool.clone(),
        persister.clone(),
        scheduler.status_registry(),
    )
    .await?;
    log::info!(
        "entropyd {} listening on {}",
        entropyd_core::VERSION,
        server.local_addr()?
    );

    let (persist_stop, persist_stop_rx) = tokio::sync::watch::channel(false);
    let persist_task = spawn_persist_task(
        persister.clone(),
        Duration::from_secs(config.persist_interval_s),
        persist_stop_rx,
    );

    tokio::select! {
        _ = server.serve() => log::info!("stop requested on the control channel"),
        _ = tokio::signal::ctrl_c() => log::info!("interrupt received"),
    }

    let _ = persist_stop.send(true);
    let _ = persist_task.await;
    scheduler.quiesce().await;
    persister.persist()?;
    Ok(())
}
