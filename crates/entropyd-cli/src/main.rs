//! CLI for entropyd — run the daemon, or talk to a running one.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "entropyd")]
#[command(about = "entropyd — gather, condition, pool, and serve entropy")]
#[command(version = entropyd_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run {
        /// Path to the JSON configuration file
        #[arg(long)]
        config: PathBuf,

        /// Steal a pid lock left behind by a crashed instance
        #[arg(long)]
        force: bool,
    },

    /// Show pool totals of a running daemon
    Status {
        /// Control port of the daemon
        #[arg(long, default_value_t = 8042)]
        port: u16,
    },

    /// Withdraw entropy bytes from a running daemon
    Get {
        /// Bytes to request (the daemon may return fewer)
        n: usize,

        /// Control port of the daemon
        #[arg(long, default_value_t = 8042)]
        port: u16,

        /// Print hex instead of writing raw bytes to stdout
        #[arg(long)]
        hex: bool,
    },

    /// List per-source health of a running daemon
    Sources {
        /// Control port of the daemon
        #[arg(long, default_value_t = 8042)]
        port: u16,
    },

    /// Ask a running daemon to snapshot its pool now
    Persist {
        /// Control port of the daemon
        #[arg(long, default_value_t = 8042)]
        port: u16,
    },

    /// Gracefully stop a running daemon
    Stop {
        /// Control port of the daemon
        #[arg(long, default_value_t = 8042)]
        port: u16,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, force } => commands::run::run(&config, force),
        Commands::Status { port } => commands::client::simple(port, "status"),
        Commands::Get { n, port, hex } => commands::client::get(port, n, hex),
        Commands::Sources { port } => commands::client::simple(port, "sources"),
        Commands::Persist { port } => commands::client::simple(port, "persist"),
        Commands::Stop { port } => commands::client::simple(port, "stop"),
    }
}
