//! convergd: the Converge daemon.
//!
//! Single binary that assembles the controller:
//! - State store (redb)
//! - Simulated cluster (orchestration backend + metrics source)
//! - One control loop per workload
//! - REST API
//!
//! # Usage
//!
//! ```text
//! convergd run --config converge.toml --data-dir /var/lib/converge
//! convergd validate --config converge.toml
//! convergd init --name web --image registry.local/web:1 > converge.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "convergd", about = "Converge reconciliation and autoscaling controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loops and the API against the simulated cluster.
    Run {
        /// Path to converge.toml.
        #[arg(long, default_value = "converge.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/converge")]
        data_dir: PathBuf,

        /// API port; overrides `controller.api_port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check a config file without starting anything.
    Validate {
        #[arg(long, default_value = "converge.toml")]
        config: PathBuf,
    },
    /// Print a starter config.
    Init {
        #[arg(long, default_value = "web")]
        name: String,

        #[arg(long, default_value = "registry.local/web:1")]
        image: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,convergd=debug,converge=debug"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            port,
        } => daemon::run(&config, &data_dir, port).await,
        Command::Validate { config } => daemon::validate(&config),
        Command::Init { name, image } => {
            print!("{}", daemon::scaffold(&name, &image)?);
            Ok(())
        }
    }
}
