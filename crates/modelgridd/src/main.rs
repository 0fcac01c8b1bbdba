//! modelgridd — the modelgrid daemon.
//!
//! Single binary that assembles every subsystem:
//! - State store (redb)
//! - Remote collaborators (embedding, training, serving backend, data, webhook)
//! - One control loop per configured service
//! - REST API
//!
//! # Usage
//!
//! ```text
//! modelgridd run --config /etc/modelgrid/modelgrid.toml
//! modelgridd check --config modelgrid.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use modelgrid_lifecycle::ModelgridConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "modelgridd", about = "modelgrid daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every service loop and serve the REST API.
    Run {
        /// Path to modelgrid.toml.
        #[arg(short, long, default_value = "modelgrid.toml")]
        config: PathBuf,

        /// Override `[daemon].port`.
        #[arg(long)]
        port: Option<u16>,

        /// Override `[daemon].data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate a configuration file and exit.
    Check {
        #[arg(short, long, default_value = "modelgrid.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let mut cfg = ModelgridConfig::from_file(&config)?;
            if let Some(port) = port {
                cfg.daemon.port = port;
            }
            if let Some(data_dir) = data_dir {
                cfg.daemon.data_dir = data_dir;
            }
            info!(path = ?config, services = cfg.services.len(), "configuration loaded");
            daemon::run(cfg).await
        }
        Command::Check { config } => {
            let cfg = ModelgridConfig::from_file(&config)?;
            for service in &cfg.services {
                println!(
                    "{}: threshold {}, stages {:?}",
                    service.name, service.drift.threshold, service.canary.stages
                );
            }
            println!("{} service(s) OK", cfg.services.len());
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => "info,modelgrid=debug,modelgridd=debug".parse()?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
