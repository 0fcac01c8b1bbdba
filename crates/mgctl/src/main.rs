use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(
    name = "mgctl",
    about = "modelgrid — model lifecycle control loop",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Base URL of the modelgridd REST API.
    #[arg(long, global = true, default_value = "http://127.0.0.1:7400")]
    api: String,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List managed services.
    Services,
    /// Show the full status of one service.
    Status { name: String },
    /// Abort the active rollout of a service.
    Rollback { name: String },
    /// Start a retrain cycle now.
    Retrain { name: String },
    /// Seed the drift baseline from a file, one reference text per line.
    Baseline {
        name: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Show recent drift reports.
    Drift {
        name: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show recent promotion decisions.
    Decisions {
        name: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("mgctl=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = commands::Format::parse(&cli.format)?;
    let api = ApiClient::new(&cli.api)?;
    tracing::debug!(api = %cli.api, "connecting to modelgridd");

    let output = match cli.command {
        Commands::Services => commands::services(&api, format).await?,
        Commands::Status { name } => commands::status(&api, &name).await?,
        Commands::Rollback { name } => commands::rollback(&api, &name, format).await?,
        Commands::Retrain { name } => commands::retrain(&api, &name, format).await?,
        Commands::Baseline { name, file } => {
            commands::baseline(&api, &name, &file, format).await?
        }
        Commands::Drift { name, limit } => commands::drift(&api, &name, limit, format).await?,
        Commands::Decisions { name, limit } => {
            commands::decisions(&api, &name, limit, format).await?
        }
    };
    println!("{output}");
    Ok(())
}
