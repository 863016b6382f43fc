use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "cactus")]
#[command(
    about = "Edit Cactus experiments and drive the cactus_* alignment tools",
    long_about = None
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cactus.toml", env = "CACTUS_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new experiment file
    Init(commands::InitArgs),
    /// Print the contents of an experiment
    Show(commands::ShowArgs),
    /// Add an outgroup above the root of the species tree
    SetOutgroup(commands::SetOutgroupArgs),
    /// Change database settings
    SetDb(commands::SetDbArgs),
    /// Change the reference, MAF or workflow config paths
    SetPaths(commands::SetPathsArgs),
    /// Run the alignment pipeline for an experiment
    Run(commands::RunArgs),
    /// Check whether the last run in a job tree completed
    Status(commands::StatusArgs),
    /// List or extend child flowers
    Flowers(commands::FlowersArgs),
    /// Ask the cactus disk for a globally unique name
    UniqueName(commands::UniqueNameArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cactus=info,cactus_core=info".into()),
        )
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = CliConfig::load(&args.config)?;

    match args.command {
        Command::Init(cmd) => commands::init(cmd),
        Command::Show(cmd) => commands::show(cmd, &config),
        Command::SetOutgroup(cmd) => commands::set_outgroup(cmd),
        Command::SetDb(cmd) => commands::set_db(cmd),
        Command::SetPaths(cmd) => commands::set_paths(cmd),
        Command::Run(cmd) => commands::run(cmd, &config).await,
        Command::Status(cmd) => commands::status(cmd).await,
        Command::Flowers(cmd) => commands::flowers(cmd, &config).await,
        Command::UniqueName(cmd) => commands::unique_name(cmd, &config).await,
    }
}
