#![deny(clippy::mod_module_files)]
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use git_publish::{config::PublishConfig, Publisher};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::Host;

/// Publish files to a branch as one atomic commit
#[derive(Debug, Parser)]
#[command(name = "git-publish", version)]
struct Cli {
    /// Config file (default: ~/.config/git-publish/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the local object store instead of GitHub
    #[arg(long, global = true)]
    local: bool,

    /// Root of the local object store (implies --local)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish files onto an existing branch
    Publish(commands::publish::PublishArgs),
    /// Create the repository if needed, then publish
    Init(commands::init::InitArgs),
    /// List the files at a branch tip
    Tree(commands::tree::TreeArgs),
    /// Finish a branch update that failed after the commit was built
    Resume(commands::resume::ResumeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GIT_PUBLISH_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = PublishConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.store_dir {
        config.store_dir = dir.clone();
    }
    let host = Host::from_config(&config, cli.local || cli.store_dir.is_some())?;

    let mut options = config.publish_options();
    options.show_progress = true;
    let publisher = Publisher::with_options(host, options);

    match cli.command {
        Command::Publish(args) => commands::publish::handle(&publisher, args).await,
        Command::Init(args) => commands::init::handle(&publisher, args).await,
        Command::Tree(args) => commands::tree::handle(publisher.host(), args).await,
        Command::Resume(args) => commands::resume::handle(&publisher, args).await,
    }
}
