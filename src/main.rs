mod app;
mod cache;
mod commands;
mod config;
mod connectivity;
mod dataverse;
mod db;
mod event;
mod http;
mod logging;
mod queue;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fravaer")]
#[command(about = "Offline-first attendance and absence registration")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./fravaer.yaml, then $XDG_CONFIG_HOME/fravaer/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long)]
  offline: bool,

  /// Backend user id to act as (overrides session.user_id)
  #[arg(short, long)]
  user: Option<String>,

  /// Entra object id to sign in as (overrides session.entra_id)
  #[arg(long)]
  entra_id: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _log_guard = logging::init(&config.logging, &data_dir)?;

  // Command line identity wins over the configured session
  let session = commands::Session {
    user_id: args.user.or_else(|| config.session.user_id.clone()),
    entra_id: args.entra_id.or_else(|| config.session.entra_id.clone()),
  };

  let ctx = commands::Context::build(config, &data_dir, session, args.offline).await?;
  commands::execute(args.command, ctx).await
}
