mod commands;
mod config;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "recache")]
#[command(about = "Read-through cache in front of an HTTP/JSON origin")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/recache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read keys through the cache, fetching from the origin when needed
  Get {
    #[arg(required = true)]
    keys: Vec<String>,
  },
  /// List stored entries with their age
  Entries,
  /// Remove every stored entry
  Clear,
  /// Keep refreshing in the background until Ctrl-C
  Watch,
}

/// Log to stderr, and to daily files when configured.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;
  let stderr = fmt::layer().with_writer(std::io::stderr);

  let Some(file) = &config.file else {
    tracing_subscriber::registry().with(filter).with(stderr).try_init()?;
    return Ok(None);
  };

  let dir = file
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let prefix = file
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", file.display()))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));
  tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .try_init()?;

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config.log)?;

  let storage = commands::open_storage(&config.storage)?;

  match args.command {
    Command::Get { keys } => commands::get(&config, storage, &keys).await,
    Command::Entries => commands::entries(&config, storage.as_ref()),
    Command::Clear => commands::clear(storage.as_ref()),
    Command::Watch => commands::watch(&config, storage).await,
  }
}
