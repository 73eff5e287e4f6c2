//! Lexicache CLI - a terminal front end for the lexicache progress cache.
//!
//! Shows exercise progress and the coin balance for the signed-in learner,
//! records attempts and spends or earns coins.

mod commands;
mod output;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;
use lexicache_core::config::Config;

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix; the appender adds the date
const LOG_FILE_PREFIX: &str = "lexicache.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily log file under `log_dir`. The returned
/// guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, commands::USAGE);
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));

    let _guard = init_tracing(&cache_dir.join("logs"));
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(?command, "Lexicache starting");

    commands::run(command, config, cache_dir).await
}
