// linkstats - operator CLI
//
// Loads configuration (env > file > defaults), sets up logging, opens the
// configured store, and runs one subcommand against the wired engine.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use linkstats::clock::SystemClock;
use linkstats::config::Config;
use linkstats::{logging, open_store, Engine};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config management must work even when the config file is broken
    if let Commands::Config { show, reset, path } = cli.command {
        return cli::handle_config(show, reset, path);
    }

    // Write a template on first run so the options are discoverable
    Config::ensure_config_exists();
    let config = Config::from_env()?;

    // Keep the guard alive until exit so file logs flush
    let _log_guard = logging::init(&config.logging);

    let store = open_store(&config.store)?;
    let engine = Engine::new(store, Arc::new(SystemClock), &config, None)?;

    let result = cli::run(cli.command, &engine).await;
    engine.shutdown();
    result
}
