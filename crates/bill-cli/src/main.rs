use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bill_cli::commands::{history, mapping, preview, process, util};
use bill_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Some(Commands::Preview(args)) => {
            let config = load_config(cli.config.as_deref())?;
            preview::run(&mut stdout, args, &config)?;
        }
        Some(Commands::Process(args)) => {
            let config = load_config(cli.config.as_deref())?;
            process::run(&mut stdout, args, &config)?;
        }
        Some(Commands::Mapping { action }) => {
            let config = load_config(cli.config.as_deref())?;
            mapping::run(&mut stdout, action, &config)?;
        }
        Some(Commands::History(args)) => {
            let config = load_config(cli.config.as_deref())?;
            let db = util::open_database(&config)?;
            history::run(&mut stdout, &db, args)?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
