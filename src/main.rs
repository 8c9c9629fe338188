// src/main.rs — tuneloop entry point

use clap::Parser;

use tuneloop::cli::run::RunOverrides;
use tuneloop::cli::{Cli, Commands};
use tuneloop::infra::config::Config;
use tuneloop::infra::logger;
use tuneloop::memory::VersionStore;

#[tokio::main]
async fn main() {
    // Respects RUST_LOG / TUNELOOP_LOG
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let db = cli.db.as_deref();

    if let Commands::Init { force } = cli.command {
        return tuneloop::cli::init::run_init(db, force).await;
    }

    // Falls back to defaults if no config.toml
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run {
            max_iterations,
            personas,
            threshold,
            verbose,
            quiet,
        } => {
            let overrides = RunOverrides {
                max_iterations,
                personas,
                threshold,
            };
            tuneloop::cli::run::run_loop(config, overrides, db, verbose, quiet).await
        }
        Commands::History { run, limit } => {
            let manager = tuneloop::cli::open_store(db)?;
            tuneloop::cli::history::show_history(&manager.store, run.as_deref(), limit)
        }
        Commands::Versions { module, payload } => {
            let versions = VersionStore::new(tuneloop::cli::open_store(db)?.into_shared());
            tuneloop::cli::versions::show_versions(&versions, module.as_deref(), payload)
        }
        Commands::Rollback { module, version } => {
            let versions = VersionStore::new(tuneloop::cli::open_store(db)?.into_shared());
            tuneloop::cli::versions::rollback(&versions, &module, version)
        }
        Commands::Init { .. } => Ok(()),
    }
}
