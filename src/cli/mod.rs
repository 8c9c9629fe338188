// src/cli/mod.rs — CLI definition (clap derive)

pub mod history;
pub mod init;
pub mod progress;
pub mod run;
pub mod versions;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tuneloop",
    about = "Simulate synthetic users, grade their sessions, and tune module prompts until they converge",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database path (defaults to the data directory)
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the optimization loop
    Run {
        /// Override loop.max_iterations
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,
        /// Override loop.personas_per_iteration
        #[arg(short, long)]
        personas: Option<usize>,
        /// Override loop.convergence_threshold (0.0-1.0)
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Show phase changes and every simulation
        #[arg(short, long)]
        verbose: bool,
        /// Suppress progress output (only print the summary)
        #[arg(long)]
        quiet: bool,
    },
    /// Show past runs, or one run's iterations
    History {
        /// Run id (defaults to listing recent runs)
        run: Option<String>,
        /// Number of runs to list
        #[arg(long, default_value = "10")]
        limit: u32,
    },
    /// List config versions
    Versions {
        /// Module key (defaults to every module)
        module: Option<String>,
        /// Print the payload of each version
        #[arg(long)]
        payload: bool,
    },
    /// Make an earlier version current again by appending a copy of it
    Rollback {
        module: String,
        version: u32,
    },
    /// Create directories, a default config, and the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Open the database at `db`, or the default path, creating its directory.
pub fn open_store(db: Option<&str>) -> anyhow::Result<crate::memory::MemoryManager> {
    let path = db
        .map(std::path::PathBuf::from)
        .unwrap_or_else(crate::infra::paths::db_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::debug!(path = %path.display(), "Opening database");
    Ok(crate::memory::MemoryManager::open(&path)?)
}
