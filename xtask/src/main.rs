//! xtask automation tool for spawnkit
//!
//! Development tasks that are not part of the published crates.

mod gen_schemas;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development automation tool for spawnkit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate JSON schemas for the launch file and exit report
    GenSchemas {
        /// Output directory (defaults to `schemas/` at the workspace root)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenSchemas { out_dir } => gen_schemas::run(out_dir),
    }
}
