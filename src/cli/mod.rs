pub mod commands;
pub mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gridcache")]
#[command(about = "Inspect and edit a persisted record cache")]
#[command(version)]
pub struct Cli {
    /// Path to the config file (defaults are used when it does not exist)
    #[arg(long, global = true, default_value = config::CONFIG_FILENAME)]
    pub config: PathBuf,

    /// Override the storage root directory
    #[arg(long, global = true, env = "GRIDCACHE_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a config file with the default schema
    Init(InitArgs),
    /// Load the dataset, seeding it on first use, and report its size
    Hydrate,
    /// Print one record as JSON
    Get(GetArgs),
    /// Insert or replace a record
    Set(SetArgs),
    /// Remove a record
    Delete(DeleteArgs),
    /// Show the column descriptors derived from the schema sample
    Columns,
    /// Print records as JSON lines
    Dump(DumpArgs),
}

#[derive(clap::Args)]
pub struct InitArgs {
    /// Dataset name (first half of the storage key)
    #[arg(long)]
    pub name: Option<String>,

    /// Dataset size (second half of the storage key)
    #[arg(long)]
    pub size: Option<usize>,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args)]
pub struct GetArgs {
    pub key: i64,
}

#[derive(clap::Args)]
pub struct SetArgs {
    pub key: i64,

    /// Record as a JSON object, e.g. '{"ID": 3, "Name": "A"}'
    pub record: String,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    pub key: i64,
}

#[derive(clap::Args)]
pub struct DumpArgs {
    /// Print at most this many records
    #[arg(long)]
    pub limit: Option<usize>,
}
