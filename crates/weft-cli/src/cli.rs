//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Trace a module graph from entry files and build servable artifacts.
#[derive(Debug, Parser)]
#[command(name = "weft", version, about)]
pub struct Cli {
    /// Entry files to trace.
    #[arg(required = true)]
    pub entries: Vec<PathBuf>,

    /// Directory URLs are made relative to. Defaults to the current
    /// directory.
    #[arg(long)]
    pub source_root: Option<PathBuf>,

    /// URL prefix for served artifacts.
    #[arg(long, default_value = "/")]
    pub root_url: String,

    /// Directory holding the persistent caches. Defaults to
    /// `<source-root>/.weft-cache`.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory of pre-built assets that bypass transformation.
    #[arg(long)]
    pub vendor_root: Option<PathBuf>,

    /// Bootstrap runtime file, served verbatim.
    #[arg(long)]
    pub bootstrap: Option<PathBuf>,

    /// Core-module shims as `name=path` pairs (repeatable).
    #[arg(long = "shim", value_name = "NAME=PATH")]
    pub shims: Vec<String>,

    /// Skip the persistent caches and run fully in memory.
    #[arg(long)]
    pub no_cache: bool,

    /// Enable debug logging.
    #[arg(long, short)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(long, short)]
    pub quiet: bool,
}
