use std::path::PathBuf;

use clap::Parser;

/// dotweave - inject class-invariant and postcondition checks into CIL modules
#[derive(Debug, Parser)]
#[command(name = "dotweave", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    /// Module to rewrite.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Where to write the rewritten module. Overwrites INPUT when omitted.
    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Analyze and rewrite in memory, write nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Neither read nor write the companion portable PDB.
    #[arg(long)]
    pub no_symbols: bool,
}

/// Options that control output.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Print the weave report as JSON instead of human-readable text.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}
