//! Command-line entry point for fpgaforge.

use anyhow::Result;
use clap::Parser;
use fpgaforge_closure::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
