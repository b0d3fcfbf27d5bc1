//! Recovers the DRAM bank-indexing functions from scratch.
//!
//! Usage:
//!
//! ```sh
//! sudo numactl -C <core> -m <node> ./reverse_functions [OPTIONS]
//! ```

use anyhow::Result;
use clap::Parser;
use dramap::{init_logging_with_progress, require_root, MemoryArgs};
use log::{info, warn};

/// CLI arguments for the `reverse_functions` binary.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    #[clap(flatten)]
    memory: MemoryArgs,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging_with_progress()?;
    require_root("reverse_functions")?;

    let mut addressing = args.memory.build()?;
    if addressing.reverse_addressing_functions()? {
        info!("derived addressing functions:");
        for function in addressing.addressing_functions() {
            info!("  0x{function:x}");
        }
    } else {
        warn!("function derivation incomplete; rerun with a quieter core or more pool pages");
    }
    Ok(())
}
