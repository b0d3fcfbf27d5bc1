//! Classifies row/column bits for known bank functions, validates the
//! mapping, and optionally decomposes the functions into components.
//!
//! Usage:
//!
//! ```sh
//! sudo numactl -C <core> -m <node> ./identify_bits -f 2040,44000,88000 [OPTIONS]
//! ```

use anyhow::Result;
use clap::Parser;
use dramap::{init_logging_with_progress, parse_hex_list, require_root, MemoryArgs};
use log::{info, warn};

/// CLI arguments for the `identify_bits` binary.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    #[clap(flatten)]
    memory: MemoryArgs,
    /// DRAM addressing functions in hex, separated by commas.
    #[clap(long, short = 'f', required = true)]
    functions: String,
    /// Continue into refresh- and consecutive-access decomposition after
    /// validation.
    #[clap(long)]
    decompose: bool,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging_with_progress()?;
    require_root("identify_bits")?;

    let functions = parse_hex_list(&args.functions)?;
    let mut addressing = args.memory.build()?;
    addressing.set_addressing_functions(functions.clone());
    addressing.identify_bits(&functions)?;

    if !addressing.validate_address_mapping() {
        warn!("mapping is not injective; refine the functions and retry");
        return Ok(());
    }
    info!("row_bits: 0x{:x}", addressing.row_bits());
    info!("column_bits: 0x{:x}", addressing.column_bits());

    if args.decompose {
        addressing.decompose_using_refreshes()?;
        addressing.decompose_using_consecutive_accesses()?;
        info!("rank-class functions:");
        for function in addressing.rank_functions() {
            info!("  0x{function:x}");
        }
        info!("bank address functions:");
        for function in addressing.bank_address_functions() {
            info!("  0x{function:x}");
        }
        info!("bank group / channel functions:");
        for function in addressing.bank_group_functions() {
            info!("  0x{function:x}");
        }
    }
    Ok(())
}
