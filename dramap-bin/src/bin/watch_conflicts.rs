//! Drives the individual timing oracles: latency statistics for threshold
//! calibration (`stat`), long watch windows for offline inspection
//! (`watch`), and constrained-pair checks against a mapping hypothesis
//! (`check`).
//!
//! Usage:
//!
//! ```sh
//! sudo numactl -C <core> -m <node> ./watch_conflicts --mode stat --probe conflict
//! sudo numactl -C <core> -m <node> ./watch_conflicts --mode watch --probe refresh-fine
//! sudo numactl -C <core> -m <node> ./watch_conflicts --mode check --probe conflict \
//!     --same 2040 --diff 44000
//! ```

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use dramap::{init_logging_with_progress, parse_hex_list, require_root, MemoryArgs};
use dramap_core::util::{CONSECUTIVE_LENGTH, REFRESH_CYCLE_LOWER_BOUND};
use dramap_core::Constraints;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Latency statistics over random addresses
    Stat,
    /// One long raw measurement window
    Watch,
    /// Statistics over constrained address pairs
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Probe {
    /// Single and paired access latency (row-buffer conflicts)
    Conflict,
    /// Refresh spikes on repeated single accesses
    RefreshSingle,
    /// Refresh spikes on whole-pair accesses (DDR5 signal)
    RefreshCoarse,
    /// Refresh spikes with per-load latencies (DDR4 signal)
    RefreshFine,
    /// Consecutive read-read latency over row-buffer-hit streams
    Rdrd,
}

/// CLI arguments for the `watch_conflicts` binary.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct CliArgs {
    #[clap(flatten)]
    memory: MemoryArgs,
    /// What to do with the probe.
    #[clap(long, short = 'm', value_enum, default_value_t = Mode::Stat)]
    mode: Mode,
    /// Which oracle to drive.
    #[clap(long, value_enum, default_value_t = Probe::Conflict)]
    probe: Probe,
    /// Latency threshold separating refresh spikes, in cycles.
    #[clap(long, default_value_t = REFRESH_CYCLE_LOWER_BOUND)]
    threshold: u64,
    /// Reads per stream for the rdrd probe.
    #[clap(long, default_value_t = CONSECUTIVE_LENGTH)]
    length: usize,
    /// Constraints: functions that must match, in hex (check mode).
    #[clap(long, short = 'S', default_value = "")]
    same: String,
    /// Constraints: functions that must differ, in hex (check mode).
    #[clap(long, short = 'D', default_value = "")]
    diff: String,
    /// Row bits of the mapping under test, in hex.
    #[clap(long, short = 'R', default_value = "0")]
    row: String,
    /// Column bits of the mapping under test, in hex.
    #[clap(long, short = 'C', default_value = "0")]
    column: String,
}

impl CliArgs {
    fn constraints(&self) -> Result<Constraints> {
        Ok(Constraints {
            same_functions: parse_hex_list(&self.same)?,
            diff_functions: parse_hex_list(&self.diff)?,
            row_mask: parse_hex_list(&self.row)?.first().copied().unwrap_or(0),
            column_mask: parse_hex_list(&self.column)?.first().copied().unwrap_or(0),
        })
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging_with_progress()?;
    require_root("watch_conflicts")?;

    let constraints = args.constraints()?;
    let mut addressing = args.memory.build()?;
    // the rdrd probe draws its row-buffer-hit offsets from the column mask
    addressing.set_row_bits(constraints.row_mask);
    addressing.set_column_bits(constraints.column_mask);

    match (args.probe, args.mode) {
        (Probe::Conflict, Mode::Stat) => {
            addressing.stat_single_memory_access()?;
            addressing.stat_paired_memory_access()?;
        }
        (Probe::Conflict, Mode::Check) => {
            addressing.check_paired_memory_access(&constraints)?;
        }
        (Probe::RefreshSingle, Mode::Watch) => {
            addressing.watch_refresh_single_access()?;
        }
        (Probe::RefreshSingle, Mode::Stat) => {
            addressing.stat_ref_interval_single_access(args.threshold)?;
        }
        (Probe::RefreshCoarse, Mode::Watch) => {
            addressing.watch_refresh_paired_access_coarse()?;
        }
        (Probe::RefreshCoarse, Mode::Stat) => {
            addressing.stat_ref_interval_paired_access_coarse(args.threshold)?;
        }
        (Probe::RefreshCoarse, Mode::Check) => {
            addressing.check_ref_interval_paired_access_coarse(&constraints, args.threshold)?;
        }
        (Probe::RefreshFine, Mode::Watch) => {
            addressing.watch_refresh_paired_access_fine()?;
        }
        (Probe::RefreshFine, Mode::Stat) => {
            addressing.stat_ref_interval_paired_access_fine(args.threshold)?;
        }
        (Probe::RefreshFine, Mode::Check) => {
            addressing.check_ref_interval_paired_access_fine(&constraints, args.threshold)?;
        }
        (Probe::Rdrd, Mode::Stat) => {
            addressing.stat_read_read_access(args.length)?;
        }
        (Probe::Rdrd, Mode::Check) => {
            addressing.check_read_read_access(&constraints, args.length)?;
        }
        (probe, mode) => {
            bail!("unsupported combination: probe {probe:?} with mode {mode:?}");
        }
    }
    Ok(())
}
