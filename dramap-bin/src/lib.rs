//! # dramap
//!
//! Drivers around `dramap-core`: CLI surfaces, logging setup, and pipeline
//! orchestration for the three binaries:
//!
//! - `reverse_functions` - recover the bank-indexing XOR functions from
//!   scratch.
//! - `identify_bits` - classify row/column bits for known functions,
//!   validate the mapping, and optionally decompose the functions.
//! - `watch_conflicts` - drive the individual timing oracles for
//!   threshold calibration and hypothesis checks.
//!
//! All binaries must run as root on a dedicated core with 1 GiB hugepages
//! reserved, e.g.:
//!
//! ```sh
//! sudo numactl -C 4 -m 0 ./target/release/reverse_functions -p 19 -t ddr4
//! ```

use anyhow::{bail, Context};
use clap::Args;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use dramap_core::config::GB;
use dramap_core::{
    Addressing, AddressingConfig, DdrType, DramConfig, MemoryConfig, Platform, PoolConfig,
};

/// Wires `env_logger` through the progress-bar bridge so log lines do not
/// tear running progress bars.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Fails unless the process runs as root; pagemap PFNs and hugetlb mappings
/// need it.
pub fn require_root(binary: &str) -> anyhow::Result<()> {
    if !rustix::process::geteuid().is_root() {
        bail!("{binary} requires root privileges (pagemap and hugepages)");
    }
    Ok(())
}

/// Parses a comma-separated list of hex masks (`0x` prefixes optional).
pub fn parse_hex_list(input: &str) -> anyhow::Result<Vec<u64>> {
    input
        .split(',')
        .filter(|token| !token.trim().is_empty())
        .map(|token| {
            let trimmed = token.trim().trim_start_matches("0x");
            u64::from_str_radix(trimmed, 16)
                .with_context(|| format!("invalid hex function mask: {token}"))
        })
        .collect()
}

/// Memory-system options shared by every binary.
#[derive(Debug, Args, Clone)]
pub struct MemoryArgs {
    /// Output filename prefix.
    #[clap(long, short = 'o', default_value = "default")]
    pub output: String,
    /// Number of 1 GiB pool pages to allocate.
    #[clap(long, short = 'p', default_value = "19")]
    pub pages: u64,
    /// DDR type (ddr4 or ddr5).
    #[clap(long = "type", short = 't', default_value = "ddr4")]
    pub ddr_type: String,
    /// Number of DRAM modules (DIMMs per channel).
    #[clap(long, short = 'n', default_value = "1")]
    pub num: u32,
    /// Size of a DRAM module in GiB.
    #[clap(long, short = 's', default_value = "32")]
    pub size: u64,
    /// Number of ranks per DRAM module.
    #[clap(long, short = 'r', default_value = "2")]
    pub rank: u16,
    /// DQ width of the DRAM chips (8, 16, or 32).
    #[clap(long, short = 'w', default_value = "8")]
    pub width: u16,
    /// Target an AMD Zen memory controller instead of Intel.
    #[clap(long)]
    pub amd: bool,
    /// Override the PCI offset (hex) subtracted from physical addresses.
    #[clap(long)]
    pub pci_offset: Option<String>,
    /// Enable debug output (raw cluster dumps).
    #[clap(long, short = 'd')]
    pub debug: bool,
    /// Enable verbose mode (echo sink rows to the console).
    #[clap(long, short = 'v')]
    pub verbose: bool,
    /// Enable logging to per-operation files.
    #[clap(long, short = 'l')]
    pub log: bool,
}

impl MemoryArgs {
    /// DDR type parsed from the command line.
    pub fn ddr_type(&self) -> anyhow::Result<DdrType> {
        self.ddr_type.parse().map_err(anyhow::Error::msg)
    }

    /// Platform tag derived from the `--amd` flag and DDR type.
    pub fn platform(&self) -> anyhow::Result<Platform> {
        Ok(match (self.amd, self.ddr_type()?) {
            (true, _) => Platform::AmdZen,
            (false, DdrType::Ddr4) => Platform::IntelDdr4,
            (false, DdrType::Ddr5) => Platform::IntelDdr5,
        })
    }

    /// Builds the discovery engine: chip lookup, pool mapping, sinks.
    pub fn build(&self) -> anyhow::Result<Addressing> {
        let ddr_type = self.ddr_type()?;
        let dram = DramConfig::from_module(ddr_type, self.size * GB, self.rank, self.width)
            .context("unsupported DRAM module configuration")?;
        let memory = MemoryConfig::single_channel(self.num, dram);
        let addressing = Addressing::new(
            self.platform()?,
            memory,
            PoolConfig::hugepages(self.pages),
            AddressingConfig {
                fname_prefix: self.output.clone(),
                verbose: self.verbose,
                logging: self.log,
                debug: self.debug,
            },
        )
        .context("failed to initialize the discovery engine")?;
        Ok(match &self.pci_offset {
            Some(hex) => {
                let offset = u64::from_str_radix(hex.trim_start_matches("0x"), 16)
                    .with_context(|| format!("invalid PCI offset: {hex}"))?;
                addressing.with_pci_offset(offset)
            }
            None => addressing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::parse_hex_list;

    #[test]
    fn test_parse_hex_list() {
        assert_eq!(
            parse_hex_list("0x2040,1080").unwrap(),
            vec![0x2040, 0x1080]
        );
        assert_eq!(parse_hex_list("").unwrap(), Vec::<u64>::new());
        assert!(parse_hex_list("0xzz").is_err());
    }
}
