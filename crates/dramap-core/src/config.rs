//! DRAM, memory-system, platform, and pool configuration.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{CACHELINE_SIZE, REFRESH_INTERVAL_FLOOR, REGULAR_REFRESH_INTERVAL_THRESHOLD};

/// 1 GiB in bytes.
pub const GB: u64 = 1 << 30;

/// Errors while deriving a DRAM geometry from module parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The chip table has no entry for the derived chip.
    #[error("no chip table entry for {ddr_type} chips of {chip_size} bytes with DQ width {dq_width}")]
    UnknownChip {
        /// DDR generation looked up
        ddr_type: DdrType,
        /// Per-chip capacity in bytes
        chip_size: u64,
        /// Chip data width
        dq_width: u16,
    },
}

/// DDR generation of the module under test. Selects the primary refresh
/// oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdrType {
    /// DDR4 modules (per-load refresh timing is observable)
    Ddr4,
    /// DDR5 modules (only whole-pair refresh straddling is observable)
    Ddr5,
}

impl FromStr for DdrType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ddr4" => Ok(DdrType::Ddr4),
            "ddr5" => Ok(DdrType::Ddr5),
            other => Err(format!("unsupported DDR type: {other}")),
        }
    }
}

impl Display for DdrType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DdrType::Ddr4 => write!(f, "DDR4"),
            DdrType::Ddr5 => write!(f, "DDR5"),
        }
    }
}

/// Memory-controller platform the measurements run on.
///
/// The tag changes how decomposition results are labeled and whether the
/// low physical-address hole (PCI offset) is subtracted before bit
/// arithmetic; the measurement machinery itself is identical everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// Intel client parts with DDR4 (e.g. Alder Lake + DDR4)
    IntelDdr4,
    /// Intel client parts with DDR5
    IntelDdr5,
    /// AMD Zen-based parts
    AmdZen,
}

impl Platform {
    /// Default low-hole offset subtracted from physical addresses before any
    /// function arithmetic. Zero on Intel; board-specific on AMD Zen, where
    /// the MMIO hole below 4 GiB shifts DRAM upwards (override it per board
    /// when it differs).
    pub fn default_pci_offset(&self) -> u64 {
        match self {
            Platform::IntelDdr4 | Platform::IntelDdr5 => 0,
            Platform::AmdZen => 0xc000_0000,
        }
    }

    /// Whether a measured refresh interval counts as reduced (tREFI/2).
    ///
    /// Intel parts additionally reject degenerate intervals from
    /// back-to-back spikes.
    pub fn is_reduced_interval(&self, interval: u64) -> bool {
        match self {
            Platform::AmdZen => interval < REGULAR_REFRESH_INTERVAL_THRESHOLD,
            Platform::IntelDdr4 | Platform::IntelDdr5 => {
                interval < REGULAR_REFRESH_INTERVAL_THRESHOLD && interval > REFRESH_INTERVAL_FLOOR
            }
        }
    }

    /// Component label for functions exhibiting reduced refresh intervals.
    pub fn reduced_interval_label(&self) -> &'static str {
        match self {
            Platform::IntelDdr4 => "channel, DIMM, and rank",
            Platform::IntelDdr5 => "channel, sub-channel, and bank address",
            Platform::AmdZen => "sub-channel, DIMM, and rank",
        }
    }
}

/// One row of the DRAM chip geometry table.
struct ChipEntry {
    ddr_type: DdrType,
    chip_size: u64,
    dq_width: u16,
    num_bank_group_bits: u32,
    num_bank_address_bits: u32,
    num_row_bits: u32,
    num_column_bits: u32,
    burst_length: u32,
}

const CHIP_TABLE: &[ChipEntry] = &[
    ChipEntry {
        ddr_type: DdrType::Ddr4,
        chip_size: 8 * GB,
        dq_width: 8,
        num_bank_group_bits: 2,
        num_bank_address_bits: 2,
        num_row_bits: 16,
        num_column_bits: 10,
        burst_length: 8,
    },
    ChipEntry {
        ddr_type: DdrType::Ddr4,
        chip_size: 16 * GB,
        dq_width: 8,
        num_bank_group_bits: 2,
        num_bank_address_bits: 2,
        num_row_bits: 17,
        num_column_bits: 10,
        burst_length: 8,
    },
    ChipEntry {
        ddr_type: DdrType::Ddr5,
        chip_size: 16 * GB,
        dq_width: 8,
        num_bank_group_bits: 3,
        num_bank_address_bits: 2,
        num_row_bits: 16,
        num_column_bits: 10,
        burst_length: 16,
    },
];

/// Geometry of one DRAM module, derived from the chip table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DramConfig {
    /// DDR generation
    pub ddr_type: DdrType,
    /// Module capacity in bytes
    pub module_size: u64,
    /// Ranks on the module
    pub num_ranks: u16,
    /// Chip data width (x8/x16/x32)
    pub dq_width: u16,
    /// Derived per-chip capacity in bytes
    pub chip_size: u64,
    /// Rank-select bits
    pub num_rank_bits: u32,
    /// Sub-channel bits (DDR5 only)
    pub num_subchannel_bits: u32,
    /// Bank-group bits
    pub num_bank_group_bits: u32,
    /// Bank-address bits within a group
    pub num_bank_address_bits: u32,
    /// Row-address bits
    pub num_row_bits: u32,
    /// Column bits at cache-line granularity (burst bits removed)
    pub num_column_bits: u32,
}

impl DramConfig {
    /// Derives the chip geometry from module-level parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownChip`] when the derived chip is not in
    /// the table.
    pub fn from_module(
        ddr_type: DdrType,
        module_size: u64,
        num_ranks: u16,
        dq_width: u16,
    ) -> Result<Self, ConfigError> {
        let chip_size = module_size / (num_ranks as u64 * 64 / dq_width as u64) * 8;
        let entry = CHIP_TABLE
            .iter()
            .find(|e| e.ddr_type == ddr_type && e.chip_size == chip_size && e.dq_width == dq_width)
            .ok_or(ConfigError::UnknownChip {
                ddr_type,
                chip_size,
                dq_width,
            })?;
        Ok(DramConfig {
            ddr_type,
            module_size,
            num_ranks,
            dq_width,
            chip_size,
            num_rank_bits: (num_ranks as u64).ilog2(),
            num_subchannel_bits: match ddr_type {
                DdrType::Ddr4 => 0,
                DdrType::Ddr5 => 1,
            },
            num_bank_group_bits: entry.num_bank_group_bits,
            num_bank_address_bits: entry.num_bank_address_bits,
            num_row_bits: entry.num_row_bits,
            num_column_bits: entry.num_column_bits - entry.burst_length.ilog2(),
        })
    }
}

impl Display for DramConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}Rx{},{}GB",
            self.ddr_type,
            self.num_ranks,
            self.dq_width,
            self.module_size / GB
        )
    }
}

/// Memory-system topology above the module level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Memory controllers
    pub num_mcs: u32,
    /// Channels per controller
    pub num_channels_per_mc: u32,
    /// DIMMs per channel
    pub num_dimms_per_channel: u32,
    /// Geometry of the (identical) modules
    pub dram: DramConfig,
}

impl MemoryConfig {
    /// Single-controller, single-channel topology around one module.
    pub fn single_channel(num_dimms: u32, dram: DramConfig) -> Self {
        MemoryConfig {
            num_mcs: 1,
            num_channels_per_mc: 1,
            num_dimms_per_channel: num_dimms,
            dram,
        }
    }

    fn num_modules(&self) -> u64 {
        (self.num_mcs * self.num_channels_per_mc * self.num_dimms_per_channel) as u64
    }

    /// log2 of the total installed memory; physical-address bits above this
    /// never participate in functions.
    pub fn max_bits(&self) -> u64 {
        (self.dram.module_size * self.num_modules()).ilog2() as u64
    }

    /// Independently addressable ranks (incl. sub-channels) in the system.
    pub fn num_ranks(&self) -> u64 {
        self.num_modules() << (self.dram.num_subchannel_bits + self.dram.num_rank_bits)
    }

    /// Banks in the system.
    pub fn num_banks(&self) -> u64 {
        self.num_ranks() << (self.dram.num_bank_group_bits + self.dram.num_bank_address_bits)
    }

    /// Expected number of bank-indexing functions (log2 of the bank count).
    pub fn num_functions(&self) -> u64 {
        self.num_banks().ilog2() as u64
    }

    /// Rank/DIMM combinations per channel.
    pub fn num_rank_dimms(&self) -> u64 {
        (self.num_dimms_per_channel as u64) << self.dram.num_rank_bits
    }

    /// Expected number of rank/DIMM-selecting functions.
    pub fn num_rank_dimm_functions(&self) -> u64 {
        self.num_rank_dimms().ilog2() as u64
    }

    /// Expected number of bank-address functions.
    pub fn num_bank_address_functions(&self) -> u64 {
        self.dram.num_bank_address_bits as u64
    }

    /// Expected number of row bits.
    pub fn num_row_bits(&self) -> u64 {
        self.dram.num_row_bits as u64
    }

    /// Expected number of column bits (cache-line granularity).
    pub fn num_column_bits(&self) -> u64 {
        self.dram.num_column_bits as u64
    }
}

/// Memory pool shape: how many pages of which size, and the sampling
/// granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Bytes per pool page
    pub page_size: u64,
    /// Number of pages to map
    pub num_pages: u64,
    /// Sampled addresses are floored to a multiple of this
    pub granularity: u64,
    /// Map the pages as 1 GiB hugetlb pages
    pub huge: bool,
}

impl PoolConfig {
    /// Pool of `num_pages` 1 GiB hugepages at cache-line granularity.
    pub fn hugepages(num_pages: u64) -> Self {
        PoolConfig {
            page_size: GB,
            num_pages,
            granularity: CACHELINE_SIZE,
            huge: true,
        }
    }

    /// Total pool size in bytes.
    pub fn pool_size(&self) -> u64 {
        self.page_size * self.num_pages
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            page_size: 4096,
            num_pages: 4,
            granularity: CACHELINE_SIZE,
            huge: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddr4_module_lookup() {
        // 32 GB 2Rx8 DDR4: 16 chips per rank, 16 Gb chips.
        let dram = DramConfig::from_module(DdrType::Ddr4, 32 * GB, 2, 8).unwrap();
        assert_eq!(dram.chip_size, 16 * GB);
        assert_eq!(dram.num_rank_bits, 1);
        assert_eq!(dram.num_subchannel_bits, 0);
        assert_eq!(dram.num_bank_group_bits, 2);
        assert_eq!(dram.num_bank_address_bits, 2);
        assert_eq!(dram.num_row_bits, 17);
        // 10 column bits minus 3 burst bits
        assert_eq!(dram.num_column_bits, 7);
    }

    #[test]
    fn test_ddr5_module_lookup() {
        let dram = DramConfig::from_module(DdrType::Ddr5, 32 * GB, 2, 8).unwrap();
        assert_eq!(dram.num_subchannel_bits, 1);
        assert_eq!(dram.num_bank_group_bits, 3);
        assert_eq!(dram.num_column_bits, 6);
    }

    #[test]
    fn test_unknown_chip_is_rejected() {
        assert!(DramConfig::from_module(DdrType::Ddr4, 3 * GB, 1, 8).is_err());
    }

    #[test]
    fn test_memory_config_counts() {
        let dram = DramConfig::from_module(DdrType::Ddr4, 32 * GB, 2, 8).unwrap();
        let memory = MemoryConfig::single_channel(1, dram);
        assert_eq!(memory.max_bits(), 35);
        assert_eq!(memory.num_ranks(), 2);
        assert_eq!(memory.num_banks(), 32);
        assert_eq!(memory.num_functions(), 5);
        assert_eq!(memory.num_rank_dimms(), 2);
        assert_eq!(memory.num_rank_dimm_functions(), 1);
    }

    #[test]
    fn test_platform_interval_classification() {
        assert!(Platform::AmdZen.is_reduced_interval(500));
        assert!(!Platform::IntelDdr4.is_reduced_interval(500));
        assert!(Platform::IntelDdr4.is_reduced_interval(12_000));
        assert!(!Platform::IntelDdr4.is_reduced_interval(23_000));
    }
}
