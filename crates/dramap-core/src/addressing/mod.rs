//! The address-function discovery engine.
//!
//! [`Addressing`] owns the memory pool and every derived artifact, and runs
//! a fixed pipeline: initialization (construction), function recovery
//! ([`Addressing::reverse_addressing_functions`]) or user-supplied functions
//! ([`Addressing::set_addressing_functions`]), bit identification
//! ([`Addressing::identify_bits`]), injectivity validation
//! ([`Addressing::validate_address_mapping`]), optional decomposition
//! ([`Addressing::decompose_using_refreshes`],
//! [`Addressing::decompose_using_consecutive_accesses`]), and finalization
//! (drop). Each stage consumes its predecessor's outputs; there are no
//! cycles.
//!
//! Measurement-level noise and structural mismatches never escape as
//! errors: operations return booleans and log. Only environment faults
//! (mmap, pagemap) surface as [`EnvironmentError`], and those are fatal to
//! the run.

mod decompose;
mod identify;
mod reverse;
mod solver;
mod validate;

use itertools::Itertools;
use log::{info, warn};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MemoryConfig, Platform, PoolConfig};
use crate::memory::{AddrTuple, MemoryPool, PoolError};
use crate::oracle::{
    measure_refresh_paired_coarse, measure_refresh_paired_fine, measure_refresh_single,
    stat_paired_access, stat_read_read, stat_refresh_interval_paired_coarse,
    stat_refresh_interval_paired_fine, stat_refresh_interval_single, stat_single_access,
};
use crate::sink::{OpSink, SinkRegistry};
use crate::util::{
    generate_all_combinations, Histogram, Rng, CONSTRAINT_RETRIES, MAX_NUM_TRIALS,
    NUM_EFFECTIVE_TRIALS, REFRESH_ROUNDS, STAT_SAMPLES,
};

/// Same/diff function constraints for generated address pairs.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    /// Functions whose parity must match the base address
    pub same_functions: Vec<u64>,
    /// Functions whose parity must differ from the base address
    pub diff_functions: Vec<u64>,
    /// Row bits of the mapping under test (informational in most checks)
    pub row_mask: u64,
    /// Column bits of the mapping under test
    pub column_mask: u64,
}

/// Behavior toggles for a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressingConfig {
    /// Prefix for every `<prefix>.<op>.log` output file
    pub fname_prefix: String,
    /// Echo sink rows through the log facade
    pub verbose: bool,
    /// Write the per-operation log files
    pub logging: bool,
    /// Dump raw cluster data and extra diagnostics
    pub debug: bool,
}

impl Default for AddressingConfig {
    fn default() -> Self {
        AddressingConfig {
            fname_prefix: "default".to_owned(),
            verbose: false,
            logging: false,
            debug: false,
        }
    }
}

/// Environment faults that make the engine unusable. Everything else is
/// reported through booleans and log lines.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Pool allocation or pagemap translation failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// The discovery engine: memory pool, derived function sets, and the
/// measurement operations over them.
///
/// The pool (and with it every [`AddrTuple`] handed out) lives as long as
/// the instance; dropping it unmaps the pool.
pub struct Addressing {
    pool: MemoryPool,
    platform: Platform,
    memory_config: MemoryConfig,
    addressing_config: AddressingConfig,
    sinks: SinkRegistry,
    rng: Rng,
    max_bits: u64,
    pci_offset: u64,

    sbdr_sets: Vec<Vec<AddrTuple>>,
    addressing_functions: Vec<u64>,
    channel_functions: Vec<u64>,
    rank_functions: Vec<u64>,
    bank_functions: Vec<u64>,
    bank_group_functions: Vec<u64>,
    bank_address_functions: Vec<u64>,
    row_functions: Vec<u64>,
    column_functions: Vec<u64>,
    row_bits: u64,
    column_bits: u64,
}

impl Addressing {
    /// Maps the pool and prepares the sink registry.
    ///
    /// # Errors
    ///
    /// Fails when the pool cannot be mapped or the pagemap cannot be
    /// opened; both are fatal for a measurement run.
    pub fn new(
        platform: Platform,
        memory_config: MemoryConfig,
        pool_config: PoolConfig,
        addressing_config: AddressingConfig,
    ) -> Result<Self, EnvironmentError> {
        let seed: u64 = rand::random();
        let mut pool = MemoryPool::new(pool_config, seed)?;
        let sinks = SinkRegistry::new(
            addressing_config.fname_prefix.clone(),
            addressing_config.verbose,
            addressing_config.logging,
        );
        if addressing_config.verbose {
            info!("memory pool (seed 0x{seed:x}):");
            for i in 0..pool.num_pages() {
                let vaddr = pool.page(i);
                let paddr = pool.virt_to_phys(vaddr as u64)?;
                info!("  pool {},{:p},0x{:x}", i + 1, vaddr, paddr);
            }
        }
        let max_bits = memory_config.max_bits();
        let pci_offset = platform.default_pci_offset();
        Ok(Addressing {
            pool,
            platform,
            memory_config,
            addressing_config,
            sinks,
            rng: Rng::from_seed(seed ^ 0x5eed),
            max_bits,
            pci_offset,
            sbdr_sets: Vec::new(),
            addressing_functions: Vec::new(),
            channel_functions: Vec::new(),
            rank_functions: Vec::new(),
            bank_functions: Vec::new(),
            bank_group_functions: Vec::new(),
            bank_address_functions: Vec::new(),
            row_functions: Vec::new(),
            column_functions: Vec::new(),
            row_bits: 0,
            column_bits: 0,
        })
    }

    /// Overrides the platform's default PCI offset (board-specific on AMD).
    pub fn with_pci_offset(mut self, pci_offset: u64) -> Self {
        self.pci_offset = pci_offset;
        self
    }

    /// Physical-address bits participating in the mapping.
    pub fn max_bits(&self) -> u64 {
        self.max_bits
    }

    /// Offset subtracted from physical addresses before function
    /// arithmetic.
    pub fn pci_offset(&self) -> u64 {
        self.pci_offset
    }

    /// The bank-indexing functions (derived or user-supplied).
    pub fn addressing_functions(&self) -> &[u64] {
        &self.addressing_functions
    }

    /// Same-bank clusters from the last
    /// [`Addressing::reverse_addressing_functions`] run, PCI-normalized.
    pub fn sbdr_sets(&self) -> &[Vec<AddrTuple>] {
        &self.sbdr_sets
    }

    /// Supplies externally known bank-indexing functions, skipping
    /// [`Addressing::reverse_addressing_functions`].
    pub fn set_addressing_functions(&mut self, functions: Vec<u64>) {
        self.addressing_functions = functions;
    }

    /// Channel-selecting functions.
    pub fn channel_functions(&self) -> &[u64] {
        &self.channel_functions
    }

    /// Supplies externally known channel functions.
    pub fn set_channel_functions(&mut self, functions: Vec<u64>) {
        self.channel_functions = functions;
    }

    /// Rank-class functions (rank/DIMM/sub-channel, platform depending).
    pub fn rank_functions(&self) -> &[u64] {
        &self.rank_functions
    }

    /// Supplies externally known rank-class functions.
    pub fn set_rank_functions(&mut self, functions: Vec<u64>) {
        self.rank_functions = functions;
    }

    /// Bank-selecting functions.
    pub fn bank_functions(&self) -> &[u64] {
        &self.bank_functions
    }

    /// Supplies externally known bank functions.
    pub fn set_bank_functions(&mut self, functions: Vec<u64>) {
        self.bank_functions = functions;
    }

    /// Bank-group functions (or channel, resolved by elimination).
    pub fn bank_group_functions(&self) -> &[u64] {
        &self.bank_group_functions
    }

    /// Supplies externally known bank-group functions.
    pub fn set_bank_group_functions(&mut self, functions: Vec<u64>) {
        self.bank_group_functions = functions;
    }

    /// Bank-address functions.
    pub fn bank_address_functions(&self) -> &[u64] {
        &self.bank_address_functions
    }

    /// Supplies externally known bank-address functions.
    pub fn set_bank_address_functions(&mut self, functions: Vec<u64>) {
        self.bank_address_functions = functions;
    }

    /// Mask of identified row bits.
    pub fn row_bits(&self) -> u64 {
        self.row_bits
    }

    /// Supplies externally known row bits.
    pub fn set_row_bits(&mut self, bits: u64) {
        self.row_bits = bits;
    }

    /// Mask of identified column bits.
    pub fn column_bits(&self) -> u64 {
        self.column_bits
    }

    /// Supplies externally known column bits.
    pub fn set_column_bits(&mut self, bits: u64) {
        self.column_bits = bits;
    }

    /// Samples one address tuple from the pool.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn generate_random_address_tuple(&mut self) -> Result<AddrTuple, EnvironmentError> {
        Ok(self.pool.sample()?)
    }

    /// Samples two tuples with distinct virtual addresses.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn generate_two_random_address_tuples(
        &mut self,
    ) -> Result<(AddrTuple, AddrTuple), EnvironmentError> {
        Ok(self.pool.sample_distinct_pair()?)
    }

    /// Solves for a pool-resident address matching `first` under every mask
    /// in `same` and differing under every mask in `diff`.
    ///
    /// Returns `None` when the system is infeasible or the randomized
    /// solution fell outside the pool; callers retry, usually with a fresh
    /// base.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn generate_with_constraints(
        &mut self,
        first: &AddrTuple,
        same: &[u64],
        diff: &[u64],
    ) -> Result<Option<AddrTuple>, EnvironmentError> {
        let base = first.paddr - self.pci_offset;
        let Some(solution) =
            solver::solve_constraints(base, same, diff, self.max_bits, &mut self.rng)
        else {
            return Ok(None);
        };
        let paddr = solution + self.pci_offset;
        match self.pool.phys_to_virt(paddr)? {
            Some(vaddr) => Ok(Some(AddrTuple { vaddr, paddr })),
            None => Ok(None),
        }
    }

    /// A fresh base plus a constrained partner, resampling the base when the
    /// solution space keeps missing the pool. `None` after bounded retries
    /// (the constraints are then most likely infeasible).
    fn constrained_pair(
        &mut self,
        same: &[u64],
        diff: &[u64],
    ) -> Result<Option<(AddrTuple, AddrTuple)>, EnvironmentError> {
        for _ in 0..MAX_NUM_TRIALS {
            let first = self.pool.sample()?;
            for _ in 0..CONSTRAINT_RETRIES {
                if let Some(second) = self.generate_with_constraints(&first, same, diff)? {
                    return Ok(Some((first, second)));
                }
            }
        }
        warn!("could not generate a constrained address pair; check the constraints");
        Ok(None)
    }

    /// Random XOR offsets over the column bits not covered by any
    /// addressing function. Flipping them moves an access within its open
    /// row, producing row-buffer hits.
    pub fn generate_row_buffer_hit_sequences(&mut self, length: usize) -> Vec<u64> {
        let used: u64 = self.addressing_functions.iter().fold(0, |acc, f| acc | f);
        let unused_column_bits = self.column_bits & !used;
        let mut generated = generate_all_combinations(unused_column_bits);
        generated.shuffle(&mut self.rng);
        generated.truncate(length);
        generated
    }

    /// Two read streams of `length` row-buffer-hit addresses around the
    /// given pair. `None` when an offset address is not pool-resident or
    /// not enough offsets exist.
    fn row_buffer_hit_streams(
        &mut self,
        first: &AddrTuple,
        second: &AddrTuple,
        length: usize,
    ) -> Result<Option<(Vec<*const u8>, Vec<*const u8>)>, EnvironmentError> {
        let mut streams: Vec<Vec<*const u8>> = Vec::with_capacity(2);
        for tuple in [first, second] {
            let offsets = self.generate_row_buffer_hit_sequences(length);
            if offsets.len() < length {
                return Ok(None);
            }
            let mut addrs = Vec::with_capacity(length);
            for &offset in &offsets {
                let paddr = ((tuple.paddr - self.pci_offset) ^ offset) + self.pci_offset;
                match self.pool.phys_to_virt(paddr)? {
                    Some(vaddr) => addrs.push(vaddr as *const u8),
                    None => return Ok(None),
                }
            }
            streams.push(addrs);
        }
        let second_stream = streams.pop().unwrap_or_default();
        let first_stream = streams.pop().unwrap_or_default();
        Ok(Some((first_stream, second_stream)))
    }

    fn write_constraints_header(sink: &mut OpSink, constraints: &Constraints) {
        sink.line(format_args!(
            "diff_functions,{}",
            constraints
                .diff_functions
                .iter()
                .map(|f| format!("0x{f:x}"))
                .join(",")
        ));
        sink.line(format_args!(
            "same_functions,{}",
            constraints
                .same_functions
                .iter()
                .map(|f| format!("0x{f:x}"))
                .join(",")
        ));
    }

    /// Latency statistics of single accesses to random pool addresses.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn stat_single_memory_access(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("stat.single.memory.access");
        sink.line(format_args!("idx,paddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let tuple = self.generate_random_address_tuple()?;
            let stats = stat_single_access(tuple.vaddr);
            sink.line(format_args!(
                "{},0x{:x},{},{},{},{}",
                i,
                tuple.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Latency statistics of paired accesses to random address pairs.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn stat_paired_memory_access(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("stat.paired.memory.access");
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let (first, second) = self.generate_two_random_address_tuples()?;
            let stats = stat_paired_access(first.vaddr, second.vaddr);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                i,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Paired-access latency of pairs generated under the given
    /// constraints; used to confirm a mapping hypothesis.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn check_paired_memory_access(
        &mut self,
        constraints: &Constraints,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("check.paired.memory.access");
        Self::write_constraints_header(&mut sink, constraints);
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let Some((first, second)) =
                self.constrained_pair(&constraints.same_functions, &constraints.diff_functions)?
            else {
                break;
            };
            let stats = stat_paired_access(first.vaddr, second.vaddr);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                i,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Records one long single-access window so refresh spikes can be
    /// inspected offline.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn watch_refresh_single_access(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("watch.refresh.single");
        sink.line(format_args!("idx,start,latency"));
        let tuple = self.generate_random_address_tuple()?;
        let mut histogram = Histogram::new(REFRESH_ROUNDS, 2);
        measure_refresh_single(tuple.vaddr, &mut histogram);
        for i in 0..histogram.rows() {
            sink.line(format_args!(
                "{},{},{}",
                i,
                histogram.get(i, 0) - histogram.get(0, 0),
                histogram.get(i, 1)
            ));
        }
        Ok(())
    }

    /// Refresh-interval statistics of single accesses to random addresses.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn stat_ref_interval_single_access(
        &mut self,
        threshold: u64,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("stat.refresh.interval.single.access");
        sink.line(format_args!("idx,paddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let tuple = self.generate_random_address_tuple()?;
            let stats = stat_refresh_interval_single(tuple.vaddr, threshold);
            sink.line(format_args!(
                "{},0x{:x},{},{},{},{}",
                i,
                tuple.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Records one coarse paired window for offline refresh inspection.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn watch_refresh_paired_access_coarse(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("watch.refresh.coarse");
        sink.line(format_args!("idx,start,latency"));
        let (first, second) = self.generate_two_random_address_tuples()?;
        let mut histogram = Histogram::new(REFRESH_ROUNDS, 2);
        measure_refresh_paired_coarse(first.vaddr, second.vaddr, &mut histogram);
        for i in 0..histogram.rows() {
            sink.line(format_args!(
                "{},{},{}",
                i,
                histogram.get(i, 0) - histogram.get(0, 0),
                histogram.get(i, 1)
            ));
        }
        Ok(())
    }

    /// Refresh-interval statistics of coarse paired windows over random
    /// pairs.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn stat_ref_interval_paired_access_coarse(
        &mut self,
        threshold: u64,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("stat.refresh.coarse");
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let (first, second) = self.generate_two_random_address_tuples()?;
            let stats = stat_refresh_interval_paired_coarse(first.vaddr, second.vaddr, threshold);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                i,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Refresh-interval statistics of coarse paired windows over
    /// constrained pairs.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn check_ref_interval_paired_access_coarse(
        &mut self,
        constraints: &Constraints,
        threshold: u64,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("check.refresh.coarse");
        Self::write_constraints_header(&mut sink, constraints);
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let Some((first, second)) =
                self.constrained_pair(&constraints.same_functions, &constraints.diff_functions)?
            else {
                break;
            };
            let stats = stat_refresh_interval_paired_coarse(first.vaddr, second.vaddr, threshold);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                i,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Records one fine paired window (per-load latencies) for offline
    /// refresh inspection.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn watch_refresh_paired_access_fine(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("watch.refresh.fine");
        sink.line(format_args!("idx,start,first_latency,second_latency"));
        let (first, second) = self.generate_two_random_address_tuples()?;
        let mut histogram = Histogram::new(REFRESH_ROUNDS, 3);
        measure_refresh_paired_fine(first.vaddr, second.vaddr, &mut histogram);
        for i in 0..histogram.rows() {
            sink.line(format_args!(
                "{},{},{},{}",
                i,
                histogram.get(i, 0) - histogram.get(0, 0),
                histogram.get(i, 1),
                histogram.get(i, 2)
            ));
        }
        Ok(())
    }

    /// Refresh-interval statistics of fine paired windows over random
    /// pairs.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn stat_ref_interval_paired_access_fine(
        &mut self,
        threshold: u64,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("stat.refresh.fine");
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let (first, second) = self.generate_two_random_address_tuples()?;
            let stats = stat_refresh_interval_paired_fine(first.vaddr, second.vaddr, threshold);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                i,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Refresh-interval statistics of fine paired windows over constrained
    /// pairs.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn check_ref_interval_paired_access_fine(
        &mut self,
        constraints: &Constraints,
        threshold: u64,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("check.refresh.fine");
        Self::write_constraints_header(&mut sink, constraints);
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        for i in 0..STAT_SAMPLES {
            let Some((first, second)) =
                self.constrained_pair(&constraints.same_functions, &constraints.diff_functions)?
            else {
                break;
            };
            let stats = stat_refresh_interval_paired_fine(first.vaddr, second.vaddr, threshold);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                i,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Consecutive read-read latency statistics over random pairs expanded
    /// into row-buffer-hit streams.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn stat_read_read_access(&mut self, length: usize) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("stat.rdrd");
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        let mut trials = 0u64;
        let mut attempts = 0u64;
        while trials < NUM_EFFECTIVE_TRIALS && attempts < MAX_NUM_TRIALS {
            attempts += 1;
            let (first, second) = self.generate_two_random_address_tuples()?;
            let Some((faddrs, saddrs)) = self.row_buffer_hit_streams(&first, &second, length)?
            else {
                continue;
            };
            trials += 1;
            let stats = stat_read_read(&faddrs, &saddrs);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                trials,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }

    /// Consecutive read-read latency statistics over constrained pairs.
    ///
    /// # Errors
    ///
    /// Only pagemap faults escape.
    pub fn check_read_read_access(
        &mut self,
        constraints: &Constraints,
        length: usize,
    ) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("check.rdrd");
        Self::write_constraints_header(&mut sink, constraints);
        sink.line(format_args!("idx,fpaddr,spaddr,avg,med,min,max"));
        let mut trials = 0u64;
        let mut attempts = 0u64;
        while trials < NUM_EFFECTIVE_TRIALS && attempts < MAX_NUM_TRIALS {
            attempts += 1;
            let Some((first, second)) =
                self.constrained_pair(&constraints.same_functions, &constraints.diff_functions)?
            else {
                break;
            };
            let Some((faddrs, saddrs)) = self.row_buffer_hit_streams(&first, &second, length)?
            else {
                continue;
            };
            trials += 1;
            let stats = stat_read_read(&faddrs, &saddrs);
            sink.line(format_args!(
                "{},0x{:x},0x{:x},{},{},{},{}",
                trials,
                first.paddr - self.pci_offset,
                second.paddr - self.pci_offset,
                stats.avg,
                stats.med,
                stats.min,
                stats.max
            ));
        }
        Ok(())
    }
}
