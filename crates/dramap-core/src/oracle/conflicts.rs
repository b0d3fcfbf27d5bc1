//! Row-buffer-conflict latency oracles.
//!
//! A paired access whose total latency lands inside
//! `[SBDR_LOWER_BOUND, SBDR_UPPER_BOUND]` hit the same bank in different
//! rows: the second load paid a precharge-activate cycle.

use crate::memory::AddrTuple;
use crate::timing::{flush, lfence, load, mfence, timestamp};
use crate::util::{Histogram, Stats, CONFLICT_ROUNDS};

/// Fills `histogram` (rows x 2: start timestamp, latency) with flushed
/// single-access timings of `addr`.
pub fn measure_single_access(addr: *const u8, histogram: &mut Histogram) {
    for i in 0..histogram.rows() {
        flush(addr);
        mfence();
        let t0 = timestamp();
        load(addr);
        lfence();
        let t1 = timestamp();
        histogram.set(i, 0, t0);
        histogram.set(i, 1, t1 - t0);
    }
}

/// Median single-access latency over [`CONFLICT_ROUNDS`] trials.
pub fn median_single_access(addr: *const u8) -> u64 {
    let mut histogram = Histogram::new(CONFLICT_ROUNDS, 2);
    measure_single_access(addr, &mut histogram);
    histogram.median(1)
}

/// Average single-access latency over [`CONFLICT_ROUNDS`] trials.
pub fn average_single_access(addr: *const u8) -> u64 {
    let mut histogram = Histogram::new(CONFLICT_ROUNDS, 2);
    measure_single_access(addr, &mut histogram);
    histogram.average(1)
}

/// Full latency statistics of single accesses to `addr`.
pub fn stat_single_access(addr: *const u8) -> Stats {
    let mut histogram = Histogram::new(CONFLICT_ROUNDS, 2);
    measure_single_access(addr, &mut histogram);
    histogram.statistics(1)
}

/// Fills `histogram` (rows x 2) with the total latency of loading `first`
/// then `second`, both flushed beforehand.
pub fn measure_paired_access(first: *const u8, second: *const u8, histogram: &mut Histogram) {
    for i in 0..histogram.rows() {
        flush(first);
        flush(second);
        mfence();
        let t0 = timestamp();
        load(first);
        load(second);
        lfence();
        let t1 = timestamp();
        histogram.set(i, 0, t0);
        histogram.set(i, 1, t1 - t0);
    }
}

/// Median paired-access latency over [`CONFLICT_ROUNDS`] trials.
pub fn median_paired_access(first: *const u8, second: *const u8) -> u64 {
    let mut histogram = Histogram::new(CONFLICT_ROUNDS, 2);
    measure_paired_access(first, second, &mut histogram);
    histogram.median(1)
}

/// Average paired-access latency over [`CONFLICT_ROUNDS`] trials.
pub fn average_paired_access(first: *const u8, second: *const u8) -> u64 {
    let mut histogram = Histogram::new(CONFLICT_ROUNDS, 2);
    measure_paired_access(first, second, &mut histogram);
    histogram.average(1)
}

/// Full latency statistics of paired accesses.
pub fn stat_paired_access(first: *const u8, second: *const u8) -> Stats {
    let mut histogram = Histogram::new(CONFLICT_ROUNDS, 2);
    measure_paired_access(first, second, &mut histogram);
    histogram.statistics(1)
}

/// Source of paired-access latencies for clustering and voting.
///
/// The hardware implementation times real loads; tests substitute a closure
/// deciding from the physical addresses alone.
pub trait ConflictTimer {
    /// Average cycles to fetch both tuples' lines from DRAM after flushing
    /// them.
    fn paired_latency(&mut self, first: &AddrTuple, second: &AddrTuple) -> u64;
}

impl<F> ConflictTimer for F
where
    F: FnMut(&AddrTuple, &AddrTuple) -> u64,
{
    fn paired_latency(&mut self, first: &AddrTuple, second: &AddrTuple) -> u64 {
        self(first, second)
    }
}

/// [`ConflictTimer`] backed by the rdtscp measurement kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct RdtscpTimer;

impl ConflictTimer for RdtscpTimer {
    fn paired_latency(&mut self, first: &AddrTuple, second: &AddrTuple) -> u64 {
        average_paired_access(first.vaddr, second.vaddr)
    }
}
