//! Consecutive read-read latency oracle.
//!
//! Two streams of row-buffer-hit reads are interleaved inside one timed
//! region so the memory controller is free to schedule them. When the
//! streams collide on bank-address-adjacent banks the controller serializes
//! harder, inflating the total latency; bank-group-adjacent streams overlap
//! almost fully. The decomposer ranks functions by this difference.

use crate::timing::{flush, load, mfence, timestamp};
use crate::util::{Histogram, Stats, CONSECUTIVE_ROUNDS};

/// Times the interleaved reads `first[0], second[0], first[1], second[1], …`
/// into `histogram` (rows x 2). All `2 * length` lines are flushed before
/// each trial.
pub fn measure_read_read(first: &[*const u8], second: &[*const u8], histogram: &mut Histogram) {
    debug_assert_eq!(first.len(), second.len());
    for i in 0..histogram.rows() {
        for j in 0..first.len() {
            flush(first[j]);
            flush(second[j]);
        }
        mfence();
        let t0 = timestamp();
        // the controller schedules this window on its own
        for j in 0..first.len() {
            load(first[j]);
            load(second[j]);
        }
        mfence();
        let t1 = timestamp();
        histogram.set(i, 0, t0);
        histogram.set(i, 1, t1 - t0);
    }
}

/// Median read-read latency over [`CONSECUTIVE_ROUNDS`] trials.
pub fn median_read_read(first: &[*const u8], second: &[*const u8]) -> u64 {
    let mut histogram = Histogram::new(CONSECUTIVE_ROUNDS, 2);
    measure_read_read(first, second, &mut histogram);
    histogram.median(1)
}

/// Average read-read latency over [`CONSECUTIVE_ROUNDS`] trials.
pub fn average_read_read(first: &[*const u8], second: &[*const u8]) -> u64 {
    let mut histogram = Histogram::new(CONSECUTIVE_ROUNDS, 2);
    measure_read_read(first, second, &mut histogram);
    histogram.average(1)
}

/// Full read-read latency statistics.
pub fn stat_read_read(first: &[*const u8], second: &[*const u8]) -> Stats {
    let mut histogram = Histogram::new(CONSECUTIVE_ROUNDS, 2);
    measure_read_read(first, second, &mut histogram);
    histogram.statistics(1)
}
