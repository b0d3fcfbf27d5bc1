//! Refresh-interval oracles.
//!
//! DRAM refresh blocks a bank for tRFC; accesses issued while the refresh is
//! in flight are delayed, so a long run of back-to-back timed accesses shows
//! periodic latency spikes spaced tREFI apart. Some controllers refresh
//! certain ranks/DIMMs at tREFI/2, which is the signature the decomposer
//! looks for.

use log::error;

use crate::config::DdrType;
use crate::timing::{flush, lfence, load, mfence, timestamp};
use crate::util::{Histogram, Stats, REFRESH_ROUNDS};

/// Records a long window of single-access timings (rows x 2: start,
/// latency).
pub fn measure_refresh_single(addr: *const u8, histogram: &mut Histogram) {
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

/// Records a window of whole-pair timings (rows x 2: start, latency of both
/// loads together).
pub fn measure_refresh_paired_coarse(
    first: *const u8,
    second: *const u8,
    histogram: &mut Histogram,
) {
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

/// Records a window of per-load timings (rows x 3: start, first latency,
/// second latency), distinguishing which of the two addresses was hit by the
/// refresh.
pub fn measure_refresh_paired_fine(
    first: *const u8,
    second: *const u8,
    histogram: &mut Histogram,
) {
    for i in 0..histogram.rows() {
        flush(first);
        flush(second);
        mfence();
        let t0 = timestamp();
        load(first);
        lfence();
        let t1 = timestamp();
        load(second);
        lfence();
        let t2 = timestamp();
        histogram.set(i, 0, t0);
        histogram.set(i, 1, t1 - t0);
        histogram.set(i, 2, t2 - t1);
    }
}

/// Start times (relative to the window's first sample) of samples whose
/// latency exceeds `threshold`.
///
/// For 2-column windows the latency is column 1; for 3-column (fine)
/// windows the second load's latency is tested and its start is the sample
/// start plus the first load's latency.
pub fn filter_refresh_timing(histogram: &Histogram, threshold: u64) -> Vec<u64> {
    let mut refreshes = Vec::new();
    match histogram.cols() {
        2 => {
            for i in 0..histogram.rows() {
                if histogram.get(i, 1) > threshold {
                    refreshes.push(histogram.get(i, 0) - histogram.get(0, 0));
                }
            }
        }
        3 => {
            for i in 0..histogram.rows() {
                if histogram.get(i, 2) > threshold {
                    refreshes.push(histogram.get(i, 0) - histogram.get(0, 0) + histogram.get(i, 1));
                }
            }
        }
        cols => error!("unsupported refresh histogram with {cols} columns"),
    }
    refreshes
}

/// Start-to-start deltas between detected refreshes; empty when fewer than
/// two spikes were seen.
pub fn compute_refresh_intervals(refreshes: &[u64]) -> Vec<u64> {
    if refreshes.len() < 2 {
        return Vec::new();
    }
    refreshes.windows(2).map(|w| w[1] - w[0]).collect()
}

fn interval_stats(histogram: &Histogram, threshold: u64) -> Stats {
    let refreshes = filter_refresh_timing(histogram, threshold);
    let intervals = compute_refresh_intervals(&refreshes);
    Stats::from_values(&intervals)
}

/// Median refresh interval observed on single accesses to `addr`.
pub fn median_refresh_interval_single(addr: *const u8, threshold: u64) -> u64 {
    stat_refresh_interval_single(addr, threshold).med
}

/// Average refresh interval observed on single accesses to `addr`.
pub fn average_refresh_interval_single(addr: *const u8, threshold: u64) -> u64 {
    stat_refresh_interval_single(addr, threshold).avg
}

/// Refresh-interval statistics from a single-access window on `addr`.
pub fn stat_refresh_interval_single(addr: *const u8, threshold: u64) -> Stats {
    let mut histogram = Histogram::new(REFRESH_ROUNDS, 2);
    measure_refresh_single(addr, &mut histogram);
    interval_stats(&histogram, threshold)
}

/// Median refresh interval from a coarse paired window.
pub fn median_refresh_interval_paired_coarse(
    first: *const u8,
    second: *const u8,
    threshold: u64,
) -> u64 {
    stat_refresh_interval_paired_coarse(first, second, threshold).med
}

/// Average refresh interval from a coarse paired window.
pub fn average_refresh_interval_paired_coarse(
    first: *const u8,
    second: *const u8,
    threshold: u64,
) -> u64 {
    stat_refresh_interval_paired_coarse(first, second, threshold).avg
}

/// Refresh-interval statistics from a coarse paired window.
pub fn stat_refresh_interval_paired_coarse(
    first: *const u8,
    second: *const u8,
    threshold: u64,
) -> Stats {
    let mut histogram = Histogram::new(REFRESH_ROUNDS, 2);
    measure_refresh_paired_coarse(first, second, &mut histogram);
    interval_stats(&histogram, threshold)
}

/// Median refresh interval from a fine paired window.
pub fn median_refresh_interval_paired_fine(
    first: *const u8,
    second: *const u8,
    threshold: u64,
) -> u64 {
    stat_refresh_interval_paired_fine(first, second, threshold).med
}

/// Average refresh interval from a fine paired window.
pub fn average_refresh_interval_paired_fine(
    first: *const u8,
    second: *const u8,
    threshold: u64,
) -> u64 {
    stat_refresh_interval_paired_fine(first, second, threshold).avg
}

/// Refresh-interval statistics from a fine paired window.
pub fn stat_refresh_interval_paired_fine(
    first: *const u8,
    second: *const u8,
    threshold: u64,
) -> Stats {
    let mut histogram = Histogram::new(REFRESH_ROUNDS, 3);
    measure_refresh_paired_fine(first, second, &mut histogram);
    interval_stats(&histogram, threshold)
}

/// Paired-access refresh-interval oracle. The DDR generation decides which
/// measurement carries the signal, so the implementation is picked once at
/// construction.
pub trait RefreshOracle {
    /// Average refresh interval between the two addresses, using `threshold`
    /// to separate refresh-delayed samples.
    fn average_interval(&self, first: *const u8, second: *const u8, threshold: u64) -> u64;
}

/// Per-load refresh oracle for DDR4.
#[derive(Debug, Default, Clone, Copy)]
pub struct FineRefreshOracle;

impl RefreshOracle for FineRefreshOracle {
    fn average_interval(&self, first: *const u8, second: *const u8, threshold: u64) -> u64 {
        average_refresh_interval_paired_fine(first, second, threshold)
    }
}

/// Whole-pair refresh oracle for DDR5.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoarseRefreshOracle;

impl RefreshOracle for CoarseRefreshOracle {
    fn average_interval(&self, first: *const u8, second: *const u8, threshold: u64) -> u64 {
        average_refresh_interval_paired_coarse(first, second, threshold)
    }
}

/// The refresh oracle appropriate for `ddr_type`.
pub fn refresh_oracle_for(ddr_type: DdrType) -> Box<dyn RefreshOracle> {
    match ddr_type {
        DdrType::Ddr4 => Box::new(FineRefreshOracle),
        DdrType::Ddr5 => Box::new(CoarseRefreshOracle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_2col(latencies: &[u64]) -> Histogram {
        let mut histogram = Histogram::new(latencies.len(), 2);
        for (i, &lat) in latencies.iter().enumerate() {
            // 100 cycles between sample starts
            histogram.set(i, 0, 10_000 + 100 * i as u64);
            histogram.set(i, 1, lat);
        }
        histogram
    }

    #[test]
    fn test_filter_refresh_timing_coarse() {
        let histogram = window_2col(&[300, 300, 900, 300, 300, 300, 950, 300]);
        assert_eq!(filter_refresh_timing(&histogram, 500), vec![200, 600]);
    }

    #[test]
    fn test_filter_refresh_timing_fine_uses_second_load() {
        let mut histogram = Histogram::new(4, 3);
        for i in 0..4 {
            histogram.set(i, 0, 5_000 + 100 * i as u64);
            histogram.set(i, 1, 40);
            histogram.set(i, 2, if i == 2 { 900 } else { 300 });
        }
        // spike start = relative sample start + first load latency
        assert_eq!(filter_refresh_timing(&histogram, 500), vec![240]);
    }

    #[test]
    fn test_compute_refresh_intervals() {
        assert_eq!(compute_refresh_intervals(&[100, 350, 600]), vec![250, 250]);
        assert!(compute_refresh_intervals(&[100]).is_empty());
        assert!(compute_refresh_intervals(&[]).is_empty());
    }

    #[test]
    fn test_interval_stats_on_synthetic_window() {
        // spikes every 4 samples, 400 cycles apart
        let mut latencies = vec![300u64; 16];
        for i in (0..16).step_by(4) {
            latencies[i] = 800;
        }
        let stats = interval_stats(&window_2col(&latencies), 500);
        assert_eq!(stats.avg, 400);
        assert_eq!(stats.med, 400);
    }
}
