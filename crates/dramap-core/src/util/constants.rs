/// Page shift value (12 bits) for the 4 KiB pages pagemap reports on.
pub const PAGE_SHIFT: u64 = 12;
/// Standard page size (4096 bytes).
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
/// Mask for extracting the intra-page offset.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Cache line size as a power of two (64-byte lines).
pub const CACHELINE_OFFSET: u64 = 6;
/// Cache line size in bytes.
pub const CACHELINE_SIZE: u64 = 1 << CACHELINE_OFFSET;

/// Rounds per conflict-latency measurement.
pub const CONFLICT_ROUNDS: usize = 1_000;
/// Samples per refresh-watch window. Long enough to straddle dozens of
/// refresh commands at nominal tREFI.
pub const REFRESH_ROUNDS: usize = 30_000;
/// Rounds per consecutive read-read measurement.
pub const CONSECUTIVE_ROUNDS: usize = 1_000;
/// Address samples taken by the statistics operations.
pub const STAT_SAMPLES: usize = 100;

/// Lower edge of the row-buffer-conflict latency band, in cycles. A paired
/// access below this hit the row buffer or a different bank.
pub const SBDR_LOWER_BOUND: u64 = 850;
/// Upper edge of the row-buffer-conflict latency band, in cycles. Values
/// above are treated as interference (preemption, refresh) rather than a
/// conflict.
pub const SBDR_UPPER_BOUND: u64 = 1_200;

/// Minimum members a same-bank cluster needs to survive collection.
pub const DRAMA_MINIMUM_SET_SIZE: usize = 10;
/// Number of below-band peers an element may have before it is dropped from
/// its cluster as an outlier.
pub const SBDR_FILTER_SCORE: u64 = 3;
/// Cap on sampled addresses while collecting same-bank clusters.
pub const SBDR_MAX_SAMPLES: usize = 200_000;

/// Votes a row/column classification needs to win.
pub const TRIAL_SUCCESS_SCORE: u64 = 7;
/// Effective (pool-resident) trials collected per voted mask.
pub const NUM_EFFECTIVE_TRIALS: u64 = 10;
/// Overall attempt cap per voted mask, counting samples whose flipped
/// address fell outside the pool.
pub const MAX_NUM_TRIALS: u64 = 100;

/// Refresh intervals below this (in cycles) count as reduced (tREFI/2).
pub const REGULAR_REFRESH_INTERVAL_THRESHOLD: u64 = 18_000;
/// Latency threshold separating refresh-delayed samples from ordinary DRAM
/// accesses.
pub const REFRESH_CYCLE_LOWER_BOUND: u64 = 500;
/// Intervals at or below this are degenerate (back-to-back spikes), not
/// refresh periods; Intel parts reject them when classifying functions.
pub const REFRESH_INTERVAL_FLOOR: u64 = 1_000;

/// Reads per stream in a consecutive read-read measurement.
pub const CONSECUTIVE_LENGTH: usize = 8;

/// Smallest popcount tried when brute-forcing function masks.
pub const FUNCTION_MIN_NUM_BITS: u32 = 2;
/// Largest popcount tried when brute-forcing function masks.
pub const FUNCTION_MAX_NUM_BITS: u32 = 7;

/// Retries of the constrained solver against one base address before the
/// base is resampled.
pub const CONSTRAINT_RETRIES: u64 = 100;
