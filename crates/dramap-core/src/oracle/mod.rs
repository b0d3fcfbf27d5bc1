//! Side-channel measurement oracles.
//!
//! Every oracle follows the same measurement discipline: flush the
//! participating lines, full fence, read the timestamp, perform the
//! accesses, load fence, read the timestamp again. Nothing is logged or
//! allocated inside a timed region.

mod conflicts;
mod consecutive;
mod refreshes;

pub use self::conflicts::{
    average_paired_access, average_single_access, measure_paired_access, measure_single_access,
    median_paired_access, median_single_access, stat_paired_access, stat_single_access,
    ConflictTimer, RdtscpTimer,
};
pub use self::consecutive::{
    average_read_read, measure_read_read, median_read_read, stat_read_read,
};
pub use self::refreshes::{
    average_refresh_interval_paired_coarse, average_refresh_interval_paired_fine,
    average_refresh_interval_single, compute_refresh_intervals, filter_refresh_timing,
    measure_refresh_paired_coarse, measure_refresh_paired_fine, measure_refresh_single,
    median_refresh_interval_paired_coarse, median_refresh_interval_paired_fine,
    median_refresh_interval_single, refresh_oracle_for, stat_refresh_interval_paired_coarse,
    stat_refresh_interval_paired_fine, stat_refresh_interval_single, CoarseRefreshOracle,
    FineRefreshOracle, RefreshOracle,
};
