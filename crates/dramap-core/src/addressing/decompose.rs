//! Function decomposition into rank / bank-group / bank-address components.
//!
//! Both passes compare address pairs that agree on every addressing
//! function except the one under test, so any timing difference is
//! attributable to that single function.

use itertools::Itertools;
use log::info;

use crate::oracle::{average_read_read, refresh_oracle_for};
use crate::util::{
    CONSECUTIVE_LENGTH, MAX_NUM_TRIALS, NUM_EFFECTIVE_TRIALS, REFRESH_CYCLE_LOWER_BOUND,
    TRIAL_SUCCESS_SCORE,
};

use super::{Addressing, EnvironmentError};

impl Addressing {
    /// Classifies functions by their paired-access refresh interval.
    ///
    /// Controllers refresh some ranks/DIMMs/sub-channels at tREFI/2; a
    /// function whose flip mostly shows the reduced interval selects such a
    /// component and joins the rank-class set. What that set means per
    /// platform is a labeling question answered by [`crate::Platform`].
    ///
    /// # Errors
    ///
    /// Only environment faults (pagemap reads) escape.
    pub fn decompose_using_refreshes(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("decompose.refresh");
        let oracle = refresh_oracle_for(self.memory_config.dram.ddr_type);

        for function in self.addressing_functions.clone() {
            sink.line(format_args!(
                "[+] check refresh intervals of function 0x{function:x}"
            ));
            let other_functions: Vec<u64> = self
                .addressing_functions
                .iter()
                .copied()
                .filter(|&f| f != function)
                .collect();
            let diff_functions = [function];

            let mut normal_interval_score = 0u64;
            let mut reduced_interval_score = 0u64;
            let mut trials = 0u64;
            while trials < NUM_EFFECTIVE_TRIALS {
                trials += 1;
                let Some((first, second)) =
                    self.constrained_pair(&other_functions, &diff_functions)?
                else {
                    break;
                };
                let interval = oracle.average_interval(
                    first.vaddr,
                    second.vaddr,
                    REFRESH_CYCLE_LOWER_BOUND,
                );
                if self.platform.is_reduced_interval(interval) {
                    reduced_interval_score += 1;
                } else {
                    normal_interval_score += 1;
                }
            }
            sink.line(format_args!(
                "function 0x{function:x}, tREFI: {normal_interval_score}, tREFI/2: {reduced_interval_score}"
            ));
            if reduced_interval_score > TRIAL_SUCCESS_SCORE {
                self.rank_functions.push(function);
            }
        }

        info!(
            "functions with reduced refresh intervals ({}): {}",
            self.platform.reduced_interval_label(),
            self.rank_functions
                .iter()
                .map(|f| format!("0x{f:x}"))
                .join(",")
        );
        Ok(())
    }

    /// Classifies functions by consecutive read-read latency.
    ///
    /// Streams colliding on bank-address-adjacent banks serialize hardest,
    /// so after sorting by average latency the top functions (as many as the
    /// geometry expects, skipping rank-class ones) are bank-address
    /// functions; the remainder select bank groups or channels.
    ///
    /// # Errors
    ///
    /// Only environment faults (pagemap reads) escape.
    pub fn decompose_using_consecutive_accesses(&mut self) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("decompose.rdrd");
        let mut rdrd_latencies: Vec<(u64, u64)> = Vec::new();

        for function in self.addressing_functions.clone() {
            sink.line(format_args!(
                "[+] check consecutive accesses of function 0x{function:x}"
            ));
            let other_functions: Vec<u64> = self
                .addressing_functions
                .iter()
                .copied()
                .filter(|&f| f != function)
                .collect();
            let diff_functions = [function];

            let mut total_latency = 0u64;
            let mut trials = 0u64;
            let mut attempts = 0u64;
            while trials < NUM_EFFECTIVE_TRIALS && attempts < MAX_NUM_TRIALS {
                attempts += 1;
                let Some((first, second)) =
                    self.constrained_pair(&other_functions, &diff_functions)?
                else {
                    break;
                };
                let Some((faddrs, saddrs)) =
                    self.row_buffer_hit_streams(&first, &second, CONSECUTIVE_LENGTH)?
                else {
                    continue;
                };
                trials += 1;
                total_latency += average_read_read(&faddrs, &saddrs);
            }
            let average = total_latency / trials.max(1);
            sink.line(format_args!(
                "function 0x{function:x}, avg rdrd latency: {average}"
            ));
            rdrd_latencies.push((function, average));
        }

        rdrd_latencies.sort_by_key(|&(_, latency)| latency);

        // the highest-latency functions not already classified as rank-class
        // carry the bank address
        let wanted = self.memory_config.num_bank_address_functions() as usize;
        for &(function, _) in rdrd_latencies.iter().rev() {
            if self.bank_address_functions.len() == wanted {
                break;
            }
            if self.rank_functions.contains(&function) {
                continue;
            }
            self.bank_address_functions.push(function);
        }

        // everything else selects bank groups (or channels, platform
        // depending) by elimination
        let remaining: Vec<u64> = self
            .addressing_functions
            .iter()
            .copied()
            .filter(|f| {
                !self.rank_functions.contains(f) && !self.bank_address_functions.contains(f)
            })
            .collect();
        self.bank_group_functions = remaining;

        info!(
            "bank address functions: {}",
            self.bank_address_functions
                .iter()
                .map(|f| format!("0x{f:x}"))
                .join(",")
        );
        info!(
            "bank group / channel functions: {}",
            self.bank_group_functions
                .iter()
                .map(|f| format!("0x{f:x}"))
                .join(",")
        );
        Ok(())
    }
}
