//! Injectivity validation of the derived mapping.
//!
//! Rank-nullity over each disjoint bit-set: the mapping is injective iff
//! every physical-address bit is spent exactly once, i.e. the number of
//! functions touching a set plus the row and column bits inside it equals
//! the set's popcount.

use log::{error, info};

use crate::sink::OpSink;
use crate::util::CACHELINE_OFFSET;

use super::identify::merge_functions_to_disjoint_sets;
use super::Addressing;

/// Checks `contributors == popcount(set)` for every disjoint set and
/// returns the sets where the counts mismatch.
pub(crate) fn check_injectivity(
    disjoint_sets: &[u64],
    functions: &[u64],
    row_bits: u64,
    column_bits: u64,
) -> (bool, Vec<u64>) {
    let mut incomplete_sets = Vec::new();
    for &set in disjoint_sets {
        let num_columns = set.count_ones() as u64;
        let mut num_contributors = functions.iter().filter(|&&f| f & set != 0).count() as u64;
        num_contributors += (row_bits & set).count_ones() as u64;
        num_contributors += (column_bits & set).count_ones() as u64;
        if num_contributors != num_columns {
            incomplete_sets.push(set);
        }
    }
    (incomplete_sets.is_empty(), incomplete_sets)
}

impl Addressing {
    /// Greedily inserts missing bits into incomplete sets: column bits
    /// scanning low to high, row bits high to low, until the configured
    /// counts are reached or no candidate is left.
    fn resolve_address_mapping(&mut self, incomplete_sets: &[u64], sink: &mut OpSink) {
        let mut incomplete_sets = incomplete_sets.to_vec();
        incomplete_sets.sort_unstable();

        let row_bits_to_find = self.memory_config.num_row_bits();
        let column_bits_to_find = self.memory_config.num_column_bits();

        while column_bits_to_find != self.column_bits.count_ones() as u64 {
            let candidate = (CACHELINE_OFFSET..self.max_bits)
                .map(|i| 1u64 << i)
                .filter(|bit| bit & self.column_bits == 0)
                .find(|bit| incomplete_sets.iter().any(|set| bit & set != 0));
            match candidate {
                Some(bit) => {
                    self.column_bits |= bit;
                    sink.line(format_args!(
                        "insert bit {} to column_bits",
                        bit.trailing_zeros()
                    ));
                }
                None => {
                    error!("cannot find an appropriate bit for columns");
                    break;
                }
            }
        }

        while row_bits_to_find != self.row_bits.count_ones() as u64 {
            let candidate = (CACHELINE_OFFSET..self.max_bits)
                .rev()
                .map(|i| 1u64 << i)
                .filter(|bit| bit & self.row_bits == 0)
                .find(|bit| incomplete_sets.iter().any(|set| bit & set != 0));
            match candidate {
                Some(bit) => {
                    self.row_bits |= bit;
                    sink.line(format_args!(
                        "insert bit {} to row_bits",
                        bit.trailing_zeros()
                    ));
                }
                None => {
                    error!("cannot find an appropriate bit for rows");
                    break;
                }
            }
        }
    }

    /// Verifies that the addressing functions together with the row and
    /// column bits form an injective mapping, repairing missing bits when
    /// they do not.
    ///
    /// Returns `false` when the mapping cannot be repaired; the caller
    /// should retry or refine the inputs.
    pub fn validate_address_mapping(&mut self) -> bool {
        let mut sink = self.sinks.open("validate.address.mapping");
        let disjoint_sets = merge_functions_to_disjoint_sets(&self.addressing_functions);

        let (mut pass, incomplete_sets) = check_injectivity(
            &disjoint_sets,
            &self.addressing_functions,
            self.row_bits,
            self.column_bits,
        );
        if !pass {
            sink.line(format_args!("[-] there are incomplete disjoint sets:"));
            for set in &incomplete_sets {
                sink.line(format_args!("  0x{set:x}"));
            }
            self.resolve_address_mapping(&incomplete_sets, &mut sink);
            let (repaired, _) = check_injectivity(
                &disjoint_sets,
                &self.addressing_functions,
                self.row_bits,
                self.column_bits,
            );
            pass = repaired;
            if pass {
                sink.line(format_args!(
                    "[+] modified DRAM address mapping is now injective"
                ));
            } else {
                sink.line(format_args!(
                    "[-] cannot resolve the input functions, row and column bits; \
                     please retry or refine them"
                ));
            }
        } else {
            sink.line(format_args!(
                "[+] addressing functions, row bits, and column bits satisfy injectivity"
            ));
        }

        if pass {
            info!("validated DRAM address mapping:");
            for function in &self.addressing_functions {
                info!("  function 0x{function:x}");
            }
            info!("  row_bits: 0x{:x}", self.row_bits);
            info!("  column_bits: 0x{:x}", self.column_bits);
        }
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_sets_pass() {
        // one function over bits 6..9, two row bits, one column bit inside
        // the set: 1 + 2 + 1 == popcount(0x3c0)
        let functions = [0x3c0u64];
        let sets = merge_functions_to_disjoint_sets(&functions);
        let (pass, incomplete) = check_injectivity(&sets, &functions, 0x300, 0x80);
        assert!(pass);
        assert!(incomplete.is_empty());
    }

    #[test]
    fn test_missing_bit_is_reported() {
        let functions = [0x3c0u64];
        let sets = merge_functions_to_disjoint_sets(&functions);
        // only one row bit inside the set: 1 + 1 + 0 != 4
        let (pass, incomplete) = check_injectivity(&sets, &functions, 0x200, 0);
        assert!(!pass);
        assert_eq!(incomplete, vec![0x3c0]);
    }

    #[test]
    fn test_external_bits_do_not_contribute() {
        let functions = [0x3c0u64];
        let sets = merge_functions_to_disjoint_sets(&functions);
        // row/column bits outside the set must not be counted
        let (pass, _) = check_injectivity(&sets, &functions, 0xc00, 0x3000);
        assert!(!pass);
    }
}
