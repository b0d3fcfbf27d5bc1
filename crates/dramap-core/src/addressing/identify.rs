//! Row/column bit identification.
//!
//! Flipping bits that no bank function covers keeps the address in the same
//! bank, so a paired access against the unflipped base either conflicts
//! (a row bit moved the access to another row) or hits the open row (a
//! column bit moved it within the row). Covered bits are tested the same
//! way, restricted to flips whose parity is zero under every involved
//! function.

use itertools::Itertools;
use log::info;

use crate::oracle::average_paired_access;
use crate::sink::OpSink;
use crate::util::{
    generate_all_combinations, reduce_functions, xor_reduce_masks, CACHELINE_OFFSET,
    MAX_NUM_TRIALS, NUM_EFFECTIVE_TRIALS, SBDR_LOWER_BOUND, SBDR_UPPER_BOUND,
    TRIAL_SUCCESS_SCORE,
};

use super::{Addressing, EnvironmentError};

/// Merges masks sharing at least one bit until all are pairwise disjoint.
pub(crate) fn merge_functions_to_disjoint_sets(functions: &[u64]) -> Vec<u64> {
    let mut merged_functions: Vec<u64> = functions.to_vec();
    loop {
        let mut changed = false;
        let mut merged = vec![false; merged_functions.len()];
        let mut current: Vec<u64> = Vec::new();
        for i in 0..merged_functions.len() {
            if merged[i] {
                continue;
            }
            let mut value = merged_functions[i];
            merged[i] = true;
            for j in 0..merged_functions.len() {
                if merged[j] {
                    continue;
                }
                if value & merged_functions[j] != 0 {
                    value |= merged_functions[j];
                    merged[j] = true;
                    changed = true;
                }
            }
            current.push(value);
        }
        merged_functions = current;
        if !changed {
            return merged_functions;
        }
    }
}

/// Physical-address bits in `[CACHELINE_OFFSET, max_bits)` covered by no
/// function.
pub(crate) fn uncovered_bit_mask(functions: &[u64], max_bits: u64) -> u64 {
    let covered = functions.iter().fold(0u64, |acc, f| acc | f);
    (((1u64 << max_bits) - 1) ^ covered) ^ ((1 << CACHELINE_OFFSET) - 1)
}

/// Flip masks within one disjoint set that keep the bank selection
/// unchanged: fewer than four bits, zero parity under every involved
/// function.
pub(crate) fn same_bank_flip_masks(set: u64, involved: &[u64]) -> Vec<u64> {
    generate_all_combinations(set)
        .into_iter()
        .filter(|&mask| mask.count_ones() < 4 && xor_reduce_masks(involved, mask) == 0)
        .collect()
}

enum BitVote {
    Row { score: u64, effective: u64 },
    Column { score: u64, effective: u64 },
    Outlier { row: u64, column: u64, trials: u64 },
    Exhausted,
}

impl Addressing {
    /// Votes one flip mask into row or column by flipping it into fresh base
    /// addresses and classifying the paired-access latency.
    fn vote_bit_mask(&mut self, mask: u64) -> Result<BitVote, EnvironmentError> {
        let mut row_score = 0u64;
        let mut column_score = 0u64;
        let mut effective = 0u64;
        let mut trials = 0u64;
        while trials < MAX_NUM_TRIALS {
            trials += 1;
            let base = self.pool.sample()?;
            let paddr = ((base.paddr - self.pci_offset) ^ mask) + self.pci_offset;
            let Some(vaddr) = self.pool.phys_to_virt(paddr)? else {
                continue;
            };
            effective += 1;
            let latency = average_paired_access(base.vaddr, vaddr);
            if latency > SBDR_LOWER_BOUND && latency < SBDR_UPPER_BOUND {
                row_score += 1;
            } else {
                column_score += 1;
            }
            if effective >= NUM_EFFECTIVE_TRIALS {
                break;
            }
        }
        if trials >= MAX_NUM_TRIALS && effective < NUM_EFFECTIVE_TRIALS {
            return Ok(BitVote::Exhausted);
        }
        if row_score > TRIAL_SUCCESS_SCORE {
            Ok(BitVote::Row {
                score: row_score,
                effective,
            })
        } else if column_score > TRIAL_SUCCESS_SCORE {
            Ok(BitVote::Column {
                score: column_score,
                effective,
            })
        } else {
            Ok(BitVote::Outlier {
                row: row_score,
                column: column_score,
                trials,
            })
        }
    }

    fn classify_masks(&mut self, masks: &[u64], sink: &mut OpSink) -> Result<(), EnvironmentError> {
        for &mask in masks {
            match self.vote_bit_mask(mask)? {
                BitVote::Row { score, effective } => {
                    sink.line(format_args!(
                        "[ inserted to row functions ] 0x{mask:x} with score {score} / {effective}"
                    ));
                    self.row_functions.push(mask);
                }
                BitVote::Column { score, effective } => {
                    sink.line(format_args!(
                        "[ inserted to column functions ] 0x{mask:x} with score {score} / {effective}"
                    ));
                    self.column_functions.push(mask);
                }
                BitVote::Outlier { row, column, trials } => {
                    sink.line(format_args!(
                        "[ outlier ] 0x{mask:x} with score ({row} + {column}) / {trials}"
                    ));
                }
                BitVote::Exhausted => {
                    sink.line(format_args!(
                        "[ failed to identify ] 0x{mask:x} exceeds the maximum attempts"
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_unused_bits(
        &mut self,
        uncovered: u64,
        sink: &mut OpSink,
    ) -> Result<(), EnvironmentError> {
        sink.line(format_args!("[+] check unused bits 0x{uncovered:x}"));
        let masks = generate_all_combinations(uncovered);
        self.classify_masks(&masks, sink)
    }

    fn check_used_bits(
        &mut self,
        disjoint_sets: &[u64],
        sink: &mut OpSink,
    ) -> Result<(), EnvironmentError> {
        sink.line(format_args!("[+] check used bits"));
        for &set in disjoint_sets {
            sink.line(format_args!("[ check ] set 0x{set:x}"));
            let involved: Vec<u64> = self
                .addressing_functions
                .iter()
                .copied()
                .filter(|f| f & set != 0)
                .collect();
            let masks = same_bank_flip_masks(set, &involved);
            self.classify_masks(&masks, sink)?;
        }
        Ok(())
    }

    /// Classifies every physical-address bit as row or column.
    ///
    /// Bits uncovered by the given functions are voted through single flips;
    /// covered bits through bank-preserving flips within each disjoint
    /// function set. The surviving row/column functions are reduced over
    /// GF(2) and collapsed to canonical single bits (MSB per row function,
    /// LSB per column function).
    ///
    /// # Errors
    ///
    /// Only environment faults (pagemap reads) escape.
    pub fn identify_bits(&mut self, functions: &[u64]) -> Result<(), EnvironmentError> {
        let mut sink = self.sinks.open("identify.bits");
        self.addressing_functions = functions.to_vec();
        self.row_functions.clear();
        self.column_functions.clear();

        let uncovered = uncovered_bit_mask(functions, self.max_bits);
        let disjoint_sets = merge_functions_to_disjoint_sets(functions);
        self.check_unused_bits(uncovered, &mut sink)?;
        self.check_used_bits(&disjoint_sets, &mut sink)?;

        self.row_functions = reduce_functions(&self.row_functions);
        self.column_functions = reduce_functions(&self.column_functions);

        // canonical row bits: the highest bit of each reduced row function
        let row_bits: Vec<u64> = self
            .row_functions
            .iter()
            .filter(|&&f| f != 0)
            .map(|&f| 1u64 << (63 - f.leading_zeros()))
            .sorted_unstable()
            .dedup()
            .collect();
        self.row_bits = row_bits.iter().fold(0, |acc, b| acc | b);
        self.row_functions = row_bits;

        // canonical column bits: the lowest bit of each reduced column function
        let column_bits: Vec<u64> = self
            .column_functions
            .iter()
            .filter(|&&f| f != 0)
            .map(|&f| 1u64 << f.trailing_zeros())
            .sorted_unstable()
            .dedup()
            .collect();
        self.column_bits = column_bits.iter().fold(0, |acc, b| acc | b);
        self.column_functions = column_bits;

        // bits left unidentified here are resolved during validation
        info!("found bits:");
        info!("  row_bits: 0x{:x}", self.row_bits);
        info!("  column_bits: 0x{:x}", self.column_bits);
        sink.line(format_args!("row_bits,0x{:x}", self.row_bits));
        sink.line(format_args!("column_bits,0x{:x}", self.column_bits));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_disjoint_inputs_unchanged() {
        let sets = merge_functions_to_disjoint_sets(&[0b1100, 0b0011]);
        assert_eq!(sets, vec![0b1100, 0b0011]);
    }

    #[test]
    fn test_merge_chained_overlaps() {
        // 0b0110 bridges the other two into one set
        let sets = merge_functions_to_disjoint_sets(&[0b1100, 0b0110, 0b0011]);
        assert_eq!(sets, vec![0b1111]);
    }

    #[test]
    fn test_merge_transitive_closure() {
        let sets = merge_functions_to_disjoint_sets(&[0x2040, 0x1080, 0x4100, 0x8000_0000]);
        // 0x1080 and 0x4100 share no bits with 0x2040 or each other...
        // 0x2040 = bits 6,13; 0x1080 = bits 7,12; 0x4100 = bits 8,14
        assert_eq!(sets, vec![0x2040, 0x1080, 0x4100, 0x8000_0000]);
        let sets = merge_functions_to_disjoint_sets(&[0x2040, 0x2080, 0x4100, 0x4200]);
        assert_eq!(sets, vec![0x20c0, 0x4300]);
    }

    #[test]
    fn test_uncovered_bit_mask() {
        // max_bits 16, functions covering bits 6, 13 and 7
        let uncovered = uncovered_bit_mask(&[0x2040, 0x80], 16);
        assert_eq!(uncovered, 0xffc0 & !0x20c0);
        // everything covered -> no candidates
        assert_eq!(uncovered_bit_mask(&[0xffc0], 16), 0);
    }

    #[test]
    fn test_same_bank_flip_masks() {
        // one function over bits 6 and 13: only the double flip keeps the
        // bank selection
        let masks = same_bank_flip_masks(0x2040, &[0x2040]);
        assert_eq!(masks, vec![0x2040]);

        // two overlapping functions over bits 6..8; flips must zero both
        let set = 0b111 << 6;
        let involved = [0b011u64 << 6, 0b110 << 6];
        let masks = same_bank_flip_masks(set, &involved);
        // the only <4-bit subset with zero parity under both functions is
        // 0b111 << 6
        assert_eq!(masks, vec![set]);
    }
}
