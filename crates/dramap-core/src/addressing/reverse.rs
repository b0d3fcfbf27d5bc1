//! Same-bank-different-row discovery and function derivation.
//!
//! Addresses are clustered by pairing each fresh sample against the
//! canonical element of every existing cluster: a latency inside the SBDR
//! band means both live in the same bank. Once enough clusters are
//! populated, every XOR mask that is constant within each cluster is a
//! candidate bank function; Gaussian elimination reduces the candidates to
//! an independent generating set.

use std::collections::HashSet;

use log::{info, warn};

use crate::memory::{AddrTuple, PoolError};
use crate::oracle::{ConflictTimer, RdtscpTimer};
use crate::sink::OpSink;
use crate::util::{
    next_bit_permutation, reduce_functions, xor_reduce, CACHELINE_OFFSET, DRAMA_MINIMUM_SET_SIZE,
    FUNCTION_MAX_NUM_BITS, FUNCTION_MIN_NUM_BITS, SBDR_FILTER_SCORE, SBDR_LOWER_BOUND,
    SBDR_MAX_SAMPLES, SBDR_UPPER_BOUND,
};

use super::Addressing;

/// Clusters of tuples believed to share a bank. The first element of each
/// cluster is its canonical representative.
pub(crate) type SbdrSets = Vec<Vec<AddrTuple>>;

fn enough_sets(sets: &SbdrSets, target_sets: usize, min_set_size: usize) -> bool {
    sets.iter().filter(|s| s.len() >= min_set_size).count() >= target_sets
}

/// Samples addresses until `target_sets` clusters hold `min_set_size`
/// members each, then discards the undersized remainder.
///
/// The loop is bounded by `max_samples`; on exhaustion the clusters built so
/// far are returned and the caller will notice the shortfall when deriving
/// functions.
///
/// # Errors
///
/// Only sampler faults (pagemap) abort the collection.
pub(crate) fn collect_same_bank_sets(
    sampler: &mut dyn FnMut() -> Result<AddrTuple, PoolError>,
    timer: &mut dyn ConflictTimer,
    target_sets: usize,
    min_set_size: usize,
    max_samples: usize,
    pci_offset: u64,
    sink: &mut OpSink,
) -> Result<SbdrSets, PoolError> {
    let mut sets: SbdrSets = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();
    let mut samples = 0usize;

    while !enough_sets(&sets, target_sets, min_set_size) {
        if samples >= max_samples {
            warn!(
                "same-bank collection stalled after {samples} samples \
                 ({} of {target_sets} clusters populated); check the SBDR latency band and retry",
                sets.iter().filter(|s| s.len() >= min_set_size).count()
            );
            break;
        }
        samples += 1;
        let candidate = sampler()?;
        if !seen.insert(candidate.vaddr as usize) {
            continue;
        }

        let mut joined = false;
        for (idx, set) in sets.iter_mut().enumerate() {
            let canonical = set[0];
            let latency = timer.paired_latency(&canonical, &candidate);
            if latency > SBDR_LOWER_BOUND && latency < SBDR_UPPER_BOUND {
                sink.line(format_args!(
                    "insert address 0x{:x} into set {} with latency {} cycles",
                    candidate.paddr - pci_offset,
                    idx,
                    latency
                ));
                set.push(candidate);
                joined = true;
                break;
            }
        }
        if !joined {
            sets.push(vec![candidate]);
        }
    }

    sets.retain(|s| s.len() >= min_set_size);
    Ok(sets)
}

/// Drops cluster members that are fast against too many of their peers.
///
/// A member pairing below the SBDR band with more than
/// [`SBDR_FILTER_SCORE`] peers was most likely mis-clustered through a noisy
/// measurement.
pub(crate) fn filter_same_bank_sets(
    sets: &mut SbdrSets,
    timer: &mut dyn ConflictTimer,
    pci_offset: u64,
    sink: &mut OpSink,
) {
    for (idx, set) in sets.iter_mut().enumerate() {
        let mut keep = vec![true; set.len()];
        for i in 0..set.len() {
            let mut score = 0u64;
            for j in 0..set.len() {
                if set[i].vaddr == set[j].vaddr {
                    continue;
                }
                if timer.paired_latency(&set[i], &set[j]) < SBDR_LOWER_BOUND {
                    score += 1;
                }
            }
            if score > SBDR_FILTER_SCORE {
                sink.line(format_args!(
                    "delete address 0x{:x} from set {} (score {} / {})",
                    set[i].paddr - pci_offset,
                    idx,
                    score,
                    set.len()
                ));
                keep[i] = false;
            }
        }
        let mut it = keep.iter().copied();
        set.retain(|_| it.next().unwrap_or(true));
    }
}

/// Subtracts the PCI offset from every clustered physical address so the
/// mask arithmetic below operates in a normalized space.
pub(crate) fn slide_offsets(sets: &mut SbdrSets, offset: u64) {
    for set in sets.iter_mut() {
        for tuple in set.iter_mut() {
            tuple.paddr -= offset;
        }
    }
}

fn constant_within_every_set(mask: u64, sets: &SbdrSets) -> bool {
    sets.iter().all(|set| {
        let Some(first) = set.first() else {
            return true;
        };
        let value = xor_reduce(mask, first.paddr);
        set.iter().all(|tuple| xor_reduce(mask, tuple.paddr) == value)
    })
}

/// Brute-forces every XOR mask with [`FUNCTION_MIN_NUM_BITS`] to
/// [`FUNCTION_MAX_NUM_BITS`] bits inside `[CACHELINE_OFFSET, max_bits)`,
/// keeps the masks that are constant within every cluster, and reduces them
/// to an independent generating set.
pub(crate) fn derive_functions(sets: &SbdrSets, max_bits: u64, sink: &mut OpSink) -> Vec<u64> {
    let mut functions = Vec::new();
    for bits in FUNCTION_MIN_NUM_BITS..=FUNCTION_MAX_NUM_BITS {
        if bits as u64 > max_bits - CACHELINE_OFFSET {
            break;
        }
        let mut mask: u64 = ((1u64 << bits) - 1) << CACHELINE_OFFSET;
        let last: u64 = ((1u64 << bits) - 1) << (max_bits - bits as u64);
        while mask != last {
            if mask & ((1 << CACHELINE_OFFSET) - 1) != 0 {
                mask = next_bit_permutation(mask);
                continue;
            }
            if constant_within_every_set(mask, sets) {
                sink.line(format_args!("insert candidate function 0x{mask:x}"));
                functions.push(mask);
            }
            mask = next_bit_permutation(mask);
        }
    }
    reduce_functions(&functions)
}

impl Addressing {
    /// Recovers the bank-indexing functions from scratch: cluster sampled
    /// addresses by conflict latency, filter outliers, normalize the PCI
    /// offset, and brute-force the constant masks.
    ///
    /// Returns `false` (after logging retry advice) when the number of
    /// derived functions does not match the configured geometry.
    ///
    /// # Errors
    ///
    /// Only environment faults (pagemap reads) escape; measurement noise is
    /// handled internally.
    pub fn reverse_addressing_functions(&mut self) -> Result<bool, super::EnvironmentError> {
        let mut sink = self.sinks.open("reverse.addressing");
        let expected = self.memory_config.num_functions();
        // Half of the banks is enough for a stable derivation; the other
        // half rarely fills up in reasonable time.
        let target_sets = (self.memory_config.num_banks() / 2) as usize;

        sink.line(format_args!("[+] collect same-bank different-row pairs"));
        let mut timer = RdtscpTimer;
        let pool = &mut self.pool;
        let mut sampler = || pool.sample();
        let pci_offset = self.pci_offset;
        let mut sets = collect_same_bank_sets(
            &mut sampler,
            &mut timer,
            target_sets,
            DRAMA_MINIMUM_SET_SIZE,
            SBDR_MAX_SAMPLES,
            pci_offset,
            &mut sink,
        )?;

        sink.line(format_args!("[+] filter same-bank different-row pairs"));
        filter_same_bank_sets(&mut sets, &mut timer, pci_offset, &mut sink);

        if self.pci_offset > 0 {
            slide_offsets(&mut sets, self.pci_offset);
        }

        sink.line(format_args!("[+] derive functions from sets"));
        let functions = derive_functions(&sets, self.max_bits, &mut sink);

        if self.addressing_config.debug {
            let mut raw = self.sinks.open_csv("drama.raw");
            for set in &sets {
                let row = set
                    .iter()
                    .map(|t| format!("0x{:x}", t.paddr))
                    .collect::<Vec<_>>()
                    .join(",");
                raw.line(format_args!("{row}"));
            }
        }
        self.sbdr_sets = sets;

        let found = functions.len() as u64;
        self.addressing_functions = functions;
        if found != expected {
            warn!(
                "deriving DRAM addressing functions failed: found {found}, expected {expected}; \
                 please retry"
            );
            return Ok(false);
        }
        info!("found {found} addressing functions:");
        for function in &self.addressing_functions {
            info!("  0x{function:x}");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkRegistry;
    use crate::util::parity;

    const BANK_FUNCTION: u64 = 0x2040; // bits 6 and 13
    const MAX_BITS: u64 = 16;

    fn tuple(paddr: u64) -> AddrTuple {
        // synthetic tuples never get dereferenced; the vaddr only needs to
        // be distinct per paddr
        AddrTuple {
            vaddr: (0x7000_0000_0000 + paddr) as *mut u8,
            paddr,
        }
    }

    fn silent_sink() -> OpSink {
        SinkRegistry::new("test", false, false).open("unused")
    }

    /// 24 addresses spanning every bit in [6, MAX_BITS) on both sides of
    /// the bank function, so every foreign mask disagrees somewhere within a
    /// cluster.
    fn synthetic_addresses() -> Vec<u64> {
        let mut addrs = vec![0u64, BANK_FUNCTION];
        for bit in CACHELINE_OFFSET..MAX_BITS {
            let single = 1u64 << bit;
            if single & BANK_FUNCTION == 0 {
                addrs.push(single); // parity 0 cluster
                addrs.push(single | (1 << 6)); // parity 1 cluster
            }
        }
        addrs.push(1 << 6);
        addrs.push(1 << 13);
        for bit in [7u64, 8] {
            addrs.push(BANK_FUNCTION | (1 << bit));
            addrs.push((1 << 13) | (1 << bit));
        }
        addrs
    }

    fn synthetic_timer() -> impl FnMut(&AddrTuple, &AddrTuple) -> u64 {
        |a: &AddrTuple, b: &AddrTuple| {
            if parity(a.paddr & BANK_FUNCTION) == parity(b.paddr & BANK_FUNCTION) {
                SBDR_LOWER_BOUND + 100 // conflict band: same bank, different row
            } else {
                300 // different bank
            }
        }
    }

    #[test]
    fn test_collection_splits_by_bank_parity() {
        let addrs = synthetic_addresses();
        assert_eq!(addrs.len(), 24);
        let mut next = 0usize;
        let mut sampler = || {
            let t = tuple(addrs[next % addrs.len()]);
            next += 1;
            Ok(t)
        };
        let mut timer = synthetic_timer();
        let mut sink = silent_sink();
        let sets =
            collect_same_bank_sets(&mut sampler, &mut timer, 2, 12, 1_000, 0, &mut sink).unwrap();

        assert_eq!(sets.len(), 2);
        for set in &sets {
            assert_eq!(set.len(), 12);
            let value = parity(set[0].paddr & BANK_FUNCTION);
            assert!(set
                .iter()
                .all(|t| parity(t.paddr & BANK_FUNCTION) == value));
        }
    }

    #[test]
    fn test_collection_discards_undersized_sets() {
        // a lone outlier address never matching anything forms a singleton
        let addrs = vec![0u64, 0x40, 0x80, 0x100, 0x1000];
        let mut next = 0usize;
        let mut sampler = || {
            let t = tuple(addrs[next % addrs.len()]);
            next += 1;
            Ok(t)
        };
        // 0x1000 conflicts with nothing
        let mut timer = |a: &AddrTuple, b: &AddrTuple| {
            if a.paddr == 0x1000 || b.paddr == 0x1000 {
                300
            } else {
                SBDR_LOWER_BOUND + 100
            }
        };
        let mut sink = silent_sink();
        let sets =
            collect_same_bank_sets(&mut sampler, &mut timer, 1, 4, 1_000, 0, &mut sink).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].len(), 4);
    }

    #[test]
    fn test_filter_drops_fast_outliers() {
        let mut sets = vec![vec![
            tuple(0x0),
            tuple(0x40),
            tuple(0x80),
            tuple(0x100),
            tuple(0x200),
            tuple(0xbad_000),
        ]];
        // the outlier is fast against every peer
        let mut timer = |a: &AddrTuple, b: &AddrTuple| {
            if a.paddr == 0xbad_000 || b.paddr == 0xbad_000 {
                300
            } else {
                SBDR_LOWER_BOUND + 100
            }
        };
        let mut sink = silent_sink();
        filter_same_bank_sets(&mut sets, &mut timer, 0, &mut sink);
        assert_eq!(sets[0].len(), 5);
        assert!(sets[0].iter().all(|t| t.paddr != 0xbad_000));
    }

    #[test]
    fn test_slide_offsets() {
        let mut sets = vec![vec![tuple(0xc000_0040), tuple(0xc000_2080)]];
        slide_offsets(&mut sets, 0xc000_0000);
        assert_eq!(sets[0][0].paddr, 0x40);
        assert_eq!(sets[0][1].paddr, 0x2080);
    }

    #[test]
    fn test_derive_recovers_bank_function() {
        let mut parity0 = Vec::new();
        let mut parity1 = Vec::new();
        for addr in synthetic_addresses() {
            if parity(addr & BANK_FUNCTION) == 0 {
                parity0.push(tuple(addr));
            } else {
                parity1.push(tuple(addr));
            }
        }
        let sets = vec![parity0, parity1];
        let mut sink = silent_sink();
        let functions = derive_functions(&sets, MAX_BITS, &mut sink);
        assert_eq!(functions, vec![BANK_FUNCTION]);
    }

    #[test]
    fn test_end_to_end_synthetic_discovery() {
        let addrs = synthetic_addresses();
        let mut next = 0usize;
        let mut sampler = || {
            let t = tuple(addrs[next % addrs.len()]);
            next += 1;
            Ok(t)
        };
        let mut timer = synthetic_timer();
        let mut sink = silent_sink();
        let mut sets =
            collect_same_bank_sets(&mut sampler, &mut timer, 2, 12, 1_000, 0, &mut sink).unwrap();
        filter_same_bank_sets(&mut sets, &mut timer, 0, &mut sink);
        let functions = derive_functions(&sets, MAX_BITS, &mut sink);
        assert_eq!(functions, vec![BANK_FUNCTION]);
        // derived functions are constant within every cluster
        for set in &sets {
            for function in &functions {
                let value = xor_reduce(*function, set[0].paddr);
                assert!(set
                    .iter()
                    .all(|t| xor_reduce(*function, t.paddr) == value));
            }
        }
    }
}
