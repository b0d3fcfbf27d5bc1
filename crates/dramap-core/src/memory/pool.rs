//! Hugepage-backed memory pool for address sampling.

use std::fs::File;
use std::io::Read;
use std::ptr::null_mut;

use lazy_static::lazy_static;
use libc::{MAP_ANONYMOUS, MAP_HUGETLB, MAP_POPULATE, MAP_PRIVATE};
use log::{debug, warn};
use rand::Rng as _;
use thiserror::Error;

use super::{AddrTuple, PageMapResolver, TranslateError};
use crate::config::PoolConfig;
use crate::util::Rng;

// https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt
const MEMINFO_PATH: &str = "/proc/meminfo";
const HUGEPAGESIZE_TOKEN: &str = "Hugepagesize:";

lazy_static! {
    static ref SYSTEM_HUGEPAGE_SIZE: i64 = {
        let buf = File::open(MEMINFO_PATH).map_or("".to_owned(), |mut f| {
            let mut s = String::new();
            let _ = f.read_to_string(&mut s);
            s
        });
        parse_hugepage_size(&buf)
    };
}

fn parse_hugepage_size(s: &str) -> i64 {
    for line in s.lines() {
        if let Some(rest) = line.strip_prefix(HUGEPAGESIZE_TOKEN) {
            let mut parts = rest.split_whitespace();
            let mut hugepage_size = parts.next().unwrap_or("0").parse::<i64>().unwrap_or(-1);
            hugepage_size *= parts.next().map_or(1, |unit| match unit {
                "kB" => 1024,
                _ => 1,
            });
            return hugepage_size;
        }
    }
    -1
}

/// Errors that leave the pool unusable. All of them are environment faults
/// (missing hugepages, missing privileges); there is no recovery beyond
/// fixing the machine setup.
#[derive(Debug, Error)]
pub enum PoolError {
    /// mmap of a pool page failed.
    #[error("mmap of pool page failed (are enough 1 GiB hugepages reserved?): {0}")]
    Mmap(#[source] std::io::Error),
    /// Address translation failed.
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// Pool of mapped pages that all measured addresses are drawn from.
///
/// The pool exclusively owns its mappings; [`AddrTuple`]s carry non-owning
/// pointers into them and must not outlive the pool. Pages are mapped
/// `MAP_PRIVATE|ANONYMOUS|POPULATE` and, for the usual 1 GiB configuration,
/// `MAP_HUGETLB|MAP_HUGE_1GB`, which makes each page physically contiguous.
pub struct MemoryPool {
    pages: Vec<*mut u8>,
    config: PoolConfig,
    rng: Rng,
    resolver: PageMapResolver,
}

impl MemoryPool {
    /// Maps `config.num_pages` pages and opens the pagemap.
    ///
    /// # Errors
    ///
    /// Fails when any mmap fails or the pagemap cannot be opened. Already
    /// mapped pages are released before returning.
    pub fn new(config: PoolConfig, seed: u64) -> Result<Self, PoolError> {
        if config.huge && *SYSTEM_HUGEPAGE_SIZE != config.page_size as i64 {
            warn!(
                "system hugepage size is {} bytes, pool pages are {} bytes; \
                 reserve 1 GiB hugepages via the kernel command line",
                *SYSTEM_HUGEPAGE_SIZE, config.page_size
            );
        }
        let mut flags = MAP_PRIVATE | MAP_ANONYMOUS | MAP_POPULATE;
        if config.huge {
            flags |= MAP_HUGETLB | libc::MAP_HUGE_1GB;
        }
        let mut pages = Vec::with_capacity(config.num_pages as usize);
        for _ in 0..config.num_pages {
            let p = unsafe {
                libc::mmap(
                    null_mut(),
                    config.page_size as usize,
                    libc::PROT_READ | libc::PROT_WRITE,
                    flags,
                    -1,
                    0,
                )
            };
            if p == libc::MAP_FAILED {
                let err = std::io::Error::last_os_error();
                for page in &pages {
                    unsafe { libc::munmap(*page as *mut libc::c_void, config.page_size as usize) };
                }
                return Err(PoolError::Mmap(err));
            }
            pages.push(p as *mut u8);
        }
        debug!("mapped {} pool pages of {} bytes", pages.len(), config.page_size);
        Ok(MemoryPool {
            pages,
            config,
            rng: Rng::from_seed(seed),
            resolver: PageMapResolver::new()?,
        })
    }

    /// The pool's configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of mapped pages.
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Base pointer of page `idx`.
    pub fn page(&self, idx: usize) -> *mut u8 {
        self.pages[idx]
    }

    /// Draws a uniform page and a uniform intra-page offset floored to the
    /// sampling granularity, and resolves the physical address.
    ///
    /// # Errors
    ///
    /// Fails only on pagemap faults; see [`PoolError`].
    pub fn sample(&mut self) -> Result<AddrTuple, PoolError> {
        let page = self.rng.random_range(0..self.pages.len());
        let offset = self.rng.random_range(0..self.config.page_size);
        let distance = (offset / self.config.granularity) * self.config.granularity;
        let vaddr = unsafe { self.pages[page].add(distance as usize) };
        let paddr = self.resolver.virt_to_phys(vaddr as u64)?;
        Ok(AddrTuple { vaddr, paddr })
    }

    /// Two samples with distinct virtual addresses.
    ///
    /// # Errors
    ///
    /// Fails only on pagemap faults; see [`PoolError`].
    pub fn sample_distinct_pair(&mut self) -> Result<(AddrTuple, AddrTuple), PoolError> {
        let first = self.sample()?;
        loop {
            let second = self.sample()?;
            if second.vaddr != first.vaddr {
                return Ok((first, second));
            }
        }
    }

    /// Translates an arbitrary virtual address through the pagemap.
    ///
    /// # Errors
    ///
    /// Fails only on pagemap faults; see [`PoolError`].
    pub fn virt_to_phys(&mut self, vaddr: u64) -> Result<u64, PoolError> {
        Ok(self.resolver.virt_to_phys(vaddr)?)
    }

    /// Maps a physical address back into the pool.
    ///
    /// Each page is physically contiguous, so one translation of its base
    /// yields its physical range. Returns `Ok(None)` when `paddr` is not
    /// backed by the pool.
    ///
    /// # Errors
    ///
    /// Fails only on pagemap faults; see [`PoolError`].
    pub fn phys_to_virt(&mut self, paddr: u64) -> Result<Option<*mut u8>, PoolError> {
        for i in 0..self.pages.len() {
            let base = self.pages[i];
            let start = self.resolver.virt_to_phys(base as u64)?;
            let end = start + self.config.page_size - self.config.granularity;
            if start <= paddr && paddr <= end {
                return Ok(Some(unsafe { base.add((paddr - start) as usize) }));
            }
        }
        Ok(None)
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        for page in &self.pages {
            unsafe { libc::munmap(*page as *mut libc::c_void, self.config.page_size as usize) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hugepage_size() {
        assert_eq!(parse_hugepage_size("Hugepagesize:1024"), 1024);
        assert_eq!(parse_hugepage_size("Hugepagesize: 2 kB"), 2048);
        assert_eq!(parse_hugepage_size("Hugepagesize: 1048576 kB"), 1 << 30);
        assert_eq!(parse_hugepage_size("MemTotal: 16 GB"), -1);
    }
}
