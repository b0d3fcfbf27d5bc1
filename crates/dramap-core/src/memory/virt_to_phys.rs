//! Pagemap-backed virtual-to-physical address translation.

use pagemap2::{PageMapError, VirtualMemoryArea};
use thiserror::Error;

use crate::util::{PAGE_MASK, PAGE_SHIFT};

/// Errors from address translation through `/proc/self/pagemap`.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// The pagemap interface itself failed (open, read, parse).
    #[error(transparent)]
    PageMap(#[from] PageMapError),
    /// The page backing the address is not present in RAM, or the PFN is
    /// hidden from this process (missing CAP_SYS_ADMIN).
    #[error("no present physical page behind virtual address 0x{vaddr:x}")]
    NotPresent {
        /// Virtual address that failed to translate
        vaddr: u64,
    },
    /// Pagemap returned an unexpected number of entries for one page.
    #[error("got {count} pagemap entries for virtual address 0x{vaddr:x}, expected one")]
    AmbiguousEntry {
        /// Virtual address queried
        vaddr: u64,
        /// Entry count received
        count: usize,
    },
}

/// Virtual-to-physical resolver for the current process.
///
/// Reads `/proc/self/pagemap`, verifies the present bit of each entry, and
/// composes the physical frame number with the intra-page offset. Requires
/// root; without it the kernel reports PFN 0.
pub struct PageMapResolver {
    pagemap: pagemap2::PageMap,
}

impl PageMapResolver {
    /// Opens the pagemap of the current process.
    ///
    /// # Errors
    ///
    /// Fails when `/proc/self/pagemap` cannot be opened.
    pub fn new() -> Result<Self, TranslateError> {
        Ok(PageMapResolver {
            pagemap: pagemap2::PageMap::new(std::process::id() as u64)?,
        })
    }

    /// Translates one virtual address to its physical address.
    ///
    /// # Errors
    ///
    /// Fails when the pagemap read fails or the page is not present. Either
    /// way the pool is unusable for measurements and the caller should
    /// terminate.
    pub fn virt_to_phys(&mut self, vaddr: u64) -> Result<u64, TranslateError> {
        let page_start = vaddr & !PAGE_MASK;
        let region = VirtualMemoryArea::from((page_start, page_start + PAGE_MASK));
        let entries = self.pagemap.pagemap_vma(&region)?;
        if entries.len() != 1 {
            return Err(TranslateError::AmbiguousEntry {
                vaddr,
                count: entries.len(),
            });
        }
        if !entries[0].present() {
            return Err(TranslateError::NotPresent { vaddr });
        }
        let pfn = entries[0].pfn()?;
        if pfn == 0 {
            return Err(TranslateError::NotPresent { vaddr });
        }
        Ok((pfn << PAGE_SHIFT) | (vaddr & PAGE_MASK))
    }
}
