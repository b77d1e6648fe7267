//! In-memory page store for tests.
//!
//! Pages live in a `HashMap` keyed by identity. Faults are rolled from a
//! seeded RNG, so a given seed and operation sequence always fails the same
//! way.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{Page, PageId};
use crate::storage::superblock::Superblock;

/// Kinds of fault a `MemoryStore` can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// A page read returns an error.
    FailedRead,
    /// A page write returns an error and stores nothing.
    FailedWrite,
    /// A page read succeeds but one bit of the returned copy is flipped.
    BitFlip,
}

/// Per-operation fault probabilities, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    pub failed_read: f64,
    pub failed_write: f64,
    pub bit_flip: f64,
}

impl FaultConfig {
    /// Every read returns a copy with one bit flipped.
    #[must_use]
    pub const fn always_corrupt() -> Self {
        Self {
            failed_read: 0.0,
            failed_write: 0.0,
            bit_flip: 1.0,
        }
    }

    const fn rate(&self, fault: Fault) -> f64 {
        match fault {
            Fault::FailedRead => self.failed_read,
            Fault::FailedWrite => self.failed_write,
            Fault::BitFlip => self.bit_flip,
        }
    }
}

/// Operation and fault counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub reads: u64,
    pub writes: u64,
    pub syncs: u64,
    pub failed_reads: u64,
    pub failed_writes: u64,
    pub bit_flips: u64,
}

impl MemoryStoreStats {
    const fn record(&mut self, fault: Fault) {
        match fault {
            Fault::FailedRead => self.failed_reads += 1,
            Fault::FailedWrite => self.failed_writes += 1,
            Fault::BitFlip => self.bit_flips += 1,
        }
    }
}

/// `PageStore` held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    pages: HashMap<PageId, Page>,
    superblock: Option<Superblock>,
    faults: FaultConfig,
    /// Pages whose reads always fail, regardless of `faults`.
    unreadable: HashSet<PageId>,
    rng: StdRng,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// An empty store that never injects faults.
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(0, FaultConfig::default())
    }

    /// An empty store rolling `faults` from an RNG seeded with `seed`.
    #[must_use]
    pub fn with_faults(seed: u64, faults: FaultConfig) -> Self {
        Self {
            pages: HashMap::new(),
            superblock: None,
            faults,
            unreadable: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MemoryStoreStats::default();
    }

    pub const fn set_faults(&mut self, faults: FaultConfig) {
        self.faults = faults;
    }

    /// Make every read of `page_id` fail until the page is written again.
    pub fn mark_unreadable(&mut self, page_id: PageId) {
        self.unreadable.insert(page_id);
    }

    /// Number of stored pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Drop a page, leaving any reference to it dangling.
    pub fn remove_page(&mut self, page_id: PageId) -> Option<Page> {
        self.pages.remove(&page_id)
    }

    /// Roll for `fault`, counting it if it fires.
    fn roll(&mut self, fault: Fault) -> bool {
        let rate = self.faults.rate(fault);
        let fired = rate > 0.0 && self.rng.random::<f64>() < rate;
        if fired {
            self.stats.record(fault);
        }
        fired
    }

    /// Flip one bit. CRC32 detects every single-bit error.
    fn flip_bit(&mut self, page: &mut Page) {
        let bytes = page.as_bytes_mut();
        if bytes.is_empty() {
            return;
        }
        let at = self.rng.random_range(0..bytes.len());
        bytes[at] ^= 1 << self.rng.random_range(0..8u8);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.stats.reads += 1;
        if self.unreadable.contains(&page_id) || self.roll(Fault::FailedRead) {
            return Err(StorageError::InjectedFault(format!(
                "read of page {page_id} failed"
            )));
        }

        #[allow(clippy::disallowed_methods)] // reads hand out copies
        let mut page = self
            .pages
            .get(&page_id)
            .cloned()
            .ok_or(StorageError::PageNotFound(page_id))?;

        if self.roll(Fault::BitFlip) {
            self.flip_bit(&mut page);
        }
        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.stats.writes += 1;
        if self.roll(Fault::FailedWrite) {
            return Err(StorageError::InjectedFault(format!(
                "write of page {page_id} failed"
            )));
        }

        self.unreadable.remove(&page_id);
        #[allow(clippy::disallowed_methods)] // the store keeps its own copy
        self.pages.insert(page_id, page.clone());
        Ok(())
    }

    fn read_superblock(&mut self) -> Result<Option<Superblock>, StorageError> {
        Ok(self.superblock)
    }

    fn write_superblock(&mut self, superblock: &Superblock) -> Result<(), StorageError> {
        self.superblock = Some(*superblock);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;

    fn leaf_page() -> Page {
        let mut page = Page::new(PageType::BTreeLeaf);
        page.put_bytes(b"leaf body");
        page.seal();
        page
    }

    #[test]
    fn test_write_then_read() {
        let mut store = MemoryStore::new();
        store.write_page(1, &leaf_page()).expect("write");
        assert_eq!(store.read_page(1).expect("read"), leaf_page());
        assert_eq!(store.page_count(), 1);
        assert_eq!(
            store.stats(),
            &MemoryStoreStats {
                reads: 1,
                writes: 1,
                ..MemoryStoreStats::default()
            }
        );
    }

    #[test]
    fn test_removed_page_is_not_found() {
        let mut store = MemoryStore::new();
        store.write_page(1, &leaf_page()).expect("write");
        assert!(store.remove_page(1).is_some());
        assert!(matches!(
            store.read_page(1),
            Err(StorageError::PageNotFound(1))
        ));
    }

    #[test]
    fn test_superblock_starts_empty() {
        let mut store = MemoryStore::new();
        assert!(store.read_superblock().expect("read").is_none());
        store
            .write_superblock(&Superblock::new(6))
            .expect("write");
        assert_eq!(
            store.read_superblock().expect("read"),
            Some(Superblock::new(6))
        );
    }

    #[test]
    fn test_bit_flip_fails_verification() {
        let mut store = MemoryStore::with_faults(7, FaultConfig::always_corrupt());
        store.write_page(1, &leaf_page()).expect("write");
        let page = store.read_page(1).expect("read");
        assert_ne!(page, leaf_page());
        assert!(page.verify().is_err());
        assert_eq!(store.stats().bit_flips, 1);

        // The stored copy is untouched
        store.set_faults(FaultConfig::default());
        assert_eq!(store.read_page(1).expect("read"), leaf_page());
    }

    #[test]
    fn test_unreadable_until_rewritten() {
        let mut store = MemoryStore::new();
        store.write_page(4, &leaf_page()).expect("write");
        store.mark_unreadable(4);
        assert!(matches!(
            store.read_page(4),
            Err(StorageError::InjectedFault(_))
        ));

        store.write_page(4, &leaf_page()).expect("rewrite");
        assert!(store.read_page(4).is_ok());
    }

    #[test]
    fn test_same_seed_same_failures() {
        let faults = FaultConfig {
            failed_read: 0.5,
            ..FaultConfig::default()
        };
        let outcomes = |seed| {
            let mut store = MemoryStore::with_faults(seed, faults);
            store.write_page(1, &leaf_page()).expect("write");
            let outcomes: Vec<bool> = (0..32).map(|_| store.read_page(1).is_ok()).collect();
            (outcomes, store.stats().failed_reads)
        };

        let (first, failures) = outcomes(11);
        assert_eq!(outcomes(11), (first.clone(), failures));
        assert!(failures > 0 && failures < 32);
    }
}
