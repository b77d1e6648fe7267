//! Storage abstraction over page persistence.
//!
//! The `PageStore` trait is the only way the tree touches durable state.
//! Pages are addressed purely by identity, so a node can be dropped from
//! memory after an operation and reloaded later. Production code uses
//! `DirectoryStore`; tests use `MemoryStore`.

use crate::storage::page::{Page, PageId};
use crate::storage::superblock::{Superblock, SuperblockError};

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// No page has been written under this identity.
    PageNotFound(PageId),
    /// A store already exists at the target location.
    AlreadyExists(std::path::PathBuf),
    /// The superblock could not be decoded.
    Superblock(SuperblockError),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageNotFound(page_id) => write!(f, "page {page_id} not found"),
            Self::AlreadyExists(p) => write!(f, "index already exists: {}", p.display()),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StorageError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

/// Load-by-identity / store-by-identity page persistence.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last content written for that identity
/// - `read_page` of an identity never written returns `PageNotFound`
/// - `read_superblock` returns `None` until one has been written
/// - `sync` makes all previous writes durable
pub trait PageStore {
    /// Read a page by identity.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write (create or replace) the page with this identity.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Read the superblock, or `None` for an empty store.
    fn read_superblock(&mut self) -> Result<Option<Superblock>, StorageError>;

    /// Write the superblock.
    fn write_superblock(&mut self, superblock: &Superblock) -> Result<(), StorageError>;

    /// Sync all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), StorageError>;
}
