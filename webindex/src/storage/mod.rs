//! Page storage for the word index.
//!
//! Pages are the unit of persistence. Each one is addressed by a `PageId`
//! and carries a checksummed header, so a page written by one process can
//! be reloaded by identity in another.
//!
//! # Layout
//!
//! - `superblock`: order, root page, page and key counters
//! - one page per B-tree node, internal or leaf
//!
//! # Usage
//!
//! ```
//! use webindex::storage::{MemoryStore, Page, PageStore, PageType};
//!
//! let mut store = MemoryStore::new();
//! let mut page = Page::new(PageType::BTreeLeaf);
//! page.put_bytes(b"hello");
//! page.seal();
//! store.write_page(1, &page).unwrap();
//!
//! assert_eq!(store.read_page(1).unwrap(), page);
//! ```

mod file;
mod io;
mod memory;
mod page;
mod superblock;

pub use file::{DirectoryStore, SUPERBLOCK_FILE};
pub use io::{PageStore, StorageError};
pub use memory::{Fault, FaultConfig, MemoryStore, MemoryStoreStats};
pub use page::{Page, PageError, PageHeader, PageId, PageReader, PageType};
pub use superblock::{FORMAT_VERSION, MAGIC, Superblock, SuperblockError};
