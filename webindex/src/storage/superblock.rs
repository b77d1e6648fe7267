//! Superblock structure and serialization.
//!
//! The superblock records everything needed to reopen an index: the tree
//! order, the current root page, and the two tree counters.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{Page, PageError, PageId, PageType};

/// Magic number identifying a webindex store: "WEBINDEX"
pub const MAGIC: [u8; 8] = *b"WEBINDEX";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// The superblock contains all metadata about an index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// B-tree order: slots per page, slack slot included.
    pub order: u32,
    /// Page currently serving as the root.
    pub root_page: PageId,
    /// Number of page identities minted so far (the next identity to use).
    pub page_count: u64,
    /// Number of distinct keys ever inserted.
    pub key_count: u64,
}

impl Superblock {
    /// Create a superblock for a fresh tree whose root is page 0.
    #[must_use]
    pub const fn new(order: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            order,
            root_page: 0,
            page_count: 1,
            key_count: 0,
        }
    }

    /// Serialize the superblock to a sealed page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(PageType::Superblock);
        page.put_bytes(&MAGIC);
        page.put_u32(self.format_version);
        page.put_u32(self.order);
        page.put_u64(self.root_page);
        page.put_u64(self.page_count);
        page.put_u64(self.key_count);
        page.seal();
        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        let (header, mut reader) = page.verify()?;
        if header.page_type != PageType::Superblock {
            return Err(SuperblockError::WrongPageType(header.page_type));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(reader.read_bytes(8)?);
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let format_version = reader.read_u32()?;
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        Ok(Self {
            format_version,
            order: reader.read_u32()?,
            root_page: reader.read_u64()?,
            page_count: reader.read_u64()?,
            key_count: reader.read_u64()?,
        })
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Page is not a superblock.
    WrongPageType(PageType),
    /// Header or body could not be read.
    Page(PageError),
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::WrongPageType(t) => write!(f, "expected superblock page, found {t:?}"),
            Self::Page(e) => write!(f, "page error: {e}"),
        }
    }
}

impl std::error::Error for SuperblockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PageError> for SuperblockError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}
