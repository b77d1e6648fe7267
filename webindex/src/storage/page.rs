//! Page types and the raw page buffer.
//!
//! Every stored unit (tree page or superblock) is a `Page`: a fixed header
//! followed by a variable-length little-endian body. Unlike a fixed-size
//! block, a page grows to fit its entries, since a leaf entry owns a whole
//! set of URLs.

#![allow(clippy::cast_possible_truncation)]

/// A page identifier. Identities are minted from the tree's page counter.
pub type PageId = u64;

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Index metadata
    Superblock = 0x01,
    /// B-tree internal node
    BTreeInternal = 0x03,
    /// B-tree external (leaf) node
    BTreeLeaf = 0x04,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Superblock),
            0x03 => Ok(Self::BTreeInternal),
            0x04 => Ok(Self::BTreeLeaf),
            _ => Err(value),
        }
    }
}

/// Common header at the start of every page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
/// - `body_len`: 4 bytes
///
/// Total: 12 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
    pub body_len: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 12;

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 6-7 reserved
        buf[8..12].copy_from_slice(&self.body_len.to_le_bytes());
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, PageError> {
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let body_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        Ok(Self {
            page_type,
            flags,
            checksum,
            body_len,
        })
    }
}

/// A raw page buffer: header plus body.
///
/// Writers append to the body with the `put_*` methods and call `seal` to
/// stamp the length and checksum. Readers call `verify` and walk the body
/// with a `PageReader`.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    /// Create an empty page of the given type.
    #[must_use]
    pub fn new(page_type: PageType) -> Self {
        let header = PageHeader {
            page_type,
            flags: 0,
            checksum: 0,
            body_len: 0,
        };
        Self {
            data: header.to_bytes().to_vec(),
        }
    }

    /// Wrap bytes read from storage. Nothing is validated until `verify`.
    #[must_use]
    pub const fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Total size in bytes, header included.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the page has no body.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn is_empty(&self) -> bool {
        self.data.len() <= PageHeader::SIZE
    }

    /// Append a u16 (little-endian) to the body.
    pub fn put_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a u32 (little-endian) to the body.
    pub fn put_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a u64 (little-endian) to the body.
    pub fn put_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append raw bytes to the body.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Read the header. Fails if the buffer is shorter than a header.
    pub fn header(&self) -> Result<PageHeader, PageError> {
        let mut bytes = [0u8; PageHeader::SIZE];
        bytes.copy_from_slice(
            self.data
                .get(..PageHeader::SIZE)
                .ok_or(PageError::Truncated {
                    needed: PageHeader::SIZE,
                    available: self.data.len(),
                })?,
        );
        PageHeader::from_bytes(bytes)
    }

    /// Stamp body length and checksum into the header.
    pub fn seal(&mut self) {
        let body_len = (self.data.len() - PageHeader::SIZE) as u32;
        self.data[8..12].copy_from_slice(&body_len.to_le_bytes());
        let checksum = self.compute_checksum();
        self.data[2..6].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Compute CRC32 checksum of the page data (excluding the checksum field itself).
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[0..2]); // page_type + flags
        hasher.update(&[0u8; 4]); // zero out checksum field
        hasher.update(&self.data[6..]); // rest of page
        hasher.finalize()
    }

    /// Validate the header, body length and checksum.
    ///
    /// Returns the header and a reader positioned at the start of the body.
    pub fn verify(&self) -> Result<(PageHeader, PageReader<'_>), PageError> {
        let header = self.header()?;
        let body = &self.data[PageHeader::SIZE..];
        if body.len() != header.body_len as usize {
            return Err(PageError::Truncated {
                needed: header.body_len as usize,
                available: body.len(),
            });
        }
        let actual = self.compute_checksum();
        if actual != header.checksum {
            return Err(PageError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok((header, PageReader { body, offset: 0 }))
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("len", &self.data.len())
            .field("header", &self.header().ok())
            .finish_non_exhaustive()
    }
}

/// Cursor over a verified page body.
#[derive(Debug)]
pub struct PageReader<'a> {
    body: &'a [u8],
    offset: usize,
}

impl<'a> PageReader<'a> {
    /// Take the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PageError> {
        let end = self.offset + len;
        let bytes = self.body.get(self.offset..end).ok_or(PageError::Truncated {
            needed: end,
            available: self.body.len(),
        })?;
        self.offset = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PageError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u16(&mut self) -> Result<u16, PageError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, PageError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, PageError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read `len` bytes as a UTF-8 string.
    pub fn read_str(&mut self, len: usize) -> Result<String, PageError> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PageError::InvalidUtf8)
    }

    /// True once every body byte has been consumed.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.offset == self.body.len()
    }
}

/// Errors related to page operations.
#[derive(Debug)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Buffer ended before a field did.
    Truncated { needed: usize, available: usize },
    /// A key or value is not valid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::Truncated { needed, available } => {
                write!(f, "page truncated: need {needed} bytes, have {available}")
            }
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in page body"),
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_roundtrip() {
        let header = PageHeader {
            page_type: PageType::BTreeLeaf,
            flags: 0x42,
            checksum: 0xDEAD_BEEF,
            body_len: 77,
        };

        let bytes = header.to_bytes();
        let restored = PageHeader::from_bytes(bytes).expect("should parse");

        assert_eq!(restored.page_type, PageType::BTreeLeaf);
        assert_eq!(restored.flags, 0x42);
        assert_eq!(restored.checksum, 0xDEAD_BEEF);
        assert_eq!(restored.body_len, 77);
    }

    #[test]
    fn test_page_put_and_read() {
        let mut page = Page::new(PageType::BTreeInternal);
        page.put_u16(0xBEEF);
        page.put_u32(0x1234_5678);
        page.put_u64(0x0102_0304_0506_0708);
        page.put_bytes(b"hello");
        page.seal();

        let (header, mut reader) = page.verify().expect("should verify");
        assert_eq!(header.page_type, PageType::BTreeInternal);
        assert_eq!(header.body_len, 2 + 4 + 8 + 5);
        assert_eq!(reader.read_u16().expect("u16"), 0xBEEF);
        assert_eq!(reader.read_u32().expect("u32"), 0x1234_5678);
        assert_eq!(reader.read_u64().expect("u64"), 0x0102_0304_0506_0708);
        assert_eq!(reader.read_str(5).expect("str"), "hello");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_checksum_detects_bit_flip() {
        let mut page = Page::new(PageType::BTreeLeaf);
        page.put_bytes(b"some body bytes");
        page.seal();

        page.as_bytes_mut()[PageHeader::SIZE + 3] ^= 0x10;
        assert!(matches!(
            page.verify(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_page() {
        let mut page = Page::new(PageType::BTreeLeaf);
        page.put_u64(9);
        page.seal();

        let short = Page::from_bytes(page.as_bytes()[..PageHeader::SIZE + 4].to_vec());
        assert!(matches!(short.verify(), Err(PageError::Truncated { .. })));

        let (_, mut reader) = page.verify().expect("should verify");
        reader.read_u64().expect("u64");
        assert!(matches!(reader.read_u16(), Err(PageError::Truncated { .. })));
    }

    #[test]
    fn test_page_type_conversion() {
        assert_eq!(PageType::try_from(0x01), Ok(PageType::Superblock));
        assert_eq!(PageType::try_from(0x04), Ok(PageType::BTreeLeaf));
        assert!(PageType::try_from(0xFF).is_err());
    }
}
