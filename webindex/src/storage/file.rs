//! Directory-backed page store.
//!
//! Each page lives in its own file named after its identity
//! (`page-<id>.bin`), next to a `superblock.bin`. A page file is rewritten
//! whole on every store.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{Page, PageId};
use crate::storage::superblock::Superblock;

/// File name of the superblock inside a store directory.
pub const SUPERBLOCK_FILE: &str = "superblock.bin";

/// A directory of page files.
#[derive(Debug)]
pub struct DirectoryStore {
    directory: PathBuf,
    /// Files written since the last sync.
    dirty: Vec<PathBuf>,
}

impl DirectoryStore {
    /// Create a new, empty store in `directory`.
    ///
    /// The directory is created if missing. Returns an error if it already
    /// holds a superblock.
    pub fn create(directory: &Path) -> Result<Self, StorageError> {
        let superblock = directory.join(SUPERBLOCK_FILE);
        if superblock.exists() {
            return Err(StorageError::AlreadyExists(directory.to_path_buf()));
        }
        fs::create_dir_all(directory)?;

        Ok(Self {
            directory: directory.to_path_buf(),
            dirty: Vec::new(),
        })
    }

    /// Open an existing store.
    ///
    /// Returns an error if the directory does not exist.
    pub fn open(directory: &Path) -> Result<Self, StorageError> {
        if !directory.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("index directory not found: {}", directory.display()),
            )));
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            dirty: Vec::new(),
        })
    }

    /// Open the store if it holds a superblock, otherwise create it.
    pub fn open_or_create(directory: &Path) -> Result<Self, StorageError> {
        if directory.join(SUPERBLOCK_FILE).exists() {
            Self::open(directory)
        } else {
            Self::create(directory)
        }
    }

    /// The directory this store writes to.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file holding a page.
    #[must_use]
    pub fn page_path(&self, page_id: PageId) -> PathBuf {
        self.directory.join(format!("page-{page_id}.bin"))
    }

    fn read_file(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn write_file(&mut self, path: PathBuf, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(bytes)?;
        if !self.dirty.contains(&path) {
            self.dirty.push(path);
        }
        Ok(())
    }
}

impl PageStore for DirectoryStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        Self::read_file(&self.page_path(page_id))?
            .map(Page::from_bytes)
            .ok_or(StorageError::PageNotFound(page_id))
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        let path = self.page_path(page_id);
        self.write_file(path, page.as_bytes())
    }

    fn read_superblock(&mut self) -> Result<Option<Superblock>, StorageError> {
        match Self::read_file(&self.directory.join(SUPERBLOCK_FILE))? {
            Some(bytes) => Ok(Some(Superblock::from_page(&Page::from_bytes(bytes))?)),
            None => Ok(None),
        }
    }

    fn write_superblock(&mut self, superblock: &Superblock) -> Result<(), StorageError> {
        let path = self.directory.join(SUPERBLOCK_FILE);
        self.write_file(path, superblock.to_page().as_bytes())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        for path in self.dirty.drain(..) {
            File::open(&path)?.sync_all()?;
        }
        File::open(&self.directory)?.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;
    use tempfile::tempdir;

    fn sample_page(tag: u64) -> Page {
        let mut page = Page::new(PageType::BTreeLeaf);
        page.put_u64(tag);
        page.seal();
        page
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("index");

        {
            let mut store = DirectoryStore::create(&path).expect("create store");
            assert!(store.read_superblock().expect("read").is_none());
            store
                .write_superblock(&Superblock::new(8))
                .expect("write superblock");
            store.sync().expect("sync");
        }

        {
            let mut store = DirectoryStore::open(&path).expect("open store");
            let sb = store.read_superblock().expect("read").expect("present");
            assert_eq!(sb.order, 8);
            assert_eq!(sb.page_count, 1);
        }
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("create temp dir");
        let mut store = DirectoryStore::create(dir.path()).expect("create store");
        store
            .write_superblock(&Superblock::new(4))
            .expect("write superblock");

        let result = DirectoryStore::create(dir.path());
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = tempdir().expect("create temp dir");
        let result = DirectoryStore::open(&dir.path().join("nope"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn test_write_and_read_pages() {
        let dir = tempdir().expect("create temp dir");
        let mut store = DirectoryStore::create(dir.path()).expect("create store");

        store.write_page(3, &sample_page(3)).expect("write 3");
        store.write_page(7, &sample_page(7)).expect("write 7");
        assert!(store.page_path(3).exists());

        assert_eq!(store.read_page(3).expect("read 3"), sample_page(3));
        assert_eq!(store.read_page(7).expect("read 7"), sample_page(7));

        // Rewriting replaces the old content
        store.write_page(3, &sample_page(99)).expect("rewrite 3");
        assert_eq!(store.read_page(3).expect("read 3"), sample_page(99));
        store.sync().expect("sync");
    }

    #[test]
    fn test_page_not_found() {
        let dir = tempdir().expect("create temp dir");
        let mut store = DirectoryStore::create(dir.path()).expect("create store");

        let result = store.read_page(100);
        assert!(matches!(result, Err(StorageError::PageNotFound(100))));
    }

    #[test]
    fn test_open_or_create() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("idx");

        let mut store = DirectoryStore::open_or_create(&path).expect("first open");
        store
            .write_superblock(&Superblock::new(16))
            .expect("write superblock");

        let mut store = DirectoryStore::open_or_create(&path).expect("second open");
        let sb = store.read_superblock().expect("read").expect("present");
        assert_eq!(sb.order, 16);
    }
}
