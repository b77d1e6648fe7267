//! B-tree over a page store.
//!
//! This is a disk-paged B-tree that maps a word to the set of URLs it was
//! seen in:
//! - Key: the word
//! - Value: set of URLs
//!
//! Only the root node stays in memory between calls. Every other node is
//! loaded by identity on the way down and written back on the way up, so the
//! store always holds the single current copy of a page.

use std::collections::BTreeSet;

use crate::btree::node::{MIN_ORDER, Node, NodeError, NodeType, Payload, check_entry_size};
use crate::document::Document;
use crate::storage::{PageId, PageStore, StorageError, Superblock};

/// Result of inserting one `(key, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Key and value were both present already.
    Unchanged,
    /// Key was present; value was added to its set.
    ValueAdded,
    /// Key was new.
    KeyInserted,
}

/// A B-tree backed by a page store.
pub struct BTree<S: PageStore> {
    store: S,
    /// The current root. Written to the store whenever it changes.
    root: Node,
    superblock: Superblock,
}

impl<S: PageStore> BTree<S> {
    /// Create a new tree with an empty external root at page 0.
    ///
    /// Returns an error if the store already holds a tree.
    pub fn create(mut store: S, order: usize) -> Result<Self, BTreeError> {
        let order_u32 = u32::try_from(order).map_err(|_| BTreeError::InvalidOrder(order))?;
        if order < MIN_ORDER {
            return Err(BTreeError::InvalidOrder(order));
        }
        if store.read_superblock()?.is_some() {
            return Err(BTreeError::AlreadyInitialized);
        }

        let superblock = Superblock::new(order_u32);
        let root = Node::new(superblock.root_page, NodeType::External, order);
        store.write_page(root.page_id(), &root.to_page())?;
        store.write_superblock(&superblock)?;

        tracing::info!(order, "created index");

        Ok(Self {
            store,
            root,
            superblock,
        })
    }

    /// Open the tree recorded in the store's superblock.
    pub fn open(mut store: S) -> Result<Self, BTreeError> {
        let superblock = store
            .read_superblock()?
            .ok_or(BTreeError::NotInitialized)?;
        let order = superblock.order as usize;
        let root = load_node(&mut store, order, superblock.root_page)?;

        tracing::info!(
            order,
            root_page = superblock.root_page,
            pages = superblock.page_count,
            keys = superblock.key_count,
            "opened index"
        );

        Ok(Self {
            store,
            root,
            superblock,
        })
    }

    /// Open the tree in `store`, creating one with `order` if it is empty.
    ///
    /// An existing tree keeps the order it was created with.
    pub fn open_or_create(mut store: S, order: usize) -> Result<Self, BTreeError> {
        match store.read_superblock()? {
            Some(existing) => {
                if existing.order as usize != order {
                    tracing::warn!(
                        stored = existing.order,
                        requested = order,
                        "index exists with a different order; keeping the stored order"
                    );
                }
                Self::open(store)
            }
            None => Self::create(store, order),
        }
    }

    /// `(page_count, key_count)`: identities minted so far and distinct keys
    /// ever inserted. No traversal.
    #[must_use]
    pub const fn size(&self) -> (u64, u64) {
        (self.superblock.page_count, self.superblock.key_count)
    }

    /// Slots per page, slack slot included.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.superblock.order as usize
    }

    /// Identity of the current root page.
    #[must_use]
    pub const fn root_page(&self) -> PageId {
        self.superblock.root_page
    }

    /// The in-memory root node.
    #[must_use]
    pub const fn root(&self) -> &Node {
        &self.root
    }

    /// Get access to the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Get mutable access to the underlying store.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consume the tree, returning its store.
    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    /// Sync all written pages to durable storage.
    pub fn sync(&mut self) -> Result<(), BTreeError> {
        self.store.sync()?;
        Ok(())
    }

    /// True if `key` has been indexed.
    pub fn contains(&mut self, key: &str) -> Result<bool, BTreeError> {
        self.with_leaf(key, |leaf| leaf.contains(key))
    }

    /// The URLs recorded for `key`, or `None` if it was never indexed.
    pub fn get(&mut self, key: &str) -> Result<Option<BTreeSet<String>>, BTreeError> {
        self.with_leaf(key, |leaf| leaf.get(key).cloned())
    }

    /// Descend to the external node that owns `key` and apply `f` to it.
    fn with_leaf<T>(&mut self, key: &str, f: impl FnOnce(&Node) -> T) -> Result<T, BTreeError> {
        if self.root.is_external() {
            return Ok(f(&self.root));
        }

        let order = self.order();
        let mut parent = self.root.page_id();
        let mut current = self.root.locate_child(key).map_err(|e| fault(parent, e))?;

        loop {
            let node = load_node(&mut self.store, order, current)?;
            if node.is_external() {
                return Ok(f(&node));
            }
            parent = current;
            current = node.locate_child(key).map_err(|e| fault(parent, e))?;
        }
    }

    /// Record that `key` appears at `value`.
    ///
    /// Returns true if `key` was not in the tree before. Adding a value that
    /// is already recorded for `key` is a no-op. A key or value too long for
    /// a page is rejected before anything changes.
    pub fn add(&mut self, key: &str, value: &str) -> Result<bool, BTreeError> {
        check_entry_size(key, value)?;
        let before = self.superblock;
        let Self {
            store,
            root,
            superblock,
        } = self;

        let (outcome, root_dirty) = insert_into(store, superblock, root, key, value)?;

        if root.is_full() {
            split_root(store, superblock, root)?;
        } else if root_dirty {
            store.write_page(root.page_id(), &root.to_page())?;
        }

        if *superblock != before {
            store.write_superblock(superblock)?;
        }

        Ok(outcome == Outcome::KeyInserted)
    }

    /// Add every key in `keys` with the same `value`.
    ///
    /// Keys are deduplicated and inserted in ascending order, one descent
    /// per distinct key. Returns the number of keys that were new. If any
    /// key is too long for a page, no key is added.
    pub fn add_batch<I, K>(&mut self, keys: I, value: &str) -> Result<usize, BTreeError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: BTreeSet<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_owned())
            .collect();
        for key in &keys {
            check_entry_size(key, value)?;
        }

        let mut new_keys = 0;
        for key in &keys {
            if self.add(key, value)? {
                new_keys += 1;
            }
        }
        Ok(new_keys)
    }

    /// Index every word of `document` under the document's URL.
    pub fn add_document(&mut self, document: &Document) -> Result<usize, BTreeError> {
        let new_keys = self.add_batch(document.words(), document.url())?;
        let (pages, keys) = self.size();
        tracing::debug!(url = document.url(), new_keys, pages, keys, "indexed document");
        Ok(new_keys)
    }

    /// Walk every reachable page and report broken tree invariants.
    ///
    /// Checks sort order, minimum keys of internal entries, payload types,
    /// capacity, uniform leaf depth, identity bounds, and the key counter.
    pub fn check_invariants(&mut self) -> Result<Vec<InvariantViolation>, BTreeError> {
        let mut checker = InvariantChecker {
            order: self.order(),
            page_count: self.superblock.page_count,
            violations: Vec::new(),
            visited: BTreeSet::new(),
            leaf_depth: None,
            leaf_keys: 0,
        };

        checker.check_node(&mut self.store, &self.root, 0, None)?;

        if checker.leaf_keys != self.superblock.key_count {
            checker.violations.push(InvariantViolation {
                page_id: None,
                description: format!(
                    "key count {} does not match {} leaf entries",
                    self.superblock.key_count, checker.leaf_keys
                ),
            });
        }

        Ok(checker.violations)
    }
}

/// Recursive insert below `node`.
///
/// Returns the outcome and whether `node` itself changed. Children are
/// written here; `node` is written by its caller. An internal node's first
/// key is lowered on the way back up, once the insert below has succeeded.
fn insert_into<S: PageStore>(
    store: &mut S,
    superblock: &mut Superblock,
    node: &mut Node,
    key: &str,
    value: &str,
) -> Result<(Outcome, bool), BTreeError> {
    if node.is_external() {
        let outcome = match node.add_value(key, value)? {
            Some(true) => Outcome::ValueAdded,
            Some(false) => Outcome::Unchanged,
            None => {
                node.insert_entry(key.to_owned(), Payload::value(value))?;
                superblock.key_count += 1;
                Outcome::KeyInserted
            }
        };
        return Ok((outcome, outcome != Outcome::Unchanged));
    }

    let child_id = node
        .locate_child(key)
        .map_err(|e| fault(node.page_id(), e))?;
    let mut child = load_node(store, superblock.order as usize, child_id)?;

    let (outcome, child_dirty) = insert_into(store, superblock, &mut child, key, value)?;
    // Only a key that reached the leaf may become a subtree minimum
    let mut dirty = node.lower_first_key(key);

    if child.is_full() {
        let right_id = superblock.page_count;
        superblock.page_count += 1;

        let (split_key, right) = child.split(right_id)?;
        tracing::debug!(
            left = child.page_id(),
            right = right_id,
            split_key = split_key.as_str(),
            "split page"
        );

        store.write_page(right_id, &right.to_page())?;
        store.write_page(child.page_id(), &child.to_page())?;
        node.insert_entry(split_key, Payload::Child(right_id))?;
        dirty = true;
    } else if child_dirty {
        store.write_page(child.page_id(), &child.to_page())?;
    }

    Ok((outcome, dirty))
}

/// Replace a full root with a new internal root over its two halves.
fn split_root<S: PageStore>(
    store: &mut S,
    superblock: &mut Superblock,
    root: &mut Node,
) -> Result<(), BTreeError> {
    let new_page_id = superblock.page_count;
    let (right, new_root) = root.split_root(new_page_id)?;
    superblock.page_count += 2;

    store.write_page(root.page_id(), &root.to_page())?;
    store.write_page(right.page_id(), &right.to_page())?;
    store.write_page(new_root.page_id(), &new_root.to_page())?;

    tracing::debug!(
        left = root.page_id(),
        right = right.page_id(),
        root = new_root.page_id(),
        "split root"
    );

    superblock.root_page = new_root.page_id();
    *root = new_root;
    Ok(())
}

/// Load a non-root node. Any failure is a structural fault: the page was
/// referenced by a parent (or the superblock) and must exist.
fn load_node<S: PageStore>(
    store: &mut S,
    order: usize,
    page_id: PageId,
) -> Result<Node, BTreeError> {
    let page = store
        .read_page(page_id)
        .map_err(|e| BTreeError::StructuralFault {
            page_id,
            cause: FaultCause::Storage(e),
        })?;
    let node = Node::from_page(&page, order).map_err(|e| fault(page_id, e))?;

    if node.page_id() != page_id {
        return Err(BTreeError::StructuralFault {
            page_id,
            cause: FaultCause::IdentityMismatch(node.page_id()),
        });
    }
    Ok(node)
}

const fn fault(page_id: PageId, e: NodeError) -> BTreeError {
    BTreeError::StructuralFault {
        page_id,
        cause: FaultCause::Node(e),
    }
}

/// A broken tree invariant found by `BTree::check_invariants`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Page where it was detected, if page-specific.
    pub page_id: Option<PageId>,
    /// Description of the violation.
    pub description: String,
}

struct InvariantChecker {
    order: usize,
    page_count: u64,
    violations: Vec<InvariantViolation>,
    visited: BTreeSet<PageId>,
    leaf_depth: Option<usize>,
    leaf_keys: u64,
}

impl InvariantChecker {
    fn report(&mut self, page_id: PageId, description: String) {
        self.violations.push(InvariantViolation {
            page_id: Some(page_id),
            description,
        });
    }

    /// Check `node` and its subtree. Every key must be `< upper`. Returns the
    /// subtree's minimum key.
    fn check_node<S: PageStore>(
        &mut self,
        store: &mut S,
        node: &Node,
        depth: usize,
        upper: Option<&str>,
    ) -> Result<Option<String>, BTreeError> {
        let page_id = node.page_id();
        if !self.visited.insert(page_id) {
            self.report(page_id, "page reachable more than once".to_string());
            return Ok(None);
        }
        if page_id >= self.page_count {
            self.report(
                page_id,
                format!("identity not below page count {}", self.page_count),
            );
        }
        if node.len() >= self.order {
            self.report(
                page_id,
                format!("{} entries at rest (order {})", node.len(), self.order),
            );
        }
        if depth > 0 && node.is_empty() {
            self.report(page_id, "empty non-root page".to_string());
        }

        for pair in node.entries().windows(2) {
            if pair[0].key >= pair[1].key {
                self.report(
                    page_id,
                    format!("keys out of order: {:?} then {:?}", pair[0].key, pair[1].key),
                );
            }
        }
        if let (Some(upper), Some(last)) = (upper, node.entries().last())
            && last.key.as_str() >= upper
        {
            self.report(
                page_id,
                format!("key {:?} not below parent bound {upper:?}", last.key),
            );
        }

        if node.is_external() {
            match self.leaf_depth {
                Some(expected) if expected != depth => self.report(
                    page_id,
                    format!("leaf at depth {depth}, expected {expected}"),
                ),
                Some(_) => {}
                None => self.leaf_depth = Some(depth),
            }
            for entry in node.entries() {
                match entry.values() {
                    Some(values) if values.is_empty() => {
                        self.report(page_id, format!("key {:?} has no values", entry.key));
                    }
                    Some(_) => {}
                    None => self.report(page_id, format!("child entry {:?} on leaf", entry.key)),
                }
            }
            self.leaf_keys += node.len() as u64;
            return Ok(node.first_key().map(str::to_owned));
        }

        for (i, entry) in node.entries().iter().enumerate() {
            let Some(child_id) = entry.child() else {
                self.report(page_id, format!("value entry {:?} on internal page", entry.key));
                continue;
            };
            let child_upper = node
                .entries()
                .get(i + 1)
                .map_or(upper, |next| Some(next.key.as_str()));

            let child = load_node(store, self.order, child_id)?;
            let child_min = self.check_node(store, &child, depth + 1, child_upper)?;
            if child_min.as_deref() != Some(entry.key.as_str()) {
                self.report(
                    page_id,
                    format!(
                        "entry {:?} does not match child {child_id} minimum {child_min:?}",
                        entry.key
                    ),
                );
            }
        }

        Ok(node.first_key().map(str::to_owned))
    }
}

/// Why a referenced page could not be used.
#[derive(Debug)]
pub enum FaultCause {
    /// The store could not produce the page.
    Storage(StorageError),
    /// The page did not decode, or its contents broke a node precondition.
    Node(NodeError),
    /// The page decoded but records a different identity.
    IdentityMismatch(PageId),
}

impl std::fmt::Display for FaultCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "{e}"),
            Self::Node(e) => write!(f, "{e}"),
            Self::IdentityMismatch(found) => write!(f, "page records identity {found}"),
        }
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// A page referenced by the tree is missing or unreadable. The tree
    /// should not be trusted for further operations.
    StructuralFault { page_id: PageId, cause: FaultCause },
    /// Node error.
    Node(NodeError),
    /// Store error outside of a descent (root, superblock, writes).
    Storage(StorageError),
    /// Order below `MIN_ORDER` or too large to record.
    InvalidOrder(usize),
    /// The store already holds a tree.
    AlreadyInitialized,
    /// The store holds no tree.
    NotInitialized,
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StructuralFault { page_id, cause } => {
                write!(f, "structural fault at page {page_id}: {cause}")
            }
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::InvalidOrder(order) => {
                write!(f, "invalid order {order} (minimum {MIN_ORDER})")
            }
            Self::AlreadyInitialized => write!(f, "store already holds an index"),
            Self::NotInitialized => write!(f, "store holds no index"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StructuralFault { cause, .. } => match cause {
                FaultCause::Storage(e) => Some(e),
                FaultCause::Node(e) => Some(e),
                FaultCause::IdentityMismatch(_) => None,
            },
            Self::Node(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::InvalidOrder(_) | Self::AlreadyInitialized | Self::NotInitialized => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}
