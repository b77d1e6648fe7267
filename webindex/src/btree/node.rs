//! B-tree node types and serialization.
//!
//! A node is one page of the tree:
//! - External (leaf) nodes map a word to the set of URLs it appears in
//! - Internal nodes map a word to the child page whose smallest word it is
//!
//! Internal keys are subtree minimums, not upper-bound separators: entry
//! `i` holds the smallest key reachable through its child, so the first
//! entry of every subtree carries that subtree's minimum.
//!
//! # Capacity
//!
//! A node has `order` slots. The last one is the slack slot: it is only
//! occupied between an insert and the split that insert triggers. At rest a
//! node holds at most `order - 1` entries.

#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeSet;

use crate::storage::{Page, PageError, PageId, PageType};

/// Order used when none is configured.
pub const DEFAULT_ORDER: usize = 1000;

/// Smallest order that still splits into two non-empty halves with room to
/// spare in the parent.
pub const MIN_ORDER: usize = 4;

/// Longest key that fits the on-page length prefix.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Longest value that fits the on-page length prefix.
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;

/// Check that `key` and `value` fit their on-page length prefixes.
pub const fn check_entry_size(key: &str, value: &str) -> Result<(), NodeError> {
    if key.len() > MAX_KEY_LEN {
        return Err(NodeError::KeyTooLarge(key.len()));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(NodeError::ValueTooLarge(value.len()));
    }
    Ok(())
}

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    External,
}

impl NodeType {
    const fn page_type(self) -> PageType {
        match self {
            Self::Internal => PageType::BTreeInternal,
            Self::External => PageType::BTreeLeaf,
        }
    }
}

impl TryFrom<PageType> for NodeType {
    type Error = PageType;

    fn try_from(value: PageType) -> Result<Self, Self::Error> {
        match value {
            PageType::BTreeInternal => Ok(Self::Internal),
            PageType::BTreeLeaf => Ok(Self::External),
            other => Err(other),
        }
    }
}

/// What an entry points at. Which variant is valid is fixed by the node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// URLs containing the key (external nodes).
    Values(BTreeSet<String>),
    /// Subtree whose minimum is the key (internal nodes).
    Child(PageId),
}

impl Payload {
    /// A value set holding a single value.
    #[must_use]
    pub fn value(value: &str) -> Self {
        Self::Values(BTreeSet::from([value.to_owned()]))
    }

    const fn node_type(&self) -> NodeType {
        match self {
            Self::Values(_) => NodeType::External,
            Self::Child(_) => NodeType::Internal,
        }
    }
}

/// One slot in a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub payload: Payload,
}

impl Entry {
    /// Child page, if this is an internal entry.
    #[must_use]
    pub const fn child(&self) -> Option<PageId> {
        match self.payload {
            Payload::Child(page_id) => Some(page_id),
            Payload::Values(_) => None,
        }
    }

    /// Value set, if this is an external entry.
    #[must_use]
    pub const fn values(&self) -> Option<&BTreeSet<String>> {
        match &self.payload {
            Payload::Values(values) => Some(values),
            Payload::Child(_) => None,
        }
    }
}

/// A B-tree node (one page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    page_id: PageId,
    node_type: NodeType,
    order: usize,
    /// Entries in strictly ascending key order.
    entries: Vec<Entry>,
}

impl Node {
    /// Create a new empty node.
    #[must_use]
    pub const fn new(page_id: PageId, node_type: NodeType, order: usize) -> Self {
        Self {
            page_id,
            node_type,
            order,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        self.node_type
    }

    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self.node_type, NodeType::External)
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Number of occupied entries.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Smallest key on the node.
    #[must_use]
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|e| e.key.as_str())
    }

    /// True once the slack slot is occupied; the node must be split before
    /// it takes another entry.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.order
    }

    /// Find the index where a key is (`Ok`) or would be inserted (`Err`).
    pub fn find_index(&self, key: &str) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_str().cmp(key))
    }

    /// True if this is an external node holding `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.is_external() && self.find_index(key).is_ok()
    }

    /// Value set for `key` on an external node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.find_index(key)
            .ok()
            .and_then(|i| self.entries[i].values())
    }

    /// Merge `value` into the set of an existing key.
    ///
    /// Returns `None` if the key is absent (the caller inserts a fresh entry
    /// with `insert_entry`), otherwise whether the value was new.
    pub fn add_value(&mut self, key: &str, value: &str) -> Result<Option<bool>, NodeError> {
        if !self.is_external() {
            return Err(NodeError::WrongNodeType);
        }
        let Ok(i) = self.find_index(key) else {
            return Ok(None);
        };
        if value.len() > MAX_VALUE_LEN {
            return Err(NodeError::ValueTooLarge(value.len()));
        }
        match &mut self.entries[i].payload {
            Payload::Values(values) => Ok(Some(values.insert(value.to_owned()))),
            Payload::Child(_) => Err(NodeError::WrongNodeType),
        }
    }

    /// Insert a new entry at its sorted position.
    ///
    /// The payload must match the node type and the key must not be present.
    /// Inserting into a node whose slack slot is already taken is a
    /// `CapacityViolation`: callers split full nodes before inserting again.
    pub fn insert_entry(&mut self, key: String, payload: Payload) -> Result<(), NodeError> {
        if payload.node_type() != self.node_type {
            return Err(NodeError::WrongNodeType);
        }
        debug_assert!(!self.is_full(), "insert into full page {}", self.page_id);
        if self.is_full() {
            return Err(NodeError::CapacityViolation {
                page_id: self.page_id,
                order: self.order,
            });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(NodeError::KeyTooLarge(key.len()));
        }
        match self.find_index(&key) {
            Ok(_) => Err(NodeError::DuplicateKey(key)),
            Err(i) => {
                self.entries.insert(i, Entry { key, payload });
                Ok(())
            }
        }
    }

    /// Index of the child that owns `key`: the last entry whose key is
    /// `<= key`, or the first entry when `key` precedes every key.
    pub fn locate_child_index(&self, key: &str) -> Result<usize, NodeError> {
        if self.is_external() {
            return Err(NodeError::WrongNodeType);
        }
        if self.entries.is_empty() {
            return Err(NodeError::Empty);
        }
        Ok(match self.find_index(key) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        })
    }

    /// Identity of the child page that owns `key`.
    pub fn locate_child(&self, key: &str) -> Result<PageId, NodeError> {
        let i = self.locate_child_index(key)?;
        self.entries[i].child().ok_or(NodeError::WrongNodeType)
    }

    /// Lower the first key of an internal node to `key` if `key` is smaller.
    ///
    /// Called on the way back up from a successful insert so the first entry
    /// keeps naming its subtree's minimum. Returns whether the key changed.
    pub fn lower_first_key(&mut self, key: &str) -> bool {
        if self.is_external() {
            return false;
        }
        match self.entries.first_mut() {
            Some(first) if key < first.key.as_str() => {
                key.clone_into(&mut first.key);
                true
            }
            _ => false,
        }
    }

    /// Split the node in two.
    ///
    /// The left half keeps this node's identity and its first `len / 2`
    /// entries. The rest move to a new node of the same type with identity
    /// `new_page_id`. Returns the right node's first key and the right node.
    pub fn split(&mut self, new_page_id: PageId) -> Result<(String, Self), NodeError> {
        if self.entries.len() < 2 {
            return Err(NodeError::Empty);
        }
        let mid = self.entries.len() / 2;

        let right_entries = self.entries.split_off(mid);
        let split_key = right_entries[0].key.clone();

        let right = Self {
            page_id: new_page_id,
            node_type: self.node_type,
            order: self.order,
            entries: right_entries,
        };

        Ok((split_key, right))
    }

    /// Split a root node and build the internal root above it.
    ///
    /// The right half gets `new_page_id` and the same node type as this one;
    /// the new root gets `new_page_id + 1` and exactly two entries, one per
    /// half. Returns `(right_half, new_root)`. This node becomes the left
    /// half.
    pub fn split_root(&mut self, new_page_id: PageId) -> Result<(Self, Self), NodeError> {
        let (right_key, right) = self.split(new_page_id)?;
        let left_key = self.first_key().ok_or(NodeError::Empty)?.to_owned();

        let mut root = Self::new(new_page_id + 1, NodeType::Internal, self.order);
        root.entries.push(Entry {
            key: left_key,
            payload: Payload::Child(self.page_id),
        });
        root.entries.push(Entry {
            key: right_key,
            payload: Payload::Child(new_page_id),
        });

        Ok((right, root))
    }

    /// Serialize the node to a sealed page.
    ///
    /// Body layout:
    /// - `page_id`: 8 bytes
    /// - `entry_count`: 4 bytes
    /// - per entry: `key_len` (2) + key, then either
    ///   `value_count` (4) + (`value_len` (4) + value)* for leaves, or
    ///   `child` (8) for internal nodes
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new(self.node_type.page_type());
        page.put_u64(self.page_id);
        page.put_u32(self.entries.len() as u32);

        for entry in &self.entries {
            page.put_u16(entry.key.len() as u16);
            page.put_bytes(entry.key.as_bytes());

            match &entry.payload {
                Payload::Values(values) => {
                    page.put_u32(values.len() as u32);
                    for value in values {
                        page.put_u32(value.len() as u32);
                        page.put_bytes(value.as_bytes());
                    }
                }
                Payload::Child(child) => page.put_u64(*child),
            }
        }

        page.seal();
        page
    }

    /// Read a node from a page, verifying its checksum.
    pub fn from_page(page: &Page, order: usize) -> Result<Self, NodeError> {
        let (header, mut reader) = page.verify()?;
        let node_type =
            NodeType::try_from(header.page_type).map_err(NodeError::WrongPageType)?;

        let page_id = reader.read_u64()?;
        let entry_count = reader.read_u32()? as usize;
        if entry_count > order {
            return Err(NodeError::CapacityViolation { page_id, order });
        }

        let mut entries = Vec::new();
        for _ in 0..entry_count {
            let key_len = reader.read_u16()? as usize;
            let key = reader.read_str(key_len)?;

            let payload = match node_type {
                NodeType::External => {
                    let value_count = reader.read_u32()?;
                    let mut values = BTreeSet::new();
                    for _ in 0..value_count {
                        let value_len = reader.read_u32()? as usize;
                        values.insert(reader.read_str(value_len)?);
                    }
                    Payload::Values(values)
                }
                NodeType::Internal => Payload::Child(reader.read_u64()?),
            };

            entries.push(Entry { key, payload });
        }

        if !reader.is_exhausted() {
            return Err(NodeError::TrailingBytes);
        }

        Ok(Self {
            page_id,
            node_type,
            order,
            entries,
        })
    }
}

/// Errors that can occur when working with B-tree nodes.
#[derive(Debug)]
pub enum NodeError {
    /// Insert into a node whose slack slot is already used.
    CapacityViolation { page_id: PageId, order: usize },
    /// Payload or operation does not match the node type.
    WrongNodeType,
    /// Key already present on the node.
    DuplicateKey(String),
    /// Operation needs entries the node does not have.
    Empty,
    /// Key longer than `MAX_KEY_LEN` bytes.
    KeyTooLarge(usize),
    /// Value longer than `MAX_VALUE_LEN` bytes.
    ValueTooLarge(usize),
    /// Page is not a B-tree page.
    WrongPageType(PageType),
    /// Page body continues past the last entry.
    TrailingBytes,
    /// Page could not be read.
    Page(PageError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapacityViolation { page_id, order } => {
                write!(f, "page {page_id} has no free slot (order {order})")
            }
            Self::WrongNodeType => write!(f, "wrong node type for operation"),
            Self::DuplicateKey(key) => write!(f, "duplicate key: {key:?}"),
            Self::Empty => write!(f, "node has too few entries"),
            Self::KeyTooLarge(len) => {
                write!(f, "key too large: {len} bytes (max {MAX_KEY_LEN})")
            }
            Self::ValueTooLarge(len) => {
                write!(f, "value too large: {len} bytes (max {MAX_VALUE_LEN})")
            }
            Self::WrongPageType(t) => write!(f, "not a B-tree page: {t:?}"),
            Self::TrailingBytes => write!(f, "trailing bytes after last entry"),
            Self::Page(e) => write!(f, "page error: {e}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PageError> for NodeError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(order: usize, keys: &[&str]) -> Node {
        let mut node = Node::new(0, NodeType::External, order);
        for key in keys {
            node.insert_entry((*key).to_owned(), Payload::value("u"))
                .expect("insert");
        }
        node
    }

    fn keys(node: &Node) -> Vec<&str> {
        node.entries().iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        let node = leaf_with(8, &["m", "c", "x", "a", "p"]);
        assert_eq!(keys(&node), vec!["a", "c", "m", "p", "x"]);
    }

    #[test]
    fn test_insert_duplicate_key() {
        let mut node = leaf_with(8, &["a"]);
        let result = node.insert_entry("a".to_owned(), Payload::value("v"));
        assert!(matches!(result, Err(NodeError::DuplicateKey(_))));
    }

    #[test]
    fn test_insert_wrong_payload() {
        let mut node = Node::new(0, NodeType::External, 8);
        let result = node.insert_entry("a".to_owned(), Payload::Child(3));
        assert!(matches!(result, Err(NodeError::WrongNodeType)));

        let mut node = Node::new(0, NodeType::Internal, 8);
        let result = node.insert_entry("a".to_owned(), Payload::value("v"));
        assert!(matches!(result, Err(NodeError::WrongNodeType)));
    }

    #[test]
    fn test_full_uses_slack_slot() {
        let mut node = leaf_with(4, &["b", "d", "f"]);
        assert!(!node.is_full());

        node.insert_entry("h".to_owned(), Payload::value("u"))
            .expect("slack slot");
        assert!(node.is_full());
        assert_eq!(node.len(), 4);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_insert_into_full_node() {
        let mut node = leaf_with(4, &["b", "d", "f", "h"]);
        let result = node.insert_entry("j".to_owned(), Payload::value("u"));
        assert!(matches!(
            result,
            Err(NodeError::CapacityViolation { order: 4, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "insert into full page")]
    #[cfg(debug_assertions)]
    fn test_insert_into_full_node_asserts() {
        let mut node = leaf_with(4, &["b", "d", "f", "h"]);
        let _ = node.insert_entry("j".to_owned(), Payload::value("u"));
    }

    #[test]
    fn test_add_value_merges() {
        let mut node = leaf_with(8, &["cat"]);

        assert_eq!(node.add_value("cat", "u2").expect("merge"), Some(true));
        assert_eq!(node.add_value("cat", "u2").expect("merge"), Some(false));
        assert_eq!(node.add_value("dog", "u1").expect("merge"), None);

        let values: Vec<&str> = node
            .get("cat")
            .expect("present")
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(values, vec!["u", "u2"]);
    }

    #[test]
    fn test_add_value_on_internal_node() {
        let mut node = Node::new(0, NodeType::Internal, 8);
        assert!(matches!(
            node.add_value("a", "u"),
            Err(NodeError::WrongNodeType)
        ));
    }

    #[test]
    fn test_locate_child() {
        let mut node = Node::new(0, NodeType::Internal, 8);
        node.insert_entry("d".to_owned(), Payload::Child(10))
            .expect("insert");
        node.insert_entry("k".to_owned(), Payload::Child(20))
            .expect("insert");
        node.insert_entry("r".to_owned(), Payload::Child(30))
            .expect("insert");

        // Smaller than every key -> first child
        assert_eq!(node.locate_child("a").expect("locate"), 10);
        // Equal to a key -> that key's child
        assert_eq!(node.locate_child("d").expect("locate"), 10);
        assert_eq!(node.locate_child("k").expect("locate"), 20);
        // Between keys -> the lower key's child
        assert_eq!(node.locate_child("m").expect("locate"), 20);
        // Greater than every key -> last child
        assert_eq!(node.locate_child("z").expect("locate"), 30);
    }

    #[test]
    fn test_locate_child_on_leaf() {
        let node = leaf_with(8, &["a"]);
        assert!(matches!(
            node.locate_child("a"),
            Err(NodeError::WrongNodeType)
        ));
    }

    #[test]
    fn test_lower_first_key() {
        let mut node = Node::new(0, NodeType::Internal, 8);
        node.insert_entry("d".to_owned(), Payload::Child(10))
            .expect("insert");

        assert!(!node.lower_first_key("e"));
        assert!(node.lower_first_key("b"));
        assert_eq!(node.first_key(), Some("b"));

        let mut leaf = leaf_with(8, &["d"]);
        assert!(!leaf.lower_first_key("a"));
    }

    #[test]
    fn test_split_halves() {
        let mut node = leaf_with(10, &["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        let before = node.entries().to_vec();

        let (split_key, right) = node.split(7).expect("split");

        assert_eq!(keys(&node), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(keys(&right), vec!["f", "g", "h", "i", "j"]);
        assert_eq!(split_key, "f");
        assert_eq!(node.page_id(), 0);
        assert_eq!(right.page_id(), 7);
        assert_eq!(right.node_type(), NodeType::External);

        let mut after = node.entries().to_vec();
        after.extend(right.entries().iter().cloned());
        assert_eq!(after, before);
    }

    #[test]
    fn test_split_root_builds_internal_root() {
        let mut root = leaf_with(4, &["b", "d", "f", "h"]);

        let (right, new_root) = root.split_root(1).expect("split root");

        assert_eq!(keys(&root), vec!["b", "d"]);
        assert_eq!(keys(&right), vec!["f", "h"]);
        assert_eq!(right.page_id(), 1);
        assert_eq!(new_root.page_id(), 2);
        assert_eq!(new_root.node_type(), NodeType::Internal);
        assert_eq!(keys(&new_root), vec!["b", "f"]);
        assert_eq!(new_root.entries()[0].child(), Some(0));
        assert_eq!(new_root.entries()[1].child(), Some(1));
    }

    #[test]
    fn test_split_root_keeps_internal_type() {
        let mut root = Node::new(5, NodeType::Internal, 4);
        for (i, key) in ["b", "d", "f", "h"].into_iter().enumerate() {
            root.insert_entry(key.to_owned(), Payload::Child(i as PageId))
                .expect("insert");
        }

        let (right, new_root) = root.split_root(9).expect("split root");
        assert_eq!(right.node_type(), NodeType::Internal);
        assert_eq!(root.node_type(), NodeType::Internal);
        assert_eq!(new_root.entries()[0].child(), Some(5));
        assert_eq!(new_root.entries()[1].child(), Some(9));
    }

    #[test]
    fn test_split_empty_node() {
        let mut node = Node::new(0, NodeType::External, 4);
        assert!(matches!(node.split(1), Err(NodeError::Empty)));
    }

    #[test]
    fn test_leaf_page_roundtrip() {
        let mut node = Node::new(12, NodeType::External, 8);
        node.insert_entry("rust".to_owned(), Payload::value("http://a"))
            .expect("insert");
        node.insert_entry("btree".to_owned(), Payload::value("http://b"))
            .expect("insert");
        node.add_value("rust", "http://c").expect("merge");

        let restored = Node::from_page(&node.to_page(), 8).expect("should parse");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_internal_page_roundtrip() {
        let mut node = Node::new(3, NodeType::Internal, 8);
        node.insert_entry("a".to_owned(), Payload::Child(1))
            .expect("insert");
        node.insert_entry("n".to_owned(), Payload::Child(2))
            .expect("insert");

        let restored = Node::from_page(&node.to_page(), 8).expect("should parse");
        assert_eq!(restored, node);
        assert_eq!(restored.page_id(), 3);
    }

    #[test]
    fn test_from_page_rejects_superblock() {
        let page = crate::storage::Superblock::new(8).to_page();
        assert!(matches!(
            Node::from_page(&page, 8),
            Err(NodeError::WrongPageType(PageType::Superblock))
        ));
    }

    #[test]
    fn test_from_page_detects_corruption() {
        let node = leaf_with(8, &["a", "b"]);
        let mut page = node.to_page();
        let last = page.len() - 1;
        page.as_bytes_mut()[last] ^= 0x01;

        assert!(matches!(
            Node::from_page(&page, 8),
            Err(NodeError::Page(PageError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_check_entry_size() {
        assert!(check_entry_size("word", "http://a").is_ok());
        assert!(check_entry_size(&"k".repeat(MAX_KEY_LEN), "u").is_ok());
        assert!(matches!(
            check_entry_size(&"k".repeat(MAX_KEY_LEN + 1), "u"),
            Err(NodeError::KeyTooLarge(len)) if len == MAX_KEY_LEN + 1
        ));
    }

    #[test]
    fn test_huge_order_allocates_by_content() {
        let order = 4_000_000_000;
        let mut node = leaf_with(order, &["b", "d"]);
        assert!(!node.is_full());
        node.insert_entry("c".to_owned(), Payload::value("u"))
            .expect("insert");

        let restored = Node::from_page(&node.to_page(), order).expect("decode");
        assert_eq!(restored, node);

        let (split_key, right) = node.split(1).expect("split");
        assert_eq!(split_key, "c");
        assert_eq!(right.len(), 2);
    }
}
