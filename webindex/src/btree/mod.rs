//! Word index B-tree.
//!
//! An order-M B-tree mapping a word to the set of URLs it appears in. Each
//! node is one page in a `PageStore`, addressed by identity.
//!
//! # Capacity
//!
//! A node has `order` slots. At rest a node holds at most `order - 1`
//! entries; the last slot only fills transiently, between the insert that
//! fills it and the split that follows on the way back up.
//!
//! # Internal entries
//!
//! Each internal entry holds the minimum key of its child subtree. A search
//! follows the last entry whose key is `<=` the search key.
//!
//! # Usage
//!
//! ```
//! use webindex::btree::BTree;
//! use webindex::storage::MemoryStore;
//!
//! let mut tree = BTree::create(MemoryStore::new(), 4).unwrap();
//! tree.add("cat", "http://a").unwrap();
//! tree.add("cat", "http://b").unwrap();
//!
//! let urls = tree.get("cat").unwrap().unwrap();
//! assert_eq!(urls.len(), 2);
//! assert_eq!(tree.size(), (1, 1));
//! ```

mod node;
mod tree;

pub use node::{
    DEFAULT_ORDER, Entry, MAX_KEY_LEN, MAX_VALUE_LEN, MIN_ORDER, Node, NodeError, NodeType,
    Payload, check_entry_size,
};
pub use tree::{BTree, BTreeError, FaultCause, InvariantViolation};
