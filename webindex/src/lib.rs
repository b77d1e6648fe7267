// Life of a document:
// 1. Text comes in with its URL
// 2. Tokenize into a sorted set of distinct words
// 3. For each word, descend the B-tree from the root:
//     - Load child pages by identity on the way down
//     - Merge the URL into the word's value set (or insert the word)
//     - Split full pages on the way back up, writing each changed page
// 4. Split the root if it filled up
// 5. Record root, page count and key count in the superblock
//
// System components:
//  - Page store (one file per page, or in memory for tests)
//  - B-tree over the page store
//  - Tokenizer and command-line driver

pub mod btree;
pub mod config;
pub mod document;
pub mod storage;

pub use btree::{BTree, BTreeError};
pub use document::Document;
