//! Index configuration module.
//!
//! This module provides configuration loading for the webindex binary from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `WEBINDEX_DIRECTORY`: Directory holding the index pages (default: `./index`)
//! - `WEBINDEX_ORDER`: B-tree order, slots per page (default: `1000`, minimum `4`)
//! - `WEBINDEX_MAX_PAGES`: Stop indexing once the page count exceeds this (optional)
//!
//! # Invariants
//!
//! - `order` is always in `MIN_ORDER..=u32::MAX`
//! - `directory` is never empty
//! - `max_pages`, when set, is non-zero

use std::path::PathBuf;

use crate::btree::{DEFAULT_ORDER, MIN_ORDER};

/// Index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory holding `superblock.bin` and the page files.
    pub directory: PathBuf,
    /// B-tree order used when the index is created. An existing index keeps
    /// the order it was created with.
    pub order: usize,
    /// Page cap for indexing runs.
    pub max_pages: Option<u64>,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self::InvalidValue { name, message } = self;
        write!(f, "invalid value for {name}: {message}")
    }
}

impl std::error::Error for ConfigError {}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(Self::DEFAULT_DIRECTORY),
            order: DEFAULT_ORDER,
            max_pages: None,
        }
    }
}

impl IndexConfig {
    /// Default index directory.
    pub const DEFAULT_DIRECTORY: &'static str = "./index";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `WEBINDEX_DIRECTORY` is set but empty, or if
    /// `WEBINDEX_ORDER` or `WEBINDEX_MAX_PAGES` is set but not valid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let directory = Self::load_directory(lookup("WEBINDEX_DIRECTORY"))?;
        let order = Self::load_order(lookup("WEBINDEX_ORDER"))?;
        let max_pages = Self::load_max_pages(lookup("WEBINDEX_MAX_PAGES"))?;

        Ok(Self {
            directory,
            order,
            max_pages,
        })
    }

    /// Parse the index directory. Returns the default if not set.
    fn load_directory(value: Option<String>) -> Result<PathBuf, ConfigError> {
        match value {
            None => Ok(PathBuf::from(Self::DEFAULT_DIRECTORY)),
            Some(value) if value.is_empty() => Err(ConfigError::InvalidValue {
                name: "WEBINDEX_DIRECTORY".to_string(),
                message: "must not be empty".to_string(),
            }),
            Some(value) => Ok(PathBuf::from(value)),
        }
    }

    /// Parse the B-tree order. Returns the default if not set.
    fn load_order(value: Option<String>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(DEFAULT_ORDER);
        };
        let invalid = |message: String| ConfigError::InvalidValue {
            name: "WEBINDEX_ORDER".to_string(),
            message,
        };

        let order = value
            .parse::<usize>()
            .map_err(|_| invalid(format!("'{value}' is not a number")))?;
        if order < MIN_ORDER || u32::try_from(order).is_err() {
            return Err(invalid(format!(
                "{order} is out of range (must be {MIN_ORDER}..={})",
                u32::MAX
            )));
        }
        Ok(order)
    }

    /// Parse the page cap. Absent means no cap.
    fn load_max_pages(value: Option<String>) -> Result<Option<u64>, ConfigError> {
        let Some(value) = value else {
            return Ok(None);
        };
        match value.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue {
                name: "WEBINDEX_MAX_PAGES".to_string(),
                message: format!("'{value}' is not a positive number"),
            }),
            Ok(max) => Ok(Some(max)),
        }
    }
}
