#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code; tests may use it.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webindex::btree::{BTree, BTreeError};
use webindex::config::{ConfigError, IndexConfig};
use webindex::document::Document;
use webindex::storage::{DirectoryStore, StorageError};

const USAGE: &str = "usage: webindex index <file>... | webindex search [term]... | webindex stats";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Index the given files.
    Index(Vec<PathBuf>),
    /// Look up the given terms, or whitespace-separated terms from stdin.
    Search(Vec<String>),
    /// Print index counters.
    Stats,
}

/// Parse the command line, program name excluded.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let Some(command) = args.next() else {
        return Err("missing command".to_string());
    };
    match command.as_str() {
        "index" => {
            let files: Vec<PathBuf> = args.map(PathBuf::from).collect();
            if files.is_empty() {
                return Err("index needs at least one file".to_string());
            }
            Ok(Command::Index(files))
        }
        "search" => Ok(Command::Search(args.collect())),
        "stats" => match args.next() {
            Some(extra) => Err(format!("unexpected argument to stats: {extra}")),
            None => Ok(Command::Stats),
        },
        other => Err(format!("unknown command: {other}")),
    }
}

#[derive(Debug)]
enum AppError {
    Config(ConfigError),
    Index(BTreeError),
    Storage(StorageError),
    Io(io::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Index(e) => write!(f, "index error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<BTreeError> for AppError {
    fn from(e: BTreeError) -> Self {
        Self::Index(e)
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webindex=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    let result = IndexConfig::from_env()
        .map_err(AppError::from)
        .and_then(|config| {
            tracing::info!(
                "Loaded configuration: directory={}, order={}, max_pages={:?}",
                config.directory.display(),
                config.order,
                config.max_pages
            );
            let stdout = io::stdout();
            let mut out = stdout.lock();
            match command {
                Command::Index(files) => run_index(&config, &files).map(|_| ()),
                Command::Search(terms) => {
                    let terms = if terms.is_empty() {
                        read_terms(io::stdin().lock())?
                    } else {
                        terms
                    };
                    run_search(&config, &terms, &mut out)
                }
                Command::Stats => run_stats(&config, &mut out),
            }
        });

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

/// Index `files` into the configured directory. Returns the number of
/// documents indexed.
fn run_index(config: &IndexConfig, files: &[PathBuf]) -> Result<u64, AppError> {
    let store = DirectoryStore::open_or_create(&config.directory)?;
    let mut tree = BTree::open_or_create(store, config.order)?;
    let mut documents = 0u64;

    for file in files {
        let Some(document) = load_document(file) else {
            continue;
        };
        tree.add_document(&document)?;
        documents += 1;

        let (pages, keys) = tree.size();
        tracing::info!(pages, keys, documents, "indexed {}", document.url());

        if let Some(max_pages) = config.max_pages
            && pages > max_pages
        {
            tracing::warn!("page cap of {max_pages} exceeded with {pages} pages, stopping");
            break;
        }
    }

    tree.sync()?;
    let (pages, keys) = tree.size();
    tracing::info!(pages, keys, documents, "index synced");
    Ok(documents)
}

/// Read a file into a document keyed by its `file://` URL. Unreadable files
/// are logged and skipped.
fn load_document(file: &Path) -> Option<Document> {
    let loaded = file
        .canonicalize()
        .and_then(|path| std::fs::read_to_string(&path).map(|text| (path, text)));
    match loaded {
        Ok((path, text)) => Some(Document::new(format!("file://{}", path.display()), text)),
        Err(e) => {
            tracing::warn!("skipping {}: {e}", file.display());
            None
        }
    }
}

fn run_search(config: &IndexConfig, terms: &[String], out: &mut impl Write) -> Result<(), AppError> {
    let store = DirectoryStore::open(&config.directory)?;
    let mut tree = BTree::open(store)?;

    for term in terms {
        let values = tree.get(term)?;
        writeln!(out, "{}", format_result(term, values.as_ref()))?;
    }
    Ok(())
}

fn run_stats(config: &IndexConfig, out: &mut impl Write) -> Result<(), AppError> {
    let store = DirectoryStore::open(&config.directory)?;
    let tree = BTree::open(store)?;
    let (pages, keys) = tree.size();

    writeln!(out, "order: {}", tree.order())?;
    writeln!(out, "root page: {}", tree.root_page())?;
    writeln!(out, "pages: {pages}")?;
    writeln!(out, "keys: {keys}")?;
    Ok(())
}

fn read_terms(input: impl BufRead) -> Result<Vec<String>, AppError> {
    let mut terms = Vec::new();
    for line in input.lines() {
        terms.extend(line?.split_whitespace().map(str::to_owned));
    }
    Ok(terms)
}

fn format_result(term: &str, values: Option<&BTreeSet<String>>) -> String {
    match values {
        Some(values) if !values.is_empty() => {
            let urls: Vec<&str> = values.iter().map(String::as_str).collect();
            format!("{term} : {}", urls.join(", "))
        }
        _ => format!("{term} not found"),
    }
}
