//! On-disk record sources and the `"<format>:<paths>"` addressing scheme.

pub mod jsonl;
pub mod txt;

pub use jsonl::JsonlSource;
pub use txt::TxtSource;

use crate::error::InputError;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// One record as read from disk, before it becomes an [`Example`](crate::Example).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawRecord {
    /// Pre-tokenized ids in the `src.ids` / `tgt.ids` / `tgt.labels` layout.
    Tokens {
        src_ids: Vec<i64>,
        tgt_ids: Vec<i64>,
        #[serde(default)]
        tgt_labels: Option<Vec<i64>>,
    },
    /// A raw text pair, tokenized later.
    Text { source: String, target: String },
}

/// A source of raw records.
///
/// The outer `Result` fails when the source cannot be opened at all. Errors
/// yielded by the iterator concern a single record and are recoverable.
pub trait RecordSource: Send + Sync {
    fn stream(&self) -> Result<Box<dyn Iterator<Item = Result<RawRecord>> + Send>>;
}

/// Record encodings known to [`FilePattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Jsonl,
    Text,
}

impl RecordFormat {
    /// Opens `path` with the reader for this format.
    pub fn open(&self, path: impl Into<PathBuf>) -> Box<dyn RecordSource> {
        match self {
            RecordFormat::Jsonl => Box::new(JsonlSource::new(path)),
            RecordFormat::Text => Box::new(TxtSource::new(path)),
        }
    }

    /// Opens `path` and starts streaming its records.
    pub fn read(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<Box<dyn Iterator<Item = Result<RawRecord>> + Send>> {
        self.open(path).stream()
    }
}

impl FromStr for RecordFormat {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jsonl" => Ok(RecordFormat::Jsonl),
            "text" | "txt" => Ok(RecordFormat::Text),
            other => Err(InputError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFormat::Jsonl => write!(f, "jsonl"),
            RecordFormat::Text => write!(f, "text"),
        }
    }
}

/// A parsed `"<format>:<path>[,<path>...]"` string.
///
/// Each path is a regular file, a directory (every regular file inside it),
/// or a file name holding a single `*` wildcard such as `data/train-*.jsonl`.
///
/// # Example
/// ```ignore
/// let pattern = FilePattern::parse("jsonl:/data/train-*.jsonl,/data/extra")?;
/// for path in pattern.expand()? {
///     let source = pattern.format.open(path);
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    pub format: RecordFormat,
    pub paths: Vec<String>,
}

impl FilePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let Some((format, paths)) = pattern.split_once(':') else {
            bail!(InputError::InvalidFilePattern(format!(
                "'{}' is missing the '<format>:' prefix",
                pattern
            )));
        };
        let format: RecordFormat = format.trim().parse()?;
        let paths: Vec<String> = paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if paths.is_empty() {
            bail!(InputError::InvalidFilePattern(format!(
                "'{}' names no paths",
                pattern
            )));
        }
        Ok(Self { format, paths })
    }

    /// Resolves every path to concrete files, sorted and deduplicated.
    pub fn expand(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in &self.paths {
            files.extend(expand_path(path)?);
        }
        files.sort();
        files.dedup();
        if files.is_empty() {
            bail!(InputError::InvalidFilePattern(format!(
                "{}:{} matched no files",
                self.format,
                self.paths.join(",")
            )));
        }
        Ok(files)
    }
}

impl FromStr for FilePattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn expand_path(path: &str) -> Result<Vec<PathBuf>> {
    let as_path = Path::new(path);
    let file_name = as_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if file_name.contains('*') {
        let parent = match as_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if parent.to_string_lossy().contains('*') {
            bail!(InputError::InvalidFilePattern(format!(
                "wildcards are only supported in the file name: '{}'",
                path
            )));
        }
        let Some((prefix, suffix)) = file_name.split_once('*') else {
            return Ok(Vec::new());
        };
        if suffix.contains('*') {
            bail!(InputError::InvalidFilePattern(format!(
                "at most one '*' is supported: '{}'",
                path
            )));
        }
        return list_files(parent, |name| {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        });
    }

    if as_path.is_dir() {
        return list_files(as_path, |_| true);
    }
    if as_path.is_file() {
        return Ok(vec![as_path.to_path_buf()]);
    }
    bail!(InputError::InvalidFilePattern(format!(
        "'{}' does not exist",
        path
    )))
}

fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("Failed to list directory {}", dir.display()))?;
        let matches = entry.file_name().to_str().map(&keep).unwrap_or(false);
        if matches && entry.path().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
