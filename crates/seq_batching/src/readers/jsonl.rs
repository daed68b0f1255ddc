use crate::readers::{RawRecord, RecordSource};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::{fs::File, io::BufRead, path::PathBuf};

/// A line-by-line JSONL reader.
///
/// As a [`RecordSource`] every line must be one of
/// ```text
/// {"src_ids": [..], "tgt_ids": [..], "tgt_labels": [..]}   // tgt_labels optional
/// {"source": "...", "target": "..."}
/// ```
/// Blank lines are skipped. A line that fails to parse is yielded as an error
/// carrying its line number and does not end the stream.
///
/// # Example
/// ```ignore
/// let source = JsonlSource::new("train.jsonl");
/// for record in RecordSource::stream(&source)? {
///     match record {
///         Ok(record) => println!("{:?}", record),
///         Err(e) => eprintln!("skipping: {:#}", e),
///     }
/// }
/// ```
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    /// Creates a new reader for a JSONL file at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Streams lines as any deserializable type.
    ///
    /// # Errors
    /// - Fails if the file cannot be opened.
    /// - Yields an error per line that is not valid JSON for `T`.
    pub fn stream_typed<T: DeserializeOwned>(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<T>> + Send>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let reader = std::io::BufReader::new(file);
        let path = self.path.display().to_string();

        let iter = reader
            .lines()
            .enumerate()
            .filter_map(move |(line_num, line)| {
                let line = match line {
                    Ok(l) if l.trim().is_empty() => return None,
                    Ok(l) => l,
                    Err(e) => {
                        return Some(Err(e).with_context(|| {
                            format!("Error reading {} line {}", path, line_num + 1)
                        }))
                    }
                };
                Some(
                    serde_json::from_str::<T>(&line)
                        .with_context(|| format!("Invalid JSON at {} line {}", path, line_num + 1)),
                )
            });
        Ok(Box::new(iter))
    }
}

impl RecordSource for JsonlSource {
    fn stream(&self) -> Result<Box<dyn Iterator<Item = Result<RawRecord>> + Send>> {
        self.stream_typed()
    }
}
