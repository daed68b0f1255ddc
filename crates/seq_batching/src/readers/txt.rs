use crate::readers::{RawRecord, RecordSource};
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Reads tab-separated `source<TAB>target` text pairs, one per line. Skips blank lines.
///
/// # Example
/// ```ignore
/// let source = TxtSource::new("train.tsv");
/// for record in source.stream()? {
///     let RawRecord::Text { source, target } = record? else { unreachable!() };
/// }
/// ```
pub struct TxtSource {
    path: PathBuf,
}

impl TxtSource {
    /// Creates a new text file reader
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn parse_line(line: &str) -> Result<RawRecord> {
    let (source, target) = line
        .split_once('\t')
        .ok_or_else(|| anyhow!("Expected 'source<TAB>target', found no tab"))?;
    Ok(RawRecord::Text {
        source: source.to_string(),
        target: target.trim_end_matches(['\r', '\n']).to_string(),
    })
}

impl RecordSource for TxtSource {
    fn stream(&self) -> Result<Box<dyn Iterator<Item = Result<RawRecord>> + Send>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open text file: {}", self.path.display()))?;
        let path = self.path.display().to_string();

        let reader = BufReader::new(file);
        let iter = reader
            .lines()
            .enumerate()
            .filter_map(move |(line_num, line)| match line {
                Ok(text) if text.trim().is_empty() => None,
                Ok(text) => Some(
                    parse_line(&text)
                        .with_context(|| format!("Bad record at {} line {}", path, line_num + 1)),
                ),
                Err(e) => Some(
                    Err(e).with_context(|| format!("Error reading {} line {}", path, line_num + 1)),
                ),
            });
        Ok(Box::new(iter))
    }
}
