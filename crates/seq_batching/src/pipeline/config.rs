//! Configuration for the input pipeline.
//!
//! ```ignore
//! let config = InputConfig::builder()
//!     .file_pattern("jsonl:/data/train-*.jsonl")
//!     .bucket_upper_bound(vec![20, 40, 80])
//!     .bucket_batch_limit(vec![32, 16, 8])
//!     .packed_input(true)
//!     .source_max_length(80)
//!     .target_max_length(80)
//!     .build();
//! config.validate()?;
//! ```
//!
//! The same options can be loaded from JSON; missing keys take their defaults:
//! ```json
//! {"file_pattern": "text:/data/pairs.tsv", "bucket_upper_bound": [20], "bucket_batch_limit": [4]}
//! ```

use crate::bucket::validate_buckets;
use crate::error::InputError;
use crate::packing::OverflowPolicy;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Options of an [`InputPipeline`](super::InputPipeline).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// `"<format>:<path>[,<path>...]"`, see [`FilePattern`](crate::readers::FilePattern).
    pub file_pattern: String,
    /// Seed for file order and record shuffling. `0` draws a fresh seed.
    pub file_random_seed: u64,
    /// Number of reader threads. Ignored when `require_sequential_order` is set.
    pub file_parallelism: usize,
    /// Records held in the shuffle buffer.
    pub file_buffer_size: usize,
    /// Strictly ascending, inclusive bucket upper bounds.
    pub bucket_upper_bound: Vec<usize>,
    /// Rows per emitted batch, one entry per bucket.
    pub bucket_batch_limit: Vec<usize>,
    /// Pack several examples per row.
    pub packed_input: bool,
    pub source_max_length: usize,
    pub target_max_length: usize,
    /// Pad every batch to `source_max_length` / `target_max_length` instead of the
    /// longest row in the batch.
    pub pad_to_max_seq_length: bool,
    /// Close all open packed rows after this many examples (`0` = never).
    pub flush_every_n: usize,
    /// Single reader, no shuffling and strict arrival-order packing.
    pub require_sequential_order: bool,
    /// Passes over the files. `None` repeats forever.
    pub repeat_count: Option<usize>,
    /// Discard the partial bucket buffers left at end of stream.
    pub drop_remainder: bool,
    /// Open rows for first-fit packing. Forced to 1 under sequential order.
    pub packing_window: usize,
    /// Bound on the channel between reader threads and the pipeline.
    pub channel_capacity: usize,
    /// Examples longer than every bucket bound.
    pub out_of_range_policy: OverflowPolicy,
    /// Examples that cannot fit an empty packed row.
    pub overlong_policy: OverflowPolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            file_pattern: String::new(),
            file_random_seed: 301,
            file_parallelism: 1,
            file_buffer_size: 1024,
            bucket_upper_bound: vec![1_000_000_000],
            bucket_batch_limit: vec![8],
            packed_input: false,
            source_max_length: 300,
            target_max_length: 300,
            pad_to_max_seq_length: false,
            flush_every_n: 0,
            require_sequential_order: false,
            repeat_count: None,
            drop_remainder: false,
            packing_window: 8,
            channel_capacity: 256,
            out_of_range_policy: OverflowPolicy::Drop,
            overlong_policy: OverflowPolicy::Drop,
        }
    }
}

impl InputConfig {
    pub fn builder() -> InputConfigBuilder {
        InputConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse input config JSON")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("In config {}", path.display()))
    }

    /// Rejects configurations the pipeline cannot run with.
    ///
    /// A fixed pad length that turns out too short for an actual batch is
    /// only detected when that batch is padded.
    pub fn validate(&self) -> Result<()> {
        validate_buckets(&self.bucket_upper_bound, &self.bucket_batch_limit)?;

        if (self.packed_input || self.pad_to_max_seq_length)
            && (self.source_max_length == 0 || self.target_max_length == 0)
        {
            bail!(InputError::InvalidConfig(format!(
                "source_max_length ({}) and target_max_length ({}) must be positive \
                 when packing or padding to max length",
                self.source_max_length, self.target_max_length
            )));
        }
        let positive = [
            ("file_parallelism", self.file_parallelism),
            ("file_buffer_size", self.file_buffer_size),
            ("packing_window", self.packing_window),
            ("channel_capacity", self.channel_capacity),
        ];
        for (name, value) in positive {
            if value == 0 {
                bail!(InputError::InvalidConfig(format!("{} must be >= 1", name)));
            }
        }
        if self.repeat_count == Some(0) {
            bail!(InputError::InvalidConfig(
                "repeat_count must be >= 1, use None to repeat forever".into()
            ));
        }
        Ok(())
    }

    /// Seed actually used for shuffling: the configured one, or a random one for `0`.
    pub(crate) fn resolved_seed(&self) -> u64 {
        match self.file_random_seed {
            0 => rand::random(),
            seed => seed,
        }
    }

    /// Packed row capacities. A row never grows past the largest bucket
    /// bound, so every row the packer emits can be routed.
    pub(crate) fn packing_capacity(&self) -> (usize, usize) {
        let largest_bound = self.bucket_upper_bound.last().copied().unwrap_or(usize::MAX);
        (
            self.source_max_length.min(largest_bound),
            self.target_max_length.min(largest_bound),
        )
    }

    /// Rows kept open by the packer.
    pub(crate) fn effective_packing_window(&self) -> usize {
        if self.require_sequential_order {
            1
        } else {
            self.packing_window
        }
    }
}

/// Builder for [`InputConfig`] with method chaining
#[derive(Default)]
pub struct InputConfigBuilder {
    config: InputConfig,
}

impl InputConfigBuilder {
    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.file_pattern = pattern.into();
        self
    }

    pub fn file_random_seed(mut self, seed: u64) -> Self {
        self.config.file_random_seed = seed;
        self
    }

    pub fn file_parallelism(mut self, threads: usize) -> Self {
        self.config.file_parallelism = threads;
        self
    }

    pub fn file_buffer_size(mut self, records: usize) -> Self {
        self.config.file_buffer_size = records;
        self
    }

    pub fn bucket_upper_bound(mut self, bounds: Vec<usize>) -> Self {
        self.config.bucket_upper_bound = bounds;
        self
    }

    pub fn bucket_batch_limit(mut self, limits: Vec<usize>) -> Self {
        self.config.bucket_batch_limit = limits;
        self
    }

    pub fn packed_input(mut self, packed: bool) -> Self {
        self.config.packed_input = packed;
        self
    }

    pub fn source_max_length(mut self, len: usize) -> Self {
        self.config.source_max_length = len;
        self
    }

    pub fn target_max_length(mut self, len: usize) -> Self {
        self.config.target_max_length = len;
        self
    }

    pub fn pad_to_max_seq_length(mut self, pad: bool) -> Self {
        self.config.pad_to_max_seq_length = pad;
        self
    }

    pub fn flush_every_n(mut self, n: usize) -> Self {
        self.config.flush_every_n = n;
        self
    }

    pub fn require_sequential_order(mut self, sequential: bool) -> Self {
        self.config.require_sequential_order = sequential;
        self
    }

    /// Number of passes over the files, `None` for unbounded.
    pub fn repeat_count(mut self, passes: Option<usize>) -> Self {
        self.config.repeat_count = passes;
        self
    }

    pub fn drop_remainder(mut self, drop: bool) -> Self {
        self.config.drop_remainder = drop;
        self
    }

    pub fn packing_window(mut self, rows: usize) -> Self {
        self.config.packing_window = rows;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn out_of_range_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.out_of_range_policy = policy;
        self
    }

    pub fn overlong_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overlong_policy = policy;
        self
    }

    /// Build the final configuration. Validation happens when a pipeline is built.
    pub fn build(self) -> InputConfig {
        self.config
    }
}
