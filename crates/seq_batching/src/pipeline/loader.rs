//! `InputPipeline` constructors and the pull API.
//!
//! - `new()` reads records from `config.file_pattern` and tokenizes them.
//! - `from_examples()` starts from an already tokenized example stream.
//!
//! Both run the same stages afterwards: optional packing, bucketing, padding.

use crate::batch::Batch;
use crate::bucket::{BucketBatch, BucketSelector, Bucketable};
use crate::collator::{Collator, PaddingCollator};
use crate::dataset::{ReaderCounters, ReaderOptions, RecordReader};
use crate::example::Example;
use crate::packing::{Packer, PackerConfig};
use crate::readers::FilePattern;
use crate::tokenizer::Tokenizer;
use crate::transform::{ExampleEncoder, Transform};
use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

use super::config::InputConfig;
use super::iterator::{Bucketing, ExampleStream, Rows};

/// Counters over the lifetime of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Batches handed out.
    pub batches: usize,
    /// Rows across all batches (equals `examples` unless packed).
    pub rows: usize,
    /// Original examples across all batches.
    pub examples: usize,
    /// Records parsed by the reader.
    pub records_read: usize,
    /// Records skipped because they failed to parse or encode.
    pub malformed: usize,
    /// Examples dropped for being longer than every bucket bound.
    pub out_of_range: usize,
    /// Examples that could not fit an empty packed row.
    pub overlong: usize,
    /// Rows discarded at end of stream under `drop_remainder`.
    pub remainder_dropped: usize,
}

/// A pull-based source of padded, bucketed (and optionally packed) batches.
///
/// Each pipeline owns its reader, packer and bucket buffers; nothing is shared
/// between instances. Dropping a pipeline mid-stream simply discards whatever
/// is buffered.
///
/// # Example
/// ```ignore
/// let config = InputConfig::builder()
///     .file_pattern("text:/data/pairs.tsv")
///     .bucket_upper_bound(vec![20, 40])
///     .bucket_batch_limit(vec![8, 4])
///     .build();
/// let mut pipeline = InputPipeline::new(config, Arc::new(AsciiTokenizer::new()))?;
///
/// while let Some(batch) = pipeline.get_preprocessed_input_batch()? {
///     let ids = batch.get("src.ids")?;
///     println!("{} examples in {:?}", pipeline.global_batch_size(), ids.size());
/// }
/// ```
pub struct InputPipeline {
    config: InputConfig,
    rows: Rows,
    collator: PaddingCollator,
    counters: Arc<ReaderCounters>,
    last_global_batch_size: usize,
    stats: PipelineStats,
    finished: bool,
}

impl InputPipeline {
    /// Builds a pipeline that reads and tokenizes `config.file_pattern`.
    pub fn new(config: InputConfig, tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {
        config.validate()?;
        let pattern = FilePattern::parse(&config.file_pattern)
            .with_context(|| format!("Bad file_pattern '{}'", config.file_pattern))?;
        let reader = RecordReader::new(&pattern, ReaderOptions::from_config(&config))?;
        let counters = reader.counters();

        let encoder = ExampleEncoder::new(tokenizer);
        let encode_counters = Arc::clone(&counters);
        let examples = reader.filter_map(move |record| match record {
            Err(e) => Some(Err(e)),
            Ok(record) => match encoder.apply(record) {
                Ok(example) => Some(Ok(example)),
                Err(e) => {
                    encode_counters.record_malformed(&e);
                    None
                }
            },
        });
        Self::assemble(config, Box::new(examples), counters)
    }

    /// Builds a pipeline over already tokenized examples.
    ///
    /// `file_pattern` and the reader options of `config` are ignored.
    pub fn from_examples<I>(config: InputConfig, examples: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Example>>,
        I::IntoIter: Send + 'static,
    {
        config.validate()?;
        Self::assemble(
            config,
            Box::new(examples.into_iter()),
            Arc::new(ReaderCounters::default()),
        )
    }

    fn assemble(
        config: InputConfig,
        examples: ExampleStream,
        counters: Arc<ReaderCounters>,
    ) -> Result<Self> {
        let bounds = config.bucket_upper_bound.clone();
        let limits = config.bucket_batch_limit.clone();
        let policy = config.out_of_range_policy;

        let rows = if config.packed_input {
            let packer = Packer::new(examples, packer_config(&config));
            Rows::Packed(Bucketing::new(
                packer,
                BucketSelector::new(bounds, limits, policy)?,
                config.drop_remainder,
            ))
        } else {
            Rows::Unpacked(Bucketing::new(
                examples,
                BucketSelector::new(bounds, limits, policy)?,
                config.drop_remainder,
            ))
        };

        info!(
            packed = config.packed_input,
            pad_to_max = config.pad_to_max_seq_length,
            buckets = ?config.bucket_upper_bound,
            limits = ?config.bucket_batch_limit,
            sequential = config.require_sequential_order,
            "input pipeline ready"
        );

        Ok(Self {
            collator: PaddingCollator::from_config(&config),
            config,
            rows,
            counters,
            last_global_batch_size: 0,
            stats: PipelineStats::default(),
            finished: false,
        })
    }

    /// Pulls the next ready batch.
    ///
    /// Blocks on the reader until some bucket fills, or until end of stream
    /// releases the leftovers. Returns `Ok(None)` once everything is consumed.
    pub fn get_preprocessed_input_batch(&mut self) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        let pulled = self.pull();
        self.refresh_stats();
        match pulled {
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                self.finished = true;
                info!(stats = ?self.stats, "input pipeline exhausted");
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    /// Pulls the next batch and splits it into `num_splits` equal parts.
    pub fn split_input_batch(&mut self, num_splits: usize) -> Result<Option<Vec<Batch>>> {
        match self.get_preprocessed_input_batch()? {
            Some(batch) => Ok(Some(batch.split(num_splits)?)),
            None => Ok(None),
        }
    }

    /// Original examples in the most recent batch (not rows), `0` before the first pull.
    pub fn global_batch_size(&self) -> usize {
        self.last_global_batch_size
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    fn pull(&mut self) -> Result<Option<Batch>> {
        let batch = match &mut self.rows {
            Rows::Unpacked(stage) => match stage.next_group()? {
                Some(group) => Some(collate_group(&self.collator, group)?),
                None => None,
            },
            Rows::Packed(stage) => match stage.next_group()? {
                Some(group) => Some(collate_group(&self.collator, group)?),
                None => None,
            },
        };
        if let Some(batch) = &batch {
            self.last_global_batch_size = batch.num_examples();
            self.stats.batches += 1;
            self.stats.rows += batch.batch_size();
            self.stats.examples += batch.num_examples();
        }
        Ok(batch)
    }

    fn refresh_stats(&mut self) {
        self.stats.records_read = self.counters.records.load(Ordering::Relaxed);
        self.stats.malformed = self.counters.malformed.load(Ordering::Relaxed);
        self.stats.out_of_range = self.rows.out_of_range();
        self.stats.overlong = self.rows.dropped_overlong();
        self.stats.remainder_dropped = self.rows.remainder_dropped();
    }
}

fn collate_group<T>(collator: &PaddingCollator, group: BucketBatch<T>) -> Result<Batch>
where
    T: Bucketable,
    PaddingCollator: Collator<T>,
{
    let batch = collator
        .collate(&group.items[..])
        .with_context(|| format!("Failed to pad batch from bucket {}", group.bucket))?;
    debug!(
        bucket = group.bucket,
        rows = batch.batch_size(),
        examples = group.num_examples(),
        src_len = batch.src().ids.size().get(1).copied().unwrap_or(0),
        tgt_len = batch.tgt().ids.size().get(1).copied().unwrap_or(0),
        "emitting batch"
    );
    Ok(batch)
}

fn packer_config(config: &InputConfig) -> PackerConfig {
    let (source_capacity, target_capacity) = config.packing_capacity();
    PackerConfig {
        source_capacity,
        target_capacity,
        flush_every_n: config.flush_every_n,
        window: config.effective_packing_window(),
        overlong_policy: config.overlong_policy,
    }
}

impl Iterator for InputPipeline {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_preprocessed_input_batch().transpose()
    }
}
