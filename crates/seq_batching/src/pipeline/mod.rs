//! src/pipeline/mod.rs
//!
//! This module implements the `InputPipeline`.
//!
//! The `InputPipeline` coordinates the record reader, the tokenizer, the `Packer`,
//! the `BucketSelector` and the `PaddingCollator` to turn files of source/target
//! pairs into model-ready batches.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────┐
//!                  │ RecordReader │ ("<format>:<paths>", passes, shuffling, threads)
//!                  └──────┬───────┘
//!                         │ RawRecord
//!                         ↓
//!                  ┌──────────────┐
//!                  │ExampleEncoder│ (Tokenizer: text → ids, <s>/</s> layout)
//!                  └──────┬───────┘
//!                         │ Example
//!                         ↓
//!                    ┌─────────┐
//!                    │ Packer  │ (only when packed_input)
//!                    └────┬────┘
//!                         │ Example | PackedRow
//!                         ↓
//!                 ┌────────────────┐
//!                 │ BucketSelector │ ←───── bucket_upper_bound / bucket_batch_limit
//!                 └───────┬────────┘
//!                         │ one full bucket
//!                         ↓
//!                ┌─────────────────┐
//!                │ PaddingCollator │ (bucket max or fixed max length)
//!                └────────┬────────┘
//!                         ↓
//!                     ┌───────┐
//!                     │ Batch │ ──► split_input_batch(n)
//!                     └───────┘
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/pipeline/
//! ├── mod.rs        # Public API exports + module-level architecture docs
//! ├── config.rs     # InputConfig, builder, JSON loading and validation
//! ├── loader.rs     # InputPipeline constructors, pull API and stats
//! └── iterator.rs   # Bucketing stage shared by packed and unpacked rows
//! ```
//!
//! # Ordering
//! With `require_sequential_order` the whole pipeline is a deterministic function
//! of the sorted input files: one reader, no shuffling, and the packer closes a
//! row as soon as the next example does not fit. Without it, file order and a
//! record shuffle buffer are driven by `file_random_seed`, reads may run on
//! `file_parallelism` threads, and the packer fills up to `packing_window` open
//! rows first-fit. A single reader with a fixed seed is still reproducible;
//! several reader threads are not.
//!
//! # Example Usage
//! ```ignore
//! let config = InputConfig::builder()
//!     .file_pattern("jsonl:/data/train-*.jsonl")
//!     .bucket_upper_bound(vec![20, 240])
//!     .bucket_batch_limit(vec![4, 4])
//!     .packed_input(true)
//!     .pad_to_max_seq_length(true)
//!     .build();
//!
//! let mut pipeline = InputPipeline::new(config, Arc::new(AsciiTokenizer::new()))?;
//! while let Some(shards) = pipeline.split_input_batch(2)? {
//!     // one shard per device
//! }
//! ```

mod config;
mod iterator;
mod loader;

pub use config::{InputConfig, InputConfigBuilder};
pub use loader::{InputPipeline, PipelineStats};
