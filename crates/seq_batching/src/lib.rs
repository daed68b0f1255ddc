pub mod batch;
pub mod bucket;
pub mod collator;
pub mod dataset;
pub mod error;
pub mod example;
pub mod packing;
pub mod pipeline;
pub mod readers;
pub mod splitter;
pub mod tokenizer;
pub mod transform;

pub use batch::{Batch, SegmentFields, Side, SourceFields, TargetFields};
pub use bucket::{BucketBatch, BucketSelector, Bucketable};
pub use collator::{pad_to_length, Collator, PaddingCollator, PaddingRule};
pub use error::InputError;
pub use example::Example;
pub use packing::{OverflowPolicy, PackedRow, Packer, PackerConfig, PackingStats};
pub use pipeline::{InputConfig, InputConfigBuilder, InputPipeline, PipelineStats};
pub use readers::{FilePattern, RawRecord, RecordFormat};
pub use splitter::{concat, split};
pub use tokenizer::{AsciiTokenizer, HfTokenizer, SpecialIds, Tokenizer};
