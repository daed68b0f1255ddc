use thiserror::Error;

/// Typed failures raised by the input pipeline.
///
/// Every public operation returns `anyhow::Result`; these variants ride inside
/// the `anyhow::Error` so callers can tell configuration mistakes apart with
/// `err.downcast_ref::<InputError>()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Bucket bounds and limits are inconsistent.
    #[error("invalid bucket configuration: {0}")]
    BucketConfig(String),

    /// An example cannot fit into an empty packed row.
    #[error(
        "example of length (src={source_len}, tgt={target_len}) exceeds packing capacity \
         (src={source_capacity}, tgt={target_capacity})"
    )]
    ExampleTooLong {
        source_len: usize,
        target_len: usize,
        source_capacity: usize,
        target_capacity: usize,
    },

    /// The batch dimension is not a multiple of the requested split count.
    #[error("batch size {batch_size} is not divisible by num_splits={num_splits}")]
    SplitNotDivisible { batch_size: usize, num_splits: usize },

    /// A fixed pad length is shorter than a sequence it has to hold.
    #[error("field '{field}': observed length {observed} exceeds fixed pad length {pad_length}")]
    PadLengthTooSmall {
        field: &'static str,
        observed: usize,
        pad_length: usize,
    },

    /// An example is longer than the last bucket bound and the policy is `Fail`.
    #[error("example length {length} exceeds the largest bucket bound {largest_bound}")]
    OutOfRange { length: usize, largest_bound: usize },

    /// A file pattern is not of the form `<format>:<path>[,<path>...]`.
    #[error("invalid file pattern '{0}'")]
    InvalidFilePattern(String),

    /// The format tag of a file pattern is not recognised.
    #[error("unknown record format '{0}' (expected one of: jsonl, text)")]
    UnknownFormat(String),

    /// Any other rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
