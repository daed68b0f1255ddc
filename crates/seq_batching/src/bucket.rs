//! Length bucketing.
//!
//! A [`BucketSelector`] routes each item to the first bucket whose upper bound
//! is at least the item's length, buffers it there, and hands back a complete
//! [`BucketBatch`] as soon as that bucket reaches its batch limit:
//!
//! ```text
//! upper bounds   [ 20,  40, 100]
//! batch limits   [  8,   4,   2]
//!
//! len 13  -> bucket 0
//! len 20  -> bucket 0      (bounds are inclusive)
//! len 21  -> bucket 1
//! len 101 -> out of range  (dropped and counted, or an error under `Fail`)
//! ```
//!
//! Routing only looks at the true length of an item. How the emitted batch is
//! padded is decided later by the collator.

use crate::error::InputError;
use crate::packing::OverflowPolicy;
use anyhow::{bail, Result};
use tracing::warn;

/// Anything the selector can route by length.
pub trait Bucketable {
    /// Length used for routing.
    fn bucket_key(&self) -> usize;

    /// Number of original examples this item stands for.
    fn num_examples(&self) -> usize {
        1
    }
}

/// A full (or end-of-stream partial) group of items from one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketBatch<T> {
    pub bucket: usize,
    pub items: Vec<T>,
}

impl<T: Bucketable> BucketBatch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of [`Bucketable::num_examples`] over the items.
    pub fn num_examples(&self) -> usize {
        self.items.iter().map(Bucketable::num_examples).sum()
    }
}

/// Checks a bucket configuration: equal non-empty lists, strictly ascending
/// bounds and positive limits.
pub fn validate_buckets(upper_bounds: &[usize], batch_limits: &[usize]) -> Result<()> {
    if upper_bounds.is_empty() {
        bail!(InputError::BucketConfig(
            "bucket_upper_bound must not be empty".into()
        ));
    }
    if upper_bounds.len() != batch_limits.len() {
        bail!(InputError::BucketConfig(format!(
            "bucket_upper_bound has {} entries but bucket_batch_limit has {}",
            upper_bounds.len(),
            batch_limits.len()
        )));
    }
    if let Some(w) = upper_bounds.windows(2).find(|w| w[0] >= w[1]) {
        bail!(InputError::BucketConfig(format!(
            "bucket_upper_bound must be strictly ascending, found {} followed by {}",
            w[0], w[1]
        )));
    }
    if let Some(i) = batch_limits.iter().position(|&l| l == 0) {
        bail!(InputError::BucketConfig(format!(
            "bucket_batch_limit[{}] must be positive",
            i
        )));
    }
    Ok(())
}

/// Accumulates items into per-bucket buffers.
#[derive(Debug)]
pub struct BucketSelector<T> {
    upper_bounds: Vec<usize>,
    batch_limits: Vec<usize>,
    policy: OverflowPolicy,
    buffers: Vec<Vec<T>>,
    out_of_range: usize,
}

impl<T: Bucketable> BucketSelector<T> {
    pub fn new(
        upper_bounds: Vec<usize>,
        batch_limits: Vec<usize>,
        policy: OverflowPolicy,
    ) -> Result<Self> {
        validate_buckets(&upper_bounds, &batch_limits)?;
        let buffers = batch_limits
            .iter()
            .map(|&limit| Vec::with_capacity(limit))
            .collect();
        Ok(Self {
            upper_bounds,
            batch_limits,
            policy,
            buffers,
            out_of_range: 0,
        })
    }

    /// Index of the first bucket with `length <= upper_bound`, `None` if out of range.
    pub fn assign(&self, length: usize) -> Option<usize> {
        let idx = self.upper_bounds.partition_point(|&bound| bound < length);
        (idx < self.upper_bounds.len()).then_some(idx)
    }

    /// Buffers `item` and returns the bucket's batch if this filled it.
    ///
    /// Out-of-range items are counted and dropped, or rejected with
    /// [`InputError::OutOfRange`] under [`OverflowPolicy::Fail`].
    pub fn push(&mut self, item: T) -> Result<Option<BucketBatch<T>>> {
        let length = item.bucket_key();
        let Some(bucket) = self.assign(length) else {
            let largest_bound = self.upper_bounds.last().copied().unwrap_or(0);
            if self.policy == OverflowPolicy::Fail {
                bail!(InputError::OutOfRange {
                    length,
                    largest_bound
                });
            }
            self.out_of_range += item.num_examples();
            warn!(
                length,
                largest_bound,
                examples = item.num_examples(),
                dropped = self.out_of_range,
                "dropping item longer than every bucket bound"
            );
            return Ok(None);
        };

        let buffer = &mut self.buffers[bucket];
        buffer.push(item);
        if buffer.len() < self.batch_limits[bucket] {
            return Ok(None);
        }
        let items = std::mem::replace(buffer, Vec::with_capacity(self.batch_limits[bucket]));
        Ok(Some(BucketBatch { bucket, items }))
    }

    /// Empties every non-empty buffer, in ascending bucket order.
    pub fn drain(&mut self) -> Vec<BucketBatch<T>> {
        self.buffers
            .iter_mut()
            .enumerate()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(bucket, buffer)| BucketBatch {
                bucket,
                items: std::mem::take(buffer),
            })
            .collect()
    }

    /// Original examples dropped as out of range so far.
    pub fn out_of_range(&self) -> usize {
        self.out_of_range
    }

    /// Items currently buffered across all buckets.
    pub fn pending(&self) -> usize {
        self.buffers.iter().map(Vec::len).sum()
    }

    pub fn num_buckets(&self) -> usize {
        self.upper_bounds.len()
    }

    pub fn upper_bounds(&self) -> &[usize] {
        &self.upper_bounds
    }

    pub fn batch_limits(&self) -> &[usize] {
        &self.batch_limits
    }
}
