//! The bucketing stage between the example stream and the collator.
//!
//! [`Bucketing`] pulls items from its input until some bucket fills up, then
//! hands that bucket's group out. At end of input the leftover partial groups
//! follow in ascending bucket order, unless the remainder is dropped.

use crate::bucket::{BucketBatch, BucketSelector, Bucketable};
use crate::example::Example;
use crate::packing::{PackedRow, Packer};
use anyhow::Result;
use std::collections::VecDeque;
use tracing::info;

pub(crate) type ExampleStream = Box<dyn Iterator<Item = Result<Example>> + Send>;

pub(crate) struct Bucketing<T, I> {
    input: I,
    selector: BucketSelector<T>,
    leftovers: VecDeque<BucketBatch<T>>,
    drop_remainder: bool,
    exhausted: bool,
    remainder_dropped: usize,
}

impl<T, I> Bucketing<T, I>
where
    T: Bucketable,
    I: Iterator<Item = Result<T>>,
{
    pub(crate) fn new(input: I, selector: BucketSelector<T>, drop_remainder: bool) -> Self {
        Self {
            input,
            selector,
            leftovers: VecDeque::new(),
            drop_remainder,
            exhausted: false,
            remainder_dropped: 0,
        }
    }

    /// Next complete group, `Ok(None)` once input and leftovers are exhausted.
    pub(crate) fn next_group(&mut self) -> Result<Option<BucketBatch<T>>> {
        loop {
            if let Some(group) = self.leftovers.pop_front() {
                return Ok(Some(group));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.input.next() {
                Some(item) => {
                    if let Some(group) = self.selector.push(item?)? {
                        return Ok(Some(group));
                    }
                }
                None => {
                    self.exhausted = true;
                    let remainder = self.selector.drain();
                    if self.drop_remainder {
                        self.remainder_dropped = remainder.iter().map(BucketBatch::len).sum();
                        if self.remainder_dropped > 0 {
                            info!(
                                rows = self.remainder_dropped,
                                "dropping partial bucket batches at end of stream"
                            );
                        }
                    } else {
                        self.leftovers.extend(remainder);
                    }
                }
            }
        }
    }

    pub(crate) fn input(&self) -> &I {
        &self.input
    }

    pub(crate) fn selector(&self) -> &BucketSelector<T> {
        &self.selector
    }

    /// Rows discarded with the end-of-stream remainder.
    pub(crate) fn remainder_dropped(&self) -> usize {
        self.remainder_dropped
    }
}

/// The bucketing stage for either row type.
pub(crate) enum Rows {
    Unpacked(Bucketing<Example, ExampleStream>),
    Packed(Bucketing<PackedRow, Packer<ExampleStream>>),
}

impl Rows {
    pub(crate) fn out_of_range(&self) -> usize {
        match self {
            Rows::Unpacked(b) => b.selector().out_of_range(),
            Rows::Packed(b) => b.selector().out_of_range(),
        }
    }

    pub(crate) fn remainder_dropped(&self) -> usize {
        match self {
            Rows::Unpacked(b) => b.remainder_dropped(),
            Rows::Packed(b) => b.remainder_dropped(),
        }
    }

    pub(crate) fn dropped_overlong(&self) -> usize {
        match self {
            Rows::Unpacked(_) => 0,
            Rows::Packed(b) => b.input().stats().dropped_overlong,
        }
    }
}

#[cfg(test)]
mod bucketing_tests {
    use super::*;
    use crate::packing::OverflowPolicy;

    fn examples(lengths: &[usize]) -> impl Iterator<Item = Result<Example>> {
        lengths
            .iter()
            .map(|&len| Ok(Example::from_tokens(&vec![7; len - 1], &[8], 1, 2)))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn selector() -> Result<BucketSelector<Example>> {
        BucketSelector::new(vec![4, 8], vec![2, 2], OverflowPolicy::Drop)
    }

    #[test]
    fn test_groups_then_leftovers() -> Result<()> {
        let mut stage = Bucketing::new(examples(&[2, 6, 3, 7, 5, 1]), selector()?, false);
        let mut groups = Vec::new();
        while let Some(group) = stage.next_group()? {
            groups.push((group.bucket, group.items.iter().map(Example::src_len).collect::<Vec<_>>()));
        }
        assert_eq!(
            groups,
            vec![(0, vec![2, 3]), (1, vec![6, 7]), (0, vec![1]), (1, vec![5])]
        );
        assert_eq!(stage.remainder_dropped(), 0);
        Ok(())
    }

    #[test]
    fn test_drop_remainder() -> Result<()> {
        let mut stage = Bucketing::new(examples(&[2, 6, 3, 1]), selector()?, true);
        assert_eq!(stage.next_group()?.map(|g| g.bucket), Some(0));
        assert!(stage.next_group()?.is_none());
        assert!(stage.next_group()?.is_none());
        assert_eq!(stage.remainder_dropped(), 2);
        Ok(())
    }

    #[test]
    fn test_input_error_surfaces() -> Result<()> {
        let input = vec![Err::<Example, _>(anyhow::anyhow!("file vanished"))].into_iter();
        let mut stage = Bucketing::new(input, selector()?, false);
        assert!(stage.next_group().is_err());
        Ok(())
    }
}
