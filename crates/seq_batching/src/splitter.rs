//! Splitting one batch into equal sub-batches for parallel consumers.
//!
//! Row `i` of sub-batch `k` is row `k * chunk + i` of the original batch, for
//! every field in both namespaces. The `src` and `tgt` rows of an example
//! therefore always land in the same sub-batch at the same index, and
//! [`concat`] of the splits reproduces the input exactly.

use crate::batch::{Batch, SegmentFields, Side, SourceFields, TargetFields};
use crate::error::InputError;
use anyhow::{bail, ensure, Result};
use tch::Tensor;

/// Partitions `batch` into `num_splits` contiguous, equally sized sub-batches.
///
/// # Errors
/// - `num_splits == 0`
/// - [`InputError::SplitNotDivisible`] if the batch size is not a multiple of `num_splits`
pub fn split(batch: &Batch, num_splits: usize) -> Result<Vec<Batch>> {
    ensure!(num_splits > 0, InputError::InvalidConfig("num_splits must be >= 1".into()));
    let batch_size = batch.batch_size();
    if batch_size % num_splits != 0 {
        bail!(InputError::SplitNotDivisible {
            batch_size,
            num_splits
        });
    }

    let chunk = batch_size / num_splits;
    let splits = (0..num_splits)
        .map(|k| {
            let start = k * chunk;
            batch.map_tensors(
                |t| t.narrow(0, start as i64, chunk as i64),
                start..start + chunk,
            )
        })
        .collect();
    Ok(splits)
}

/// Concatenates batches along dim 0, the inverse of [`split`].
///
/// All inputs must be of the same variant and agree on every field width.
pub fn concat(batches: &[Batch]) -> Result<Batch> {
    let Some(first) = batches.first() else {
        bail!("Cannot concatenate an empty list of batches");
    };

    for (i, batch) in batches.iter().enumerate().skip(1) {
        ensure!(
            batch.is_packed() == first.is_packed(),
            "Batch #{} mixes packed and unpacked layouts",
            i
        );
        for ((key, a), (_, b)) in first.fields().into_iter().zip(batch.fields()) {
            ensure!(
                a.size()[1..] == b.size()[1..],
                "Batch #{} field '{}' has shape {:?}, expected trailing dims of {:?}",
                i,
                key,
                b.size(),
                a.size()
            );
        }
    }

    let src = SourceFields {
        ids: cat_field(batches, |b| &b.src().ids),
        paddings: cat_field(batches, |b| &b.src().paddings),
        strs: batches.iter().flat_map(|b| b.src().strs.clone()).collect(),
    };
    let tgt = TargetFields {
        ids: cat_field(batches, |b| &b.tgt().ids),
        labels: cat_field(batches, |b| &b.tgt().labels),
        weights: cat_field(batches, |b| &b.tgt().weights),
        paddings: cat_field(batches, |b| &b.tgt().paddings),
        strs: batches.iter().flat_map(|b| b.tgt().strs.clone()).collect(),
    };

    if !first.is_packed() {
        return Ok(Batch::Unpacked { src, tgt });
    }

    let segments = |side: Side| -> Result<SegmentFields> {
        let mut ids = Vec::with_capacity(batches.len());
        let mut pos = Vec::with_capacity(batches.len());
        for batch in batches {
            // Variant agreement was checked above.
            let Some(seg) = batch.segments(side) else {
                bail!("Packed batch is missing segment fields");
            };
            ids.push(&seg.segment_ids);
            pos.push(&seg.segment_pos);
        }
        Ok(SegmentFields {
            segment_ids: Tensor::cat(&ids, 0),
            segment_pos: Tensor::cat(&pos, 0),
        })
    };

    Ok(Batch::Packed {
        src,
        tgt,
        src_segments: segments(Side::Source)?,
        tgt_segments: segments(Side::Target)?,
        examples_per_row: batches.iter().flat_map(|b| b.examples_per_row()).collect(),
    })
}

fn cat_field(batches: &[Batch], pick: fn(&Batch) -> &Tensor) -> Tensor {
    let parts: Vec<&Tensor> = batches.iter().map(pick).collect();
    Tensor::cat(&parts, 0)
}

#[cfg(test)]
mod splitter_tests {
    use super::*;
    use crate::collator::{Collator, PaddingCollator, PaddingRule};
    use crate::example::Example;
    use crate::packing::{Packer, PackerConfig};

    fn examples(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| {
                let len = 1 + i % 4;
                let src: Vec<i64> = (0..len as i64).map(|t| 10 * i as i64 + t + 3).collect();
                let tgt: Vec<i64> = (0..(len + 1) as i64).map(|t| 100 + t).collect();
                Example::from_tokens(&src, &tgt, 1, 2)
                    .with_text(format!("s{}", i), format!("t{}", i))
            })
            .collect()
    }

    fn unpacked_batch(n: usize) -> Result<Batch> {
        let collator = PaddingCollator::new(PaddingRule::MaxLength, PaddingRule::MaxLength);
        collator.collate(&examples(n)[..])
    }

    #[test]
    fn test_split_rows_and_shapes() -> Result<()> {
        let batch = unpacked_batch(6)?;
        let splits = split(&batch, 3)?;
        assert_eq!(splits.len(), 3);

        for (k, sub) in splits.iter().enumerate() {
            assert_eq!(sub.batch_size(), 2);
            for ((key, full), (_, part)) in batch.fields().into_iter().zip(sub.fields()) {
                assert_eq!(part.size()[1..], full.size()[1..], "{}", key);
                assert!(part.equal(&full.narrow(0, 2 * k as i64, 2)), "{}", key);
            }
            assert_eq!(sub.src().strs, batch.src().strs[2 * k..2 * k + 2].to_vec());
            assert_eq!(sub.tgt().strs[0], vec![format!("t{}", 2 * k)]);
        }
        Ok(())
    }

    #[test]
    fn test_split_concat_roundtrip() -> Result<()> {
        let batch = unpacked_batch(8)?;
        for d in [1, 2, 4, 8] {
            let rebuilt = concat(&split(&batch, d)?)?;
            for ((key, a), (_, b)) in batch.fields().into_iter().zip(rebuilt.fields()) {
                assert!(a.equal(b), "split({}) roundtrip differs on {}", d, key);
            }
            assert_eq!(rebuilt.src().strs, batch.src().strs);
            assert_eq!(rebuilt.tgt().strs, batch.tgt().strs);
        }
        Ok(())
    }

    #[test]
    fn test_split_not_divisible() -> Result<()> {
        let batch = unpacked_batch(6)?;
        let err = split(&batch, 4).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::SplitNotDivisible {
                batch_size: 6,
                num_splits: 4
            })
        );
        assert!(split(&batch, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_split_packed_keeps_example_counts() -> Result<()> {
        let config = PackerConfig {
            source_capacity: 8,
            target_capacity: 8,
            ..PackerConfig::default()
        };
        let rows: Vec<_> = Packer::new(examples(12).into_iter().map(Ok), config)
            .collect::<Result<_>>()?;
        let rows = &rows[..4];
        let batch =
            PaddingCollator::new(PaddingRule::Fixed(8), PaddingRule::Fixed(8)).collate(rows)?;

        let splits = batch.split(2)?;
        let total: usize = splits.iter().map(Batch::num_examples).sum();
        assert_eq!(total, batch.num_examples());
        assert_eq!(splits[1].examples_per_row(), batch.examples_per_row()[2..].to_vec());

        let rebuilt = concat(&splits)?;
        assert!(rebuilt.is_packed());
        for ((key, a), (_, b)) in batch.fields().into_iter().zip(rebuilt.fields()) {
            assert!(a.equal(b), "{}", key);
        }
        Ok(())
    }

    #[test]
    fn test_concat_rejects_mismatched_widths() -> Result<()> {
        let narrow = unpacked_batch(1)?;
        let wide = unpacked_batch(4)?;
        assert!(concat(&[narrow, wide]).is_err());
        assert!(concat(&[]).is_err());
        Ok(())
    }
}
