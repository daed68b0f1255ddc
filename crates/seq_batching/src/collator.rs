use crate::batch::{Batch, SegmentFields, SourceFields, TargetFields};
use crate::error::InputError;
use crate::example::Example;
use crate::packing::PackedRow;
use crate::pipeline::InputConfig;
use anyhow::{bail, Result};
use tch::{kind::Element, Tensor};

/// A `Collator` defines how to pad and combine rows of type `T` into a [`Batch`].
pub trait Collator<T> {
    fn collate(&self, rows: &[T]) -> Result<Batch>;
}

//=======================================================================================================
/// Defines the padded length of one side of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingRule {
    /// Pad to the longest row in the batch.
    MaxLength,
    /// Pad every row to exactly this length. Never truncates.
    Fixed(usize),
}

impl PaddingRule {
    /// Resolves the padded length for a batch whose longest row is `observed`.
    pub fn resolve(&self, observed: usize, field: &'static str) -> Result<usize> {
        match *self {
            PaddingRule::MaxLength => Ok(observed),
            PaddingRule::Fixed(pad_length) if observed > pad_length => {
                bail!(InputError::PadLengthTooSmall {
                    field,
                    observed,
                    pad_length
                })
            }
            PaddingRule::Fixed(pad_length) => Ok(pad_length),
        }
    }
}

/// Right-pads each sequence with `pad` and stacks them into a `[rows, target_len]` tensor.
///
/// Fails if any sequence is longer than `target_len`.
pub fn pad_to_length<T>(seqs: &[&[T]], pad: T, target_len: usize) -> Result<Tensor>
where
    T: Element + Copy,
{
    let mut flat = Vec::with_capacity(seqs.len() * target_len);
    for (i, seq) in seqs.iter().enumerate() {
        if seq.len() > target_len {
            bail!(
                "Row {} has length {}, longer than the padded length {}",
                i,
                seq.len(),
                target_len
            );
        }
        flat.extend_from_slice(seq);
        flat.extend(std::iter::repeat(pad).take(target_len - seq.len()));
    }
    Ok(Tensor::from_slice(&flat).reshape(&[seqs.len() as i64, target_len as i64]))
}

/// Float mask with `0.0` over the first `len` positions of each row and `1.0` after.
fn paddings(lengths: &[usize], target_len: usize) -> Tensor {
    let mut flat = Vec::with_capacity(lengths.len() * target_len);
    for &len in lengths {
        flat.extend((0..target_len).map(|pos| if pos < len { 0.0f32 } else { 1.0 }));
    }
    Tensor::from_slice(&flat).reshape(&[lengths.len() as i64, target_len as i64])
}

fn max_len<'a, T: 'a>(seqs: impl IntoIterator<Item = &'a [T]>) -> usize {
    seqs.into_iter().map(<[T]>::len).max().unwrap_or(0)
}

/// A `Collator` that right-pads the source and target sides of a batch,
/// each according to its own [`PaddingRule`].
///
/// Ids, labels and segment fields pad with `0`, weights with `0.0`, and the
/// `paddings` mask is `1.0` exactly where a pad was inserted.
///
/// # Example
/// ```ignore
/// // bucket-relative padding
/// let collator = PaddingCollator::new(PaddingRule::MaxLength, PaddingRule::MaxLength);
/// let batch = collator.collate(&examples[..])?;
///
/// // every batch padded to the same shape
/// let collator = PaddingCollator::new(PaddingRule::Fixed(300), PaddingRule::Fixed(300));
/// ```
#[derive(Debug, Clone)]
pub struct PaddingCollator {
    source_rule: PaddingRule,
    target_rule: PaddingRule,
}

impl PaddingCollator {
    pub fn new(source_rule: PaddingRule, target_rule: PaddingRule) -> Self {
        Self {
            source_rule,
            target_rule,
        }
    }

    /// `Fixed(max length)` on both sides when `pad_to_max_seq_length` is set,
    /// `MaxLength` otherwise.
    pub fn from_config(config: &InputConfig) -> Self {
        if config.pad_to_max_seq_length {
            Self::new(
                PaddingRule::Fixed(config.source_max_length),
                PaddingRule::Fixed(config.target_max_length),
            )
        } else {
            Self::new(PaddingRule::MaxLength, PaddingRule::MaxLength)
        }
    }

    pub fn source_rule(&self) -> PaddingRule {
        self.source_rule
    }

    pub fn target_rule(&self) -> PaddingRule {
        self.target_rule
    }

    fn source_fields(
        &self,
        ids: &[&[i64]],
        strs: Vec<Vec<String>>,
        len: usize,
    ) -> Result<SourceFields> {
        let lengths: Vec<usize> = ids.iter().map(|s| s.len()).collect();
        Ok(SourceFields {
            ids: pad_to_length(ids, 0i64, len)?,
            paddings: paddings(&lengths, len),
            strs,
        })
    }

    fn target_fields(
        &self,
        ids: &[&[i64]],
        labels: &[&[i64]],
        weights: &[&[f32]],
        strs: Vec<Vec<String>>,
        len: usize,
    ) -> Result<TargetFields> {
        let lengths: Vec<usize> = ids.iter().map(|s| s.len()).collect();
        Ok(TargetFields {
            ids: pad_to_length(ids, 0i64, len)?,
            labels: pad_to_length(labels, 0i64, len)?,
            weights: pad_to_length(weights, 0.0f32, len)?,
            paddings: paddings(&lengths, len),
            strs,
        })
    }
}

/// Collate unpacked [`Example`]s: one example per row. An empty group yields
/// a zero-row batch.
impl Collator<Example> for PaddingCollator {
    fn collate(&self, rows: &[Example]) -> Result<Batch> {
        let src_ids: Vec<&[i64]> = rows.iter().map(|e| e.src_ids.as_slice()).collect();
        let tgt_ids: Vec<&[i64]> = rows.iter().map(|e| e.tgt_ids.as_slice()).collect();
        let tgt_labels: Vec<&[i64]> = rows.iter().map(|e| e.tgt_labels.as_slice()).collect();
        let tgt_weights: Vec<&[f32]> = rows.iter().map(|e| e.tgt_weights.as_slice()).collect();

        let src_len = self
            .source_rule
            .resolve(max_len(src_ids.iter().copied()), "src")?;
        let tgt_len = self
            .target_rule
            .resolve(max_len(tgt_ids.iter().copied()), "tgt")?;

        let src_strs = rows.iter().map(|e| vec![e.src_text.clone()]).collect();
        let tgt_strs = rows.iter().map(|e| vec![e.tgt_text.clone()]).collect();

        Ok(Batch::Unpacked {
            src: self.source_fields(&src_ids, src_strs, src_len)?,
            tgt: self.target_fields(&tgt_ids, &tgt_labels, &tgt_weights, tgt_strs, tgt_len)?,
        })
    }
}

/// Collate [`PackedRow`]s, carrying segment ids and positions alongside.
impl Collator<PackedRow> for PaddingCollator {
    fn collate(&self, rows: &[PackedRow]) -> Result<Batch> {
        let src_ids: Vec<&[i64]> = rows.iter().map(|r| r.src_ids.as_slice()).collect();
        let tgt_ids: Vec<&[i64]> = rows.iter().map(|r| r.tgt_ids.as_slice()).collect();
        let tgt_labels: Vec<&[i64]> = rows.iter().map(|r| r.tgt_labels.as_slice()).collect();
        let tgt_weights: Vec<&[f32]> = rows.iter().map(|r| r.tgt_weights.as_slice()).collect();

        let src_len = self
            .source_rule
            .resolve(max_len(src_ids.iter().copied()), "src")?;
        let tgt_len = self
            .target_rule
            .resolve(max_len(tgt_ids.iter().copied()), "tgt")?;

        let src_seg_ids: Vec<&[i64]> = rows.iter().map(|r| r.src_segment_ids.as_slice()).collect();
        let src_seg_pos: Vec<&[i64]> = rows.iter().map(|r| r.src_segment_pos.as_slice()).collect();
        let tgt_seg_ids: Vec<&[i64]> = rows.iter().map(|r| r.tgt_segment_ids.as_slice()).collect();
        let tgt_seg_pos: Vec<&[i64]> = rows.iter().map(|r| r.tgt_segment_pos.as_slice()).collect();

        let src_strs = rows.iter().map(|r| r.src_strs.clone()).collect();
        let tgt_strs = rows.iter().map(|r| r.tgt_strs.clone()).collect();

        Ok(Batch::Packed {
            src: self.source_fields(&src_ids, src_strs, src_len)?,
            tgt: self.target_fields(&tgt_ids, &tgt_labels, &tgt_weights, tgt_strs, tgt_len)?,
            src_segments: SegmentFields {
                segment_ids: pad_to_length(&src_seg_ids, 0i64, src_len)?,
                segment_pos: pad_to_length(&src_seg_pos, 0i64, src_len)?,
            },
            tgt_segments: SegmentFields {
                segment_ids: pad_to_length(&tgt_seg_ids, 0i64, tgt_len)?,
                segment_pos: pad_to_length(&tgt_seg_pos, 0i64, tgt_len)?,
            },
            examples_per_row: rows.iter().map(|r| r.num_examples).collect(),
        })
    }
}
