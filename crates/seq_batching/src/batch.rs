use anyhow::{anyhow, bail, ensure, Result};
use std::collections::BTreeMap;
use std::ops::Range;
use tch::{Device, Tensor};

/// Which half of a sequence-to-sequence batch a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

/// `src` namespace: `[batch, src_len]` tensors.
#[derive(Debug)]
pub struct SourceFields {
    /// Int64 token ids, `0` at pad positions.
    pub ids: Tensor,
    /// Float, `1.0` at pad positions and `0.0` at real ones.
    pub paddings: Tensor,
    /// Raw source strings per row, one per example in the row. Empty strings
    /// for examples that were read as ids.
    pub strs: Vec<Vec<String>>,
}

/// `tgt` namespace: `[batch, tgt_len]` tensors.
#[derive(Debug)]
pub struct TargetFields {
    pub ids: Tensor,
    /// Int64 next-token labels, `0` at pad positions.
    pub labels: Tensor,
    /// Float loss weights, `0.0` at pad positions.
    pub weights: Tensor,
    pub paddings: Tensor,
    /// Raw target strings per row, laid out like [`SourceFields::strs`].
    pub strs: Vec<Vec<String>>,
}

/// Per-token provenance inside packed rows.
#[derive(Debug)]
pub struct SegmentFields {
    /// Int64, `k` for the k-th example of the row (1-based), `0` at padding.
    pub segment_ids: Tensor,
    /// Int64 offset of the token within its own example, `0` at padding.
    pub segment_pos: Tensor,
}

/// A padded minibatch ready for the model.
///
/// The two variants carry different field sets: only packed batches have
/// `segment_ids`/`segment_pos`. Within a namespace every tensor shares the same
/// `[batch_size, length]` shape.
#[derive(Debug)]
pub enum Batch {
    Unpacked {
        src: SourceFields,
        tgt: TargetFields,
    },
    Packed {
        src: SourceFields,
        tgt: TargetFields,
        src_segments: SegmentFields,
        tgt_segments: SegmentFields,
        /// Number of original examples in each row.
        examples_per_row: Vec<usize>,
    },
}

impl Batch {
    pub fn src(&self) -> &SourceFields {
        match self {
            Batch::Unpacked { src, .. } | Batch::Packed { src, .. } => src,
        }
    }

    pub fn tgt(&self) -> &TargetFields {
        match self {
            Batch::Unpacked { tgt, .. } | Batch::Packed { tgt, .. } => tgt,
        }
    }

    /// Segment fields for one side, `None` for unpacked batches.
    pub fn segments(&self, side: Side) -> Option<&SegmentFields> {
        match self {
            Batch::Unpacked { .. } => None,
            Batch::Packed {
                src_segments,
                tgt_segments,
                ..
            } => Some(match side {
                Side::Source => src_segments,
                Side::Target => tgt_segments,
            }),
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, Batch::Packed { .. })
    }

    /// Number of rows along the batch dimension.
    pub fn batch_size(&self) -> usize {
        self.src().ids.size().first().copied().unwrap_or(0) as usize
    }

    /// Number of original examples in the batch. Equals `batch_size` unless packed.
    pub fn num_examples(&self) -> usize {
        match self {
            Batch::Unpacked { .. } => self.batch_size(),
            Batch::Packed {
                examples_per_row, ..
            } => examples_per_row.iter().sum(),
        }
    }

    pub fn examples_per_row(&self) -> Vec<usize> {
        match self {
            Batch::Unpacked { .. } => vec![1; self.batch_size()],
            Batch::Packed {
                examples_per_row, ..
            } => examples_per_row.clone(),
        }
    }

    /// All fields as `(key, tensor)` pairs in a fixed order, keys are
    /// `"<namespace>.<field>"` (e.g. `"tgt.labels"`).
    pub fn fields(&self) -> Vec<(&'static str, &Tensor)> {
        let src = self.src();
        let tgt = self.tgt();
        let mut fields = vec![("src.ids", &src.ids), ("src.paddings", &src.paddings)];
        if let Some(seg) = self.segments(Side::Source) {
            fields.push(("src.segment_ids", &seg.segment_ids));
            fields.push(("src.segment_pos", &seg.segment_pos));
        }
        fields.extend([
            ("tgt.ids", &tgt.ids),
            ("tgt.labels", &tgt.labels),
            ("tgt.weights", &tgt.weights),
            ("tgt.paddings", &tgt.paddings),
        ]);
        if let Some(seg) = self.segments(Side::Target) {
            fields.push(("tgt.segment_ids", &seg.segment_ids));
            fields.push(("tgt.segment_pos", &seg.segment_pos));
        }
        fields
    }

    /// Returns the tensor stored under a flattened key such as `"src.ids"`.
    pub fn get(&self, key: &str) -> Result<&Tensor> {
        self.fields()
            .into_iter()
            .find(|(name, _)| *name == key)
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| anyhow!("Field '{}' not found in batch", key))
    }

    /// Builds a new batch from `rows`, applying `f` to every tensor.
    ///
    /// `f` is expected to select the same rows along dim 0.
    pub(crate) fn map_tensors<F>(&self, f: F, rows: Range<usize>) -> Batch
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let src = SourceFields {
            ids: f(&self.src().ids),
            paddings: f(&self.src().paddings),
            strs: self.src().strs[rows.clone()].to_vec(),
        };
        let tgt = TargetFields {
            ids: f(&self.tgt().ids),
            labels: f(&self.tgt().labels),
            weights: f(&self.tgt().weights),
            paddings: f(&self.tgt().paddings),
            strs: self.tgt().strs[rows.clone()].to_vec(),
        };
        match self {
            Batch::Unpacked { .. } => Batch::Unpacked { src, tgt },
            Batch::Packed {
                src_segments,
                tgt_segments,
                examples_per_row,
                ..
            } => Batch::Packed {
                src,
                tgt,
                src_segments: SegmentFields {
                    segment_ids: f(&src_segments.segment_ids),
                    segment_pos: f(&src_segments.segment_pos),
                },
                tgt_segments: SegmentFields {
                    segment_ids: f(&tgt_segments.segment_ids),
                    segment_pos: f(&tgt_segments.segment_pos),
                },
                examples_per_row: examples_per_row[rows].to_vec(),
            },
        }
    }

    /// Transfers all tensors to the target device (CPU/GPU).
    pub fn to_device(&self, device: Device) -> Self {
        self.map_tensors(|t| t.to_device(device), 0..self.batch_size())
    }

    /// Splits the batch into `num_splits` equal sub-batches along dim 0.
    ///
    /// See [`crate::splitter::split`].
    pub fn split(&self, num_splits: usize) -> Result<Vec<Batch>> {
        crate::splitter::split(self, num_splits)
    }

    /// Concatenates batches along dim 0. See [`crate::splitter::concat`].
    pub fn concat(batches: &[Batch]) -> Result<Batch> {
        crate::splitter::concat(batches)
    }

    /// Recovers the original token sequences packed into `row`.
    ///
    /// Returns one `Vec` per segment id in ascending order, built from the
    /// `ids` field of the requested side.
    pub fn packed_sequences(&self, side: Side, row: usize) -> Result<Vec<Vec<i64>>> {
        let segments = self
            .segments(side)
            .ok_or_else(|| anyhow!("Batch is not packed"))?;
        ensure!(
            row < self.batch_size(),
            "Row {} out of range for batch of size {}",
            row,
            self.batch_size()
        );
        let ids_field = match side {
            Side::Source => &self.src().ids,
            Side::Target => &self.tgt().ids,
        };
        let ids = Vec::<i64>::try_from(ids_field.get(row as i64))?;
        let segment_ids = Vec::<i64>::try_from(segments.segment_ids.get(row as i64))?;

        let mut spans: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for (token, segment) in ids.into_iter().zip(segment_ids) {
            match segment {
                0 => {}
                s if s > 0 => spans.entry(s).or_default().push(token),
                s => bail!("Negative segment id {} in row {}", s, row),
            }
        }
        Ok(spans.into_values().collect())
    }
}
