use crate::bucket::Bucketable;
use anyhow::{ensure, Result};

/// The `Example` struct represents one tokenized source/target pair.
///
/// The target is laid out for teacher forcing: given the full target sequence
/// `[<s>, t1, .., tn, </s>]`,
/// - `tgt_ids` holds everything but the last token: `[<s>, t1, .., tn]`
/// - `tgt_labels` holds everything but the first token: `[t1, .., tn, </s>]`
///
/// so `tgt_ids` and `tgt_labels` always have the same length. `tgt_weights`
/// runs parallel to both and defaults to `1.0` at every position.
///
/// `src_text`/`tgt_text` keep the untokenized strings when the example came
/// from text, and are empty otherwise.
///
/// # Examples
/// ```ignore
/// // "hi" -> "salut" with <s>=1 and </s>=2
/// let ex = Example::from_tokens(&[12, 13], &[23, 5, 16, 25, 24], 1, 2);
/// assert_eq!(ex.src_ids, vec![12, 13, 2]);
/// assert_eq!(ex.tgt_ids, vec![1, 23, 5, 16, 25, 24]);
/// assert_eq!(ex.tgt_labels, vec![23, 5, 16, 25, 24, 2]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub src_ids: Vec<i64>,
    pub tgt_ids: Vec<i64>,
    pub tgt_labels: Vec<i64>,
    pub tgt_weights: Vec<f32>,
    pub src_text: String,
    pub tgt_text: String,
}

impl Example {
    /// Creates an `Example` from already laid-out id sequences.
    ///
    /// Fails if `tgt_labels` and `tgt_ids` differ in length.
    pub fn new(src_ids: Vec<i64>, tgt_ids: Vec<i64>, tgt_labels: Vec<i64>) -> Result<Self> {
        ensure!(
            tgt_ids.len() == tgt_labels.len(),
            "Target ids and labels must have equal length, got ids={} labels={}",
            tgt_ids.len(),
            tgt_labels.len()
        );
        let tgt_weights = vec![1.0; tgt_ids.len()];
        Ok(Self {
            src_ids,
            tgt_ids,
            tgt_labels,
            tgt_weights,
            src_text: String::new(),
            tgt_text: String::new(),
        })
    }

    /// Builds an `Example` from bare token lists, appending `</s>` to the
    /// source and shifting the target around `<s>`/`</s>`.
    pub fn from_tokens(src_tokens: &[i64], tgt_tokens: &[i64], sos_id: i64, eos_id: i64) -> Self {
        let mut src_ids = Vec::with_capacity(src_tokens.len() + 1);
        src_ids.extend_from_slice(src_tokens);
        src_ids.push(eos_id);

        let mut tgt_ids = Vec::with_capacity(tgt_tokens.len() + 1);
        tgt_ids.push(sos_id);
        tgt_ids.extend_from_slice(tgt_tokens);

        let mut tgt_labels = Vec::with_capacity(tgt_tokens.len() + 1);
        tgt_labels.extend_from_slice(tgt_tokens);
        tgt_labels.push(eos_id);

        let tgt_weights = vec![1.0; tgt_ids.len()];
        Self {
            src_ids,
            tgt_ids,
            tgt_labels,
            tgt_weights,
            src_text: String::new(),
            tgt_text: String::new(),
        }
    }

    /// Attaches the raw source and target strings.
    pub fn with_text(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.src_text = source.into();
        self.tgt_text = target.into();
        self
    }

    /// Replaces the per-position target weights.
    pub fn with_weights(mut self, tgt_weights: Vec<f32>) -> Result<Self> {
        ensure!(
            tgt_weights.len() == self.tgt_ids.len(),
            "Target weights length {} does not match target length {}",
            tgt_weights.len(),
            self.tgt_ids.len()
        );
        self.tgt_weights = tgt_weights;
        Ok(self)
    }

    pub fn src_len(&self) -> usize {
        self.src_ids.len()
    }

    pub fn tgt_len(&self) -> usize {
        self.tgt_ids.len()
    }
}

/// An example is routed by its longer side.
impl Bucketable for Example {
    fn bucket_key(&self) -> usize {
        self.src_len().max(self.tgt_len())
    }
}
