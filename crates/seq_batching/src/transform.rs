use crate::example::Example;
use crate::readers::RawRecord;
use crate::tokenizer::Tokenizer;
use anyhow::{Context, Result};
use std::sync::Arc;

/// A stateless conversion from `I` to `O`.
pub trait Transform<I, O>: Send + Sync {
    fn apply(&self, input: I) -> Result<O>;
}

// ================================================================================================
/// Turns a [`RawRecord`] into an [`Example`].
///
/// - Text records are tokenized and laid out with [`Example::from_tokens`].
///   The raw strings stay on the example.
/// - Token records keep their ids as-is. When labels are missing they are
///   derived by dropping the leading `<s>` of `tgt_ids` and appending `</s>`.
#[derive(Clone)]
pub struct ExampleEncoder {
    tokenizer: Arc<dyn Tokenizer>,
}

impl ExampleEncoder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }
}

impl Transform<RawRecord, Example> for ExampleEncoder {
    fn apply(&self, record: RawRecord) -> Result<Example> {
        match record {
            RawRecord::Text { source, target } => {
                let src = self
                    .tokenizer
                    .encode(&source)
                    .with_context(|| format!("Failed to encode source '{}'", source))?;
                let tgt = self
                    .tokenizer
                    .encode(&target)
                    .with_context(|| format!("Failed to encode target '{}'", target))?;
                Ok(Example::from_tokens(
                    &src,
                    &tgt,
                    self.tokenizer.sos_id(),
                    self.tokenizer.eos_id(),
                )
                .with_text(source, target))
            }
            RawRecord::Tokens {
                src_ids,
                tgt_ids,
                tgt_labels,
            } => {
                let tgt_labels = match tgt_labels {
                    Some(labels) => labels,
                    None => tgt_ids
                        .iter()
                        .skip(1)
                        .copied()
                        .chain(std::iter::once(self.tokenizer.eos_id()))
                        .collect(),
                };
                Example::new(src_ids, tgt_ids, tgt_labels)
            }
        }
    }
}
