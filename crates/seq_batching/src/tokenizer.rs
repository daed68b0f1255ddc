//! Tokenizers that turn raw text into the integer ids consumed by the pipeline.
//!
//! The pipeline never builds vocabularies itself; it only needs `encode`,
//! `decode` and the reserved ids for `<s>`, `</s>`, `<unk>` and padding.

use anyhow::{anyhow, bail, Result};

/// Text <-> id conversion plus the reserved ids the batch layout depends on.
pub trait Tokenizer: Send + Sync {
    /// Encodes text into token ids, without adding `<s>`/`</s>`.
    fn encode(&self, text: &str) -> Result<Vec<i64>>;

    /// Decodes ids back into text. Stops at the first `</s>`.
    fn decode(&self, ids: &[i64]) -> Result<String>;

    fn sos_id(&self) -> i64;
    fn eos_id(&self) -> i64;
    fn unk_id(&self) -> i64;

    /// Id reserved for padding. Batches are always padded with 0, so a
    /// tokenizer whose pad id differs only reports it here.
    fn pad_id(&self) -> i64;
}

// ================================================================================================
// AsciiTokenizer
// ================================================================================================
const UNK_ID: i64 = 0;
const SOS_ID: i64 = 1;
const EOS_ID: i64 = 2;
const SPACE_ID: i64 = 3;
const NOISE_ID: i64 = 4;
const FIRST_LETTER_ID: i64 = 5;
const FIRST_SYMBOL_ID: i64 = 31;

/// Symbols after `a..z`, in id order.
const SYMBOLS: &str = ".'-:!~?/#$%&()*+,;<=>@[\\]^_`{|}0123456789\"";

/// Character-level tokenizer over a fixed ASCII vocabulary.
///
/// | ids     | tokens                                     |
/// |---------|--------------------------------------------|
/// | 0..=4   | `<unk>`, `<s>`, `</s>`, space, `<noise>`   |
/// | 5..=30  | `a`..`z` (input is case-folded)            |
/// | 31..=72 | punctuation, digits `0`..`9`, then `"`     |
///
/// Characters outside the vocabulary encode to `<unk>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiTokenizer;

impl AsciiTokenizer {
    pub fn new() -> Self {
        Self
    }

    pub fn vocab_size(&self) -> usize {
        FIRST_SYMBOL_ID as usize + SYMBOLS.len()
    }

    fn char_to_id(c: char) -> i64 {
        let c = c.to_ascii_lowercase();
        match c {
            ' ' => SPACE_ID,
            'a'..='z' => FIRST_LETTER_ID + (c as i64 - 'a' as i64),
            _ => SYMBOLS
                .chars()
                .position(|s| s == c)
                .map(|pos| FIRST_SYMBOL_ID + pos as i64)
                .unwrap_or(UNK_ID),
        }
    }
}

impl Tokenizer for AsciiTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        Ok(text.chars().map(Self::char_to_id).collect())
    }

    fn decode(&self, ids: &[i64]) -> Result<String> {
        let mut text = String::with_capacity(ids.len());
        for &id in ids {
            match id {
                EOS_ID => break,
                SOS_ID => continue,
                UNK_ID => text.push_str("<unk>"),
                NOISE_ID => text.push_str("<noise>"),
                SPACE_ID => text.push(' '),
                id if (FIRST_LETTER_ID..FIRST_SYMBOL_ID).contains(&id) => {
                    text.push((b'a' + (id - FIRST_LETTER_ID) as u8) as char)
                }
                id if id >= FIRST_SYMBOL_ID && id < self.vocab_size() as i64 => {
                    let symbol = SYMBOLS
                        .chars()
                        .nth((id - FIRST_SYMBOL_ID) as usize)
                        .ok_or_else(|| anyhow!("Symbol table lookup failed for id {}", id))?;
                    text.push(symbol);
                }
                _ => bail!("Token id {} is outside the ASCII vocabulary", id),
            }
        }
        Ok(text)
    }

    fn sos_id(&self) -> i64 {
        SOS_ID
    }

    fn eos_id(&self) -> i64 {
        EOS_ID
    }

    fn unk_id(&self) -> i64 {
        UNK_ID
    }

    fn pad_id(&self) -> i64 {
        0
    }
}

// ================================================================================================
// HfTokenizer
// ================================================================================================
/// Reserved ids of a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    pub sos: i64,
    pub eos: i64,
    pub unk: i64,
    pub pad: i64,
}

/// Wraps a HuggingFace [`Tokenizer`](tokenizers::Tokenizer).
///
/// # Example
/// ```ignore
/// let hf = tokenizers::Tokenizer::from_file("wpm.json")?;
/// let tokenizer = HfTokenizer::from_token_names(hf, "<s>", "</s>", "<unk>", "<pad>")?;
/// let ids = tokenizer.encode("Hello world")?;
/// ```
pub struct HfTokenizer {
    tokenizer: tokenizers::Tokenizer,
    special: SpecialIds,
}

impl HfTokenizer {
    pub fn new(tokenizer: tokenizers::Tokenizer, special: SpecialIds) -> Self {
        Self { tokenizer, special }
    }

    /// Resolves the reserved ids by looking the token strings up in the vocabulary.
    pub fn from_token_names(
        tokenizer: tokenizers::Tokenizer,
        sos: &str,
        eos: &str,
        unk: &str,
        pad: &str,
    ) -> Result<Self> {
        let lookup = |token: &str| -> Result<i64> {
            tokenizer
                .token_to_id(token)
                .map(i64::from)
                .ok_or_else(|| anyhow!("Token '{}' not found in vocabulary", token))
        };
        let special = SpecialIds {
            sos: lookup(sos)?,
            eos: lookup(eos)?,
            unk: lookup(unk)?,
            pad: lookup(pad)?,
        };
        Ok(Self::new(tokenizer, special))
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
    }

    fn decode(&self, ids: &[i64]) -> Result<String> {
        let ids: Vec<u32> = ids
            .iter()
            .take_while(|&&id| id != self.special.eos)
            .map(|&id| u32::try_from(id).map_err(|_| anyhow!("Negative token id {}", id)))
            .collect::<Result<_>>()?;
        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| anyhow!("Decoding failed: {}", e))
    }

    fn sos_id(&self) -> i64 {
        self.special.sos
    }

    fn eos_id(&self) -> i64 {
        self.special.eos
    }

    fn unk_id(&self) -> i64 {
        self.special.unk
    }

    fn pad_id(&self) -> i64 {
        self.special.pad
    }
}
