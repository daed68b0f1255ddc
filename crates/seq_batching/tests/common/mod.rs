#![allow(dead_code)]

use seq_batching::{AsciiTokenizer, Example, Tokenizer};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tch::Tensor;

pub fn ascii() -> Arc<dyn Tokenizer> {
    Arc::new(AsciiTokenizer::new())
}

/// Writes `source<TAB>target` lines to `dir/name`.
pub fn write_text_corpus(dir: &Path, name: &str, pairs: &[(&str, &str)]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut file = fs::File::create(&path)?;
    for (source, target) in pairs {
        writeln!(file, "{}\t{}", source, target)?;
    }
    Ok(path)
}

/// Pre-tokenized examples with lengths drawn uniformly from `1..=max_len` (before
/// `</s>` / `<s>` are added). Token ids start at 5 so they never collide with
/// reserved ids.
pub fn synthetic_examples(n: usize, max_len: usize, seed: u64) -> Vec<Example> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let src_len = rng.random_range(1..=max_len);
            let tgt_len = rng.random_range(1..=max_len);
            let src: Vec<i64> = (0..src_len).map(|_| rng.random_range(5..73)).collect();
            let tgt: Vec<i64> = (0..tgt_len).map(|_| rng.random_range(5..73)).collect();
            Example::from_tokens(&src, &tgt, 1, 2)
        })
        .collect()
}

/// Writes `examples` as JSONL token records, spread round-robin over `files` files.
pub fn write_jsonl_corpus(dir: &Path, examples: &[Example], files: usize) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = (0..files)
        .map(|f| dir.join(format!("train-{:03}.jsonl", f)))
        .collect();
    let mut handles = paths
        .iter()
        .map(fs::File::create)
        .collect::<std::io::Result<Vec<_>>>()?;
    for (i, ex) in examples.iter().enumerate() {
        let record = serde_json::json!({
            "src_ids": ex.src_ids,
            "tgt_ids": ex.tgt_ids,
            "tgt_labels": ex.tgt_labels,
        });
        writeln!(handles[i % files], "{}", record)?;
    }
    Ok(paths)
}

pub fn row(tensor: &Tensor, i: i64) -> Result<Vec<i64>> {
    Ok(Vec::<i64>::try_from(tensor.get(i))?)
}

pub fn row_f(tensor: &Tensor, i: i64) -> Result<Vec<f32>> {
    Ok(Vec::<f32>::try_from(tensor.get(i))?)
}
