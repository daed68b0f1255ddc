//! Sequence packing: several short examples share one fixed-capacity row.
//!
//! ```text
//! capacity 8, examples A=[a1 a2 </s>] B=[b1 </s>] C=[c1 c2 c3 c4 </s>]
//!
//! row 0  ids          a1 a2 </s> b1 </s>
//!        segment_ids   1  1   1   2   2
//!        segment_pos   0  1   2   0   1
//! row 1  ids          c1 c2 c3 c4 </s>
//!        segment_ids   1  1  1  1   1
//!        segment_pos   0  1  2  3   4
//! ```
//!
//! Source and target capacities are tracked independently, and an example
//! only joins a row when both of its sides fit. Examples are consumed in
//! arrival order. With a window of one open row (sequential order) a row is
//! closed as soon as the next example does not fit. A wider window lets later
//! short examples fill earlier rows (first-fit), which packs tighter but
//! changes the order in which examples reach the output.

use crate::bucket::Bucketable;
use crate::error::InputError;
use crate::example::Example;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::warn;

/// What to do with an example that can never be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Skip the example, count it and keep going.
    #[default]
    Drop,
    /// Abort with a configuration error.
    Fail,
}

/// One packed row: the concatenation of one or more examples on each side.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedRow {
    pub src_ids: Vec<i64>,
    pub src_segment_ids: Vec<i64>,
    pub src_segment_pos: Vec<i64>,
    pub tgt_ids: Vec<i64>,
    pub tgt_labels: Vec<i64>,
    pub tgt_weights: Vec<f32>,
    pub tgt_segment_ids: Vec<i64>,
    pub tgt_segment_pos: Vec<i64>,
    /// Raw strings of the packed examples, in segment order.
    pub src_strs: Vec<String>,
    pub tgt_strs: Vec<String>,
    pub num_examples: usize,
}

impl PackedRow {
    fn with_capacity(source_capacity: usize, target_capacity: usize) -> Self {
        Self {
            src_ids: Vec::with_capacity(source_capacity),
            src_segment_ids: Vec::with_capacity(source_capacity),
            src_segment_pos: Vec::with_capacity(source_capacity),
            tgt_ids: Vec::with_capacity(target_capacity),
            tgt_labels: Vec::with_capacity(target_capacity),
            tgt_weights: Vec::with_capacity(target_capacity),
            tgt_segment_ids: Vec::with_capacity(target_capacity),
            tgt_segment_pos: Vec::with_capacity(target_capacity),
            src_strs: Vec::new(),
            tgt_strs: Vec::new(),
            num_examples: 0,
        }
    }

    pub fn src_len(&self) -> usize {
        self.src_ids.len()
    }

    pub fn tgt_len(&self) -> usize {
        self.tgt_ids.len()
    }

    fn can_fit(&self, example: &Example, source_capacity: usize, target_capacity: usize) -> bool {
        self.src_len() + example.src_len() <= source_capacity
            && self.tgt_len() + example.tgt_len() <= target_capacity
    }

    fn is_full(&self, source_capacity: usize, target_capacity: usize) -> bool {
        self.src_len() >= source_capacity || self.tgt_len() >= target_capacity
    }

    fn add(&mut self, example: Example) {
        self.num_examples += 1;
        let segment = self.num_examples as i64;
        let src_len = example.src_len();
        let tgt_len = example.tgt_len();

        self.src_ids.extend(example.src_ids);
        self.src_segment_ids.extend(std::iter::repeat(segment).take(src_len));
        self.src_segment_pos.extend(0..src_len as i64);
        self.src_strs.push(example.src_text);

        self.tgt_ids.extend(example.tgt_ids);
        self.tgt_labels.extend(example.tgt_labels);
        self.tgt_weights.extend(example.tgt_weights);
        self.tgt_segment_ids.extend(std::iter::repeat(segment).take(tgt_len));
        self.tgt_segment_pos.extend(0..tgt_len as i64);
        self.tgt_strs.push(example.tgt_text);
    }
}

/// A packed row is routed by the longer of its two filled lengths.
impl Bucketable for PackedRow {
    fn bucket_key(&self) -> usize {
        self.src_len().max(self.tgt_len())
    }

    fn num_examples(&self) -> usize {
        self.num_examples
    }
}

/// Packer configuration.
#[derive(Debug, Clone)]
pub struct PackerConfig {
    /// Row capacity in source tokens.
    pub source_capacity: usize,
    /// Row capacity in target tokens.
    pub target_capacity: usize,
    /// Close every open row after this many examples were consumed (0 = never).
    pub flush_every_n: usize,
    /// Number of rows kept open for first-fit placement (1 = strict arrival order).
    pub window: usize,
    /// Handling of examples longer than an empty row.
    pub overlong_policy: OverflowPolicy,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            source_capacity: 300,
            target_capacity: 300,
            flush_every_n: 0,
            window: 1,
            overlong_policy: OverflowPolicy::Drop,
        }
    }
}

/// Running totals over the rows a [`Packer`] has emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackingStats {
    pub rows: usize,
    pub examples: usize,
    pub source_tokens: usize,
    pub target_tokens: usize,
    /// Examples skipped because they could never fit a row.
    pub dropped_overlong: usize,
}

impl PackingStats {
    /// Filled source positions over total source capacity.
    pub fn source_efficiency(&self, source_capacity: usize) -> f64 {
        ratio(self.source_tokens, self.rows * source_capacity)
    }

    /// Filled target positions over total target capacity.
    pub fn target_efficiency(&self, target_capacity: usize) -> f64 {
        ratio(self.target_tokens, self.rows * target_capacity)
    }

    pub fn summary(&self) -> String {
        format!(
            "Packing: {} examples -> {} rows ({:.2} examples/row), {} dropped as overlong",
            self.examples,
            self.rows,
            ratio(self.examples, self.rows),
            self.dropped_overlong
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Lazily packs a stream of examples into [`PackedRow`]s.
///
/// The packer only holds the rows that are still open plus the rows that
/// were closed but not yet handed out. It is finite iff its input is.
///
/// # Example
/// ```ignore
/// let config = PackerConfig { source_capacity: 64, target_capacity: 64, ..Default::default() };
/// for row in Packer::new(examples.into_iter().map(Ok), config) {
///     let row = row?;
///     assert!(row.src_len() <= 64);
/// }
/// ```
pub struct Packer<I> {
    input: I,
    config: PackerConfig,
    open: VecDeque<PackedRow>,
    closed: VecDeque<PackedRow>,
    since_flush: usize,
    exhausted: bool,
    stats: PackingStats,
}

impl<I> Packer<I>
where
    I: Iterator<Item = Result<Example>>,
{
    pub fn new(input: I, mut config: PackerConfig) -> Self {
        config.window = config.window.max(1);
        Self {
            input,
            config,
            open: VecDeque::new(),
            closed: VecDeque::new(),
            since_flush: 0,
            exhausted: false,
            stats: PackingStats::default(),
        }
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    pub fn stats(&self) -> &PackingStats {
        &self.stats
    }

    /// Places one example into an open row, or reports it as unplaceable.
    fn offer(&mut self, example: Example) -> Result<()> {
        let (src_cap, tgt_cap) = (self.config.source_capacity, self.config.target_capacity);

        if example.src_len() > src_cap || example.tgt_len() > tgt_cap {
            let err = InputError::ExampleTooLong {
                source_len: example.src_len(),
                target_len: example.tgt_len(),
                source_capacity: src_cap,
                target_capacity: tgt_cap,
            };
            match self.config.overlong_policy {
                OverflowPolicy::Fail => bail!(err),
                OverflowPolicy::Drop => {
                    self.stats.dropped_overlong += 1;
                    warn!(
                        source_len = example.src_len(),
                        target_len = example.tgt_len(),
                        dropped = self.stats.dropped_overlong,
                        "dropping example that cannot fit a packed row"
                    );
                    return Ok(());
                }
            }
        }

        match self
            .open
            .iter()
            .position(|row| row.can_fit(&example, src_cap, tgt_cap))
        {
            Some(idx) => {
                self.open[idx].add(example);
                if self.open[idx].is_full(src_cap, tgt_cap) {
                    if let Some(row) = self.open.remove(idx) {
                        self.closed.push_back(row);
                    }
                }
            }
            None => {
                if self.open.len() >= self.config.window {
                    if let Some(oldest) = self.open.pop_front() {
                        self.closed.push_back(oldest);
                    }
                }
                let mut row = PackedRow::with_capacity(src_cap, tgt_cap);
                row.add(example);
                if row.is_full(src_cap, tgt_cap) {
                    self.closed.push_back(row);
                } else {
                    self.open.push_back(row);
                }
            }
        }

        self.since_flush += 1;
        if self.config.flush_every_n > 0 && self.since_flush >= self.config.flush_every_n {
            self.closed.extend(self.open.drain(..));
            self.since_flush = 0;
        }
        Ok(())
    }

    fn emit(&mut self, row: PackedRow) -> PackedRow {
        self.stats.rows += 1;
        self.stats.examples += row.num_examples;
        self.stats.source_tokens += row.src_len();
        self.stats.target_tokens += row.tgt_len();
        row
    }
}

impl<I> Iterator for Packer<I>
where
    I: Iterator<Item = Result<Example>>,
{
    type Item = Result<PackedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.closed.pop_front() {
                return Some(Ok(self.emit(row)));
            }
            if self.exhausted {
                let row = self.open.pop_front()?;
                return Some(Ok(self.emit(row)));
            }
            match self.input.next() {
                None => self.exhausted = true,
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(example)) => {
                    if let Err(e) = self.offer(example) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod packing_tests {
    use super::*;

    fn ex(src_len: usize, tgt_len: usize, tag: i64) -> Example {
        // Lengths are final lengths: from_tokens adds one boundary token per side.
        let src = vec![tag; src_len - 1];
        let tgt = vec![tag; tgt_len - 1];
        Example::from_tokens(&src, &tgt, 1, 2)
    }

    fn pack(examples: Vec<Example>, config: PackerConfig) -> Result<Vec<PackedRow>> {
        Packer::new(examples.into_iter().map(Ok), config).collect()
    }

    fn config(src: usize, tgt: usize) -> PackerConfig {
        PackerConfig {
            source_capacity: src,
            target_capacity: tgt,
            ..PackerConfig::default()
        }
    }

    #[test]
    fn test_greedy_in_order() -> Result<()> {
        let rows = pack(
            vec![ex(3, 3, 10), ex(2, 2, 20), ex(5, 2, 30), ex(2, 2, 40)],
            config(8, 8),
        )?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].num_examples, 2);
        assert_eq!(rows[0].src_ids, vec![10, 10, 2, 20, 2]);
        assert_eq!(rows[0].src_segment_ids, vec![1, 1, 1, 2, 2]);
        assert_eq!(rows[0].src_segment_pos, vec![0, 1, 2, 0, 1]);
        // The third example does not fit the 3 remaining source slots, so row 0
        // closes even though the fourth example would have fitted.
        assert_eq!(rows[1].src_ids, vec![30, 30, 30, 30, 2, 40, 2]);
        assert_eq!(rows[1].tgt_segment_ids, vec![1, 1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_row_keeps_example_strings() -> Result<()> {
        let rows = pack(
            vec![
                ex(3, 2, 5).with_text("aa", "b"),
                ex(2, 3, 6).with_text("c", "dd"),
                ex(7, 2, 7).with_text("eeeeee", "f"),
            ],
            config(8, 8),
        )?;
        assert_eq!(rows[0].src_strs, vec!["aa", "c"]);
        assert_eq!(rows[0].tgt_strs, vec!["b", "dd"]);
        assert_eq!(rows[0].src_ids, vec![5, 5, 2, 6, 2]);
        assert_eq!(rows[0].tgt_segment_pos, vec![0, 1, 0, 1, 2]);
        assert_eq!(rows[1].src_strs, vec!["eeeeee"]);
        Ok(())
    }

    #[test]
    fn test_both_capacities_must_fit() -> Result<()> {
        // Source side fits, target side does not.
        let rows = pack(vec![ex(2, 6, 1), ex(2, 3, 2)], config(8, 8))?;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.num_examples == 1));
        Ok(())
    }

    #[test]
    fn test_target_layout_in_row() -> Result<()> {
        let rows = pack(vec![ex(2, 3, 7), ex(2, 2, 8)], config(10, 10))?;
        let row = &rows[0];
        assert_eq!(row.tgt_ids, vec![1, 7, 7, 1, 8]);
        assert_eq!(row.tgt_labels, vec![7, 7, 2, 8, 2]);
        assert_eq!(row.tgt_segment_pos, vec![0, 1, 2, 0, 1]);
        assert_eq!(row.tgt_weights, vec![1.0; 5]);
        assert_eq!(row.bucket_key(), 5);
        Ok(())
    }

    #[test]
    fn test_flush_every_n() -> Result<()> {
        let examples: Vec<_> = (0..7).map(|i| ex(2, 2, i)).collect();
        let rows = pack(
            examples,
            PackerConfig {
                flush_every_n: 3,
                ..config(100, 100)
            },
        )?;
        let counts: Vec<_> = rows.iter().map(|r| r.num_examples).collect();
        assert_eq!(counts, vec![3, 3, 1]);
        Ok(())
    }

    #[test]
    fn test_full_row_closes_immediately() -> Result<()> {
        let mut packer = Packer::new(
            vec![ex(4, 2, 1), ex(4, 2, 2)]
                .into_iter()
                .map(Ok)
                .chain(std::iter::from_fn(|| -> Option<Result<Example>> {
                    panic!("packer read past a full row")
                })),
            config(8, 8),
        );
        let row = packer.next().unwrap()?;
        assert_eq!(row.num_examples, 2);
        Ok(())
    }

    #[test]
    fn test_overlong_dropped() -> Result<()> {
        let mut packer = Packer::new(
            vec![ex(2, 2, 1), ex(9, 2, 2), ex(2, 2, 3)].into_iter().map(Ok),
            config(8, 8),
        );
        let rows: Vec<_> = packer.by_ref().collect::<Result<_>>()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].num_examples, 2);
        assert_eq!(packer.stats().dropped_overlong, 1);
        Ok(())
    }

    #[test]
    fn test_overlong_fails_under_fail_policy() {
        let result = pack(
            vec![ex(2, 2, 1), ex(2, 9, 2)],
            PackerConfig {
                overlong_policy: OverflowPolicy::Fail,
                ..config(8, 8)
            },
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::ExampleTooLong { target_len: 9, .. })
        ));
    }

    #[test]
    fn test_window_fills_earlier_rows() -> Result<()> {
        let examples = vec![ex(6, 2, 1), ex(6, 2, 2), ex(2, 2, 3), ex(2, 2, 4)];
        let rows = pack(
            examples,
            PackerConfig {
                window: 4,
                ..config(8, 8)
            },
        )?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].src_segment_ids, vec![1, 1, 1, 1, 1, 1, 2, 2]);
        assert_eq!(rows[1].src_segment_ids, vec![1, 1, 1, 1, 1, 1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_conservation_and_stats() -> Result<()> {
        let examples: Vec<_> = (0..40)
            .map(|i| ex(2 + i % 5, 2 + (i * 3) % 7, i as i64 + 3))
            .collect();
        let mut packer = Packer::new(examples.clone().into_iter().map(Ok), config(16, 16));
        let rows: Vec<_> = packer.by_ref().collect::<Result<_>>()?;

        let mut recovered = Vec::new();
        for row in &rows {
            assert!(row.src_len() <= 16 && row.tgt_len() <= 16);
            for seg in 1..=row.num_examples as i64 {
                let src: Vec<i64> = row
                    .src_ids
                    .iter()
                    .zip(&row.src_segment_ids)
                    .filter(|(_, &s)| s == seg)
                    .map(|(&t, _)| t)
                    .collect();
                recovered.push(src);
            }
        }
        let original: Vec<_> = examples.iter().map(|e| e.src_ids.clone()).collect();
        assert_eq!(recovered, original);

        let stats = packer.stats();
        assert_eq!(stats.examples, 40);
        assert_eq!(stats.rows, rows.len());
        assert!(stats.source_efficiency(16) > 0.4);
        assert!(stats.summary().contains("40 examples"));
        Ok(())
    }

    #[test]
    fn test_input_error_propagates() {
        let input = vec![Ok(ex(2, 2, 1)), Err(anyhow::anyhow!("broken record"))];
        let results: Vec<_> = Packer::new(input.into_iter(), config(8, 8)).collect();
        assert!(results.iter().any(|r| r.is_err()));
    }
}
