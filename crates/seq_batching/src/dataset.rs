//! Streaming raw records out of a set of files.
//!
//! A [`RecordReader`] walks the files of a [`FilePattern`] for a configurable
//! number of passes and yields [`RawRecord`]s one at a time:
//!
//! ```text
//!   files ──► pass p: file order shuffled with seed + p
//!               │
//!               ├─ 1 reader  (in the calling thread)
//!               └─ N readers (threads over round-robin file shards,
//!                             merged through a bounded channel)
//!               │
//!               ▼
//!         shuffle buffer (file_buffer_size records, seeded)
//!               │
//!               ▼
//!           RawRecord
//! ```
//!
//! With `require_sequential_order` there is no shuffling and a single reader,
//! so records come out in sorted-file, line order. Lines that fail to parse are
//! logged, counted in [`ReaderCounters::malformed`] and skipped. A file that
//! cannot be opened ends the stream with an error.

use crate::pipeline::InputConfig;
use crate::readers::{FilePattern, RawRecord, RecordFormat};
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

type RecordStream = Box<dyn Iterator<Item = Result<RawRecord>> + Send>;

/// Shared counters, readable while reader threads are running.
#[derive(Debug, Default)]
pub struct ReaderCounters {
    /// Records successfully parsed.
    pub records: AtomicUsize,
    /// Records skipped because they failed to parse or encode.
    pub malformed: AtomicUsize,
}

impl ReaderCounters {
    pub(crate) fn record_malformed(&self, error: &anyhow::Error) {
        let total = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(malformed = total, "skipping malformed record: {:#}", error);
    }
}

/// Reader settings derived from an [`InputConfig`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub seed: u64,
    pub shuffle: bool,
    pub parallelism: usize,
    pub buffer_size: usize,
    pub repeat_count: Option<usize>,
    pub channel_capacity: usize,
}

impl ReaderOptions {
    pub fn from_config(config: &InputConfig) -> Self {
        let sequential = config.require_sequential_order;
        Self {
            seed: config.resolved_seed(),
            shuffle: !sequential,
            parallelism: if sequential { 1 } else { config.file_parallelism.max(1) },
            buffer_size: config.file_buffer_size.max(1),
            repeat_count: config.repeat_count,
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

/// File order for one pass. Every reader thread derives the same order.
fn pass_order(num_files: usize, options: &ReaderOptions, pass: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..num_files).collect();
    if options.shuffle {
        let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(pass as u64));
        order.shuffle(&mut rng);
    }
    order
}

fn passes_remaining(options: &ReaderOptions, pass: usize) -> bool {
    options.repeat_count.map_or(true, |n| pass < n)
}

//=======================================================================================================
/// Walks a file list pass after pass in the calling thread.
struct LocalWalk {
    files: Arc<[PathBuf]>,
    format: RecordFormat,
    options: ReaderOptions,
    counters: Arc<ReaderCounters>,
    pass: usize,
    order: Vec<usize>,
    next_file: usize,
    current: Option<RecordStream>,
    records_in_pass: usize,
    done: bool,
}

impl LocalWalk {
    fn new(
        files: Arc<[PathBuf]>,
        format: RecordFormat,
        options: ReaderOptions,
        counters: Arc<ReaderCounters>,
    ) -> Self {
        let order = pass_order(files.len(), &options, 0);
        Self {
            files,
            format,
            options,
            counters,
            pass: 0,
            order,
            next_file: 0,
            current: None,
            records_in_pass: 0,
            done: false,
        }
    }

    fn next_record(&mut self) -> Option<Result<RawRecord>> {
        if self.done {
            return None;
        }
        loop {
            if let Some(stream) = self.current.as_mut() {
                match stream.next() {
                    Some(Ok(record)) => {
                        self.records_in_pass += 1;
                        self.counters.records.fetch_add(1, Ordering::Relaxed);
                        return Some(Ok(record));
                    }
                    Some(Err(e)) => {
                        self.counters.record_malformed(&e);
                        continue;
                    }
                    None => self.current = None,
                }
            }

            if self.next_file < self.order.len() {
                let path = &self.files[self.order[self.next_file]];
                self.next_file += 1;
                match self.format.read(path.clone()) {
                    Ok(stream) => self.current = Some(stream),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            // End of pass.
            debug!(pass = self.pass, records = self.records_in_pass, "finished pass");
            if self.records_in_pass == 0 {
                warn!(pass = self.pass, "pass produced no records, stopping");
                self.done = true;
                return None;
            }
            self.pass += 1;
            if !passes_remaining(&self.options, self.pass) {
                self.done = true;
                return None;
            }
            self.order = pass_order(self.files.len(), &self.options, self.pass);
            self.next_file = 0;
            self.records_in_pass = 0;
        }
    }
}

//=======================================================================================================
/// Reader threads over round-robin file shards.
///
/// Dropping the pool raises the shutdown flag, disconnects the channel and
/// joins every thread.
struct ReaderPool {
    workers: Vec<thread::JoinHandle<()>>,
    output_rx: Option<Receiver<Result<RawRecord>>>,
    shutdown: Arc<AtomicBool>,
}

impl ReaderPool {
    fn spawn(
        files: Arc<[PathBuf]>,
        format: RecordFormat,
        options: ReaderOptions,
        counters: Arc<ReaderCounters>,
    ) -> Result<Self> {
        let num_workers = options.parallelism.min(files.len()).max(1);
        if num_workers < options.parallelism {
            warn!(
                requested = options.parallelism,
                files = files.len(),
                "more reader threads than files; {} threads would stay idle, using {}",
                options.parallelism - num_workers,
                num_workers
            );
        }

        let (output_tx, output_rx) = bounded(options.channel_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let files = Arc::clone(&files);
            let options = options.clone();
            let counters = Arc::clone(&counters);
            let output_tx = output_tx.clone();
            let shutdown = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("record-reader-{}", worker_id))
                .spawn(move || {
                    read_shard(
                        worker_id,
                        num_workers,
                        &files,
                        format,
                        &options,
                        &counters,
                        &output_tx,
                        &shutdown,
                    )
                })
                .with_context(|| format!("Failed to spawn reader thread {}", worker_id))?;
            workers.push(handle);
        }

        Ok(Self {
            workers,
            output_rx: Some(output_rx),
            shutdown,
        })
    }

    fn next_record(&mut self) -> Option<Result<RawRecord>> {
        // All senders gone means every shard finished.
        self.output_rx.as_ref()?.recv().ok()
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblocks threads waiting on a full channel.
        self.output_rx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn read_shard(
    worker_id: usize,
    num_workers: usize,
    files: &[PathBuf],
    format: RecordFormat,
    options: &ReaderOptions,
    counters: &ReaderCounters,
    output_tx: &Sender<Result<RawRecord>>,
    shutdown: &AtomicBool,
) {
    let mut pass = 0;
    while passes_remaining(options, pass) {
        let mut records_in_pass = 0usize;
        let shard = pass_order(files.len(), options, pass)
            .into_iter()
            .skip(worker_id)
            .step_by(num_workers);

        for file_idx in shard {
            let path = &files[file_idx];
            let stream = match format.read(path.clone()) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = output_tx.send(Err(e.context(format!("Reader thread {}", worker_id))));
                    return;
                }
            };
            for record in stream {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                match record {
                    Ok(record) => {
                        records_in_pass += 1;
                        counters.records.fetch_add(1, Ordering::Relaxed);
                        if output_tx.send(Ok(record)).is_err() {
                            return; // Reader dropped
                        }
                    }
                    Err(e) => counters.record_malformed(&e),
                }
            }
        }

        if records_in_pass == 0 {
            debug!(worker_id, pass, "shard produced no records, stopping");
            return;
        }
        pass += 1;
    }
}

//=======================================================================================================
enum Upstream {
    Local(LocalWalk),
    Threads(ReaderPool),
}

/// Iterator over the raw records of a [`FilePattern`].
///
/// Items are `Err` only for fatal problems (a file that cannot be opened).
/// The iterator ends after `repeat_count` passes, or early if a whole pass
/// yields nothing.
pub struct RecordReader {
    upstream: Upstream,
    shuffle_buffer: Vec<RawRecord>,
    buffer_size: usize,
    rng: Option<StdRng>,
    counters: Arc<ReaderCounters>,
    num_files: usize,
}

impl RecordReader {
    /// Expands `pattern` and starts reading.
    pub fn new(pattern: &FilePattern, options: ReaderOptions) -> Result<Self> {
        let files = pattern.expand()?;
        Self::from_files(files, pattern.format, options)
    }

    pub fn from_files(files: Vec<PathBuf>, format: RecordFormat, options: ReaderOptions) -> Result<Self> {
        let files: Arc<[PathBuf]> = files.into();
        let counters = Arc::new(ReaderCounters::default());
        info!(
            files = files.len(),
            %format,
            threads = options.parallelism,
            shuffle = options.shuffle,
            seed = options.seed,
            "starting record reader"
        );

        let upstream = if options.parallelism > 1 {
            Upstream::Threads(ReaderPool::spawn(
                Arc::clone(&files),
                format,
                options.clone(),
                Arc::clone(&counters),
            )?)
        } else {
            Upstream::Local(LocalWalk::new(
                Arc::clone(&files),
                format,
                options.clone(),
                Arc::clone(&counters),
            ))
        };

        // The buffer rng is offset from the file-order seeds of later passes.
        let rng = options
            .shuffle
            .then(|| StdRng::seed_from_u64(options.seed.rotate_left(32) ^ 0x5eed));

        Ok(Self {
            upstream,
            shuffle_buffer: Vec::with_capacity(if options.shuffle { options.buffer_size } else { 0 }),
            buffer_size: options.buffer_size,
            rng,
            counters,
            num_files: files.len(),
        })
    }

    pub fn counters(&self) -> Arc<ReaderCounters> {
        Arc::clone(&self.counters)
    }

    pub fn num_files(&self) -> usize {
        self.num_files
    }

    fn pull(&mut self) -> Option<Result<RawRecord>> {
        match &mut self.upstream {
            Upstream::Local(walk) => walk.next_record(),
            Upstream::Threads(pool) => pool.next_record(),
        }
    }

    fn take_random(&mut self) -> Option<RawRecord> {
        let rng = self.rng.as_mut()?;
        if self.shuffle_buffer.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..self.shuffle_buffer.len());
        Some(self.shuffle_buffer.swap_remove(idx))
    }
}

impl Iterator for RecordReader {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rng.is_none() {
            return self.pull();
        }
        while self.shuffle_buffer.len() < self.buffer_size {
            match self.pull() {
                Some(Ok(record)) => self.shuffle_buffer.push(record),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        self.take_random().map(Ok)
    }
}

#[cfg(test)]
mod record_reader_tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn write_corpus(files: usize, lines_per_file: usize) -> Result<TempDir> {
        let dir = tempdir()?;
        for f in 0..files {
            let mut file = fs::File::create(dir.path().join(format!("part-{}.tsv", f)))?;
            for l in 0..lines_per_file {
                writeln!(file, "src {} {}\ttgt {} {}", f, l, f, l)?;
            }
        }
        Ok(dir)
    }

    fn options(shuffle: bool, parallelism: usize, repeat: Option<usize>) -> ReaderOptions {
        ReaderOptions {
            seed: 31415,
            shuffle,
            parallelism,
            buffer_size: 4,
            repeat_count: repeat,
            channel_capacity: 8,
        }
    }

    fn sources(records: Vec<RawRecord>) -> Vec<String> {
        records
            .into_iter()
            .map(|r| match r {
                RawRecord::Text { source, .. } => source,
                RawRecord::Tokens { .. } => String::from("<tokens>"),
            })
            .collect()
    }

    fn read_all(dir: &TempDir, options: ReaderOptions) -> Result<Vec<RawRecord>> {
        let pattern = FilePattern::parse(&format!("text:{}", dir.path().display()))?;
        RecordReader::new(&pattern, options)?.collect()
    }

    #[test]
    fn test_sequential_order() -> Result<()> {
        let dir = write_corpus(2, 3)?;
        let got = sources(read_all(&dir, options(false, 1, Some(1)))?);
        assert_eq!(
            got,
            vec!["src 0 0", "src 0 1", "src 0 2", "src 1 0", "src 1 1", "src 1 2"]
        );
        Ok(())
    }

    #[test]
    fn test_repeat_count_passes() -> Result<()> {
        let dir = write_corpus(2, 3)?;
        assert_eq!(read_all(&dir, options(false, 1, Some(3)))?.len(), 18);

        let pattern = FilePattern::parse(&format!("text:{}", dir.path().display()))?;
        let unbounded = RecordReader::new(&pattern, options(true, 1, None))?;
        assert_eq!(unbounded.take(100).count(), 100);
        Ok(())
    }

    #[test]
    fn test_shuffle_is_seeded_and_lossless() -> Result<()> {
        let dir = write_corpus(3, 5)?;
        let a = sources(read_all(&dir, options(true, 1, Some(1)))?);
        let b = sources(read_all(&dir, options(true, 1, Some(1)))?);
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        let mut expected = sources(read_all(&dir, options(false, 1, Some(1)))?);
        expected.sort();
        assert_eq!(sorted, expected);
        Ok(())
    }

    #[test]
    fn test_parallel_readers_conserve_records() -> Result<()> {
        let dir = write_corpus(4, 10)?;
        let mut got = sources(read_all(&dir, options(true, 3, Some(2)))?);
        assert_eq!(got.len(), 80);
        got.sort();
        got.dedup();
        assert_eq!(got.len(), 40);
        Ok(())
    }

    #[test]
    fn test_more_threads_than_files() -> Result<()> {
        let dir = write_corpus(2, 2)?;
        assert_eq!(read_all(&dir, options(false, 8, Some(1)))?.len(), 4);
        Ok(())
    }

    #[test]
    fn test_dropping_parallel_reader_mid_stream() -> Result<()> {
        let dir = write_corpus(4, 200)?;
        let pattern = FilePattern::parse(&format!("text:{}", dir.path().display()))?;
        let mut reader = RecordReader::new(&pattern, options(true, 4, None))?;
        assert!(reader.next().is_some());
        drop(reader); // Must not hang on threads blocked on a full channel.
        Ok(())
    }

    #[test]
    fn test_malformed_lines_are_counted() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.tsv"), "ok\tfine\nbroken line\nalso\tfine\n")?;
        let pattern = FilePattern::parse(&format!("text:{}", dir.path().display()))?;
        let mut reader = RecordReader::new(&pattern, options(false, 1, Some(1)))?;
        let records: Vec<_> = reader.by_ref().collect::<Result<_>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(reader.counters().malformed.load(Ordering::Relaxed), 1);
        assert_eq!(reader.counters().records.load(Ordering::Relaxed), 2);
        Ok(())
    }

    #[test]
    fn test_empty_pass_stops_unbounded_reader() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("empty.tsv"), "\n\n")?;
        let pattern = FilePattern::parse(&format!("text:{}", dir.path().display()))?;
        let reader = RecordReader::new(&pattern, options(false, 1, None))?;
        assert_eq!(reader.count(), 0);
        Ok(())
    }
}
