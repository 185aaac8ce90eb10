//! Streaming distance pipeline.
//!
//! INIT: the reference index loads on a background thread while the
//! manifest is read, the output is created and the worker pool is built.
//! WAIT: the load is joined before the header is written. Files are then
//! processed in chunks bounded by a filename byte budget; within a chunk the
//! file range is split into one contiguous sub-range per worker and the
//! chunk ends with a barrier. Workers write rows to the shared sink as they
//! go.

use anyhow::{Context, Result, anyhow};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use needletail::{errors::ParseErrorKind, parse_fastx_reader};
use rayon::prelude::*;
use std::{
    collections::HashSet,
    fs,
    ops::Range,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    cardinality::{CardinalityCounter, CardinalityMode},
    config::{DistanceMode, RunConfig},
    distance::{SENTINEL, clamped, containment, corrected_jaccard, exact_jaccard},
    errors::OrionDistError,
    index::ReferenceIndex,
    kmer::KmerHasher,
    manifest::{FilenameChunks, read_manifest},
    sink::{ResultSink, format_row},
    sketch::MinSketch,
    utils::{
        build_thread_pool, get_input_reader, track_progress_and_resources, with_appended_suffix,
    },
};

/// Wall-clock breakdown of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    /// Background index load.
    pub index_io: Duration,
    /// Manifest reading and reference size computation.
    pub reads_io: Duration,
    /// Chunk dispatch, from the first chunk to the last barrier.
    pub compute: Duration,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files: usize,
    /// Files written as sentinel rows.
    pub degraded: usize,
    pub timings: Timings,
}

/// Handle on the background index load.
///
/// `wait` joins the loader the first time and hands out the shared index on
/// every later call.
pub struct PendingIndex<I> {
    handle: Option<JoinHandle<Result<(I, Duration)>>>,
    ready: Option<(Arc<I>, Duration)>,
}

impl<I: Send + Sync + 'static> PendingIndex<I> {
    pub fn spawn<L>(loader: L) -> Result<Self>
    where
        L: FnOnce() -> Result<I> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("index-loader".to_string())
            .spawn(move || {
                let start = Instant::now();
                let index = loader()?;
                Ok((index, start.elapsed()))
            })
            .context("Failed to spawn index loader thread")?;
        Ok(PendingIndex {
            handle: Some(handle),
            ready: None,
        })
    }

    pub fn wait(&mut self) -> Result<Arc<I>> {
        if let Some((index, _)) = &self.ready {
            return Ok(Arc::clone(index));
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("Reference index loading already failed"))?;
        debug!("Waiting for reference index load to complete");
        let (index, elapsed) = handle
            .join()
            .map_err(|_| anyhow!("Reference index loader panicked"))??;
        info!("Reference index ready after {:.2?}", elapsed);
        let index = Arc::new(index);
        self.ready = Some((Arc::clone(&index), elapsed));
        Ok(index)
    }

    /// Load duration, once the index has been joined.
    pub fn load_time(&self) -> Option<Duration> {
        self.ready.as_ref().map(|(_, elapsed)| *elapsed)
    }
}

/// Hashes a query file yields, plus its k-mer set size when needed.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Sketch values, or every distinct hash in exact mode.
    pub hashes: Vec<u64>,
    pub cardinality: Option<u64>,
}

enum HashAccumulator {
    Sketch {
        sketch: MinSketch,
        counter: Option<CardinalityCounter>,
    },
    Exact(HashSet<u64>),
}

impl HashAccumulator {
    fn for_config(config: &RunConfig) -> Self {
        match config.mode {
            DistanceMode::Exact => HashAccumulator::Exact(HashSet::new()),
            mode => HashAccumulator::Sketch {
                sketch: MinSketch::new(config.sketch_size as usize),
                counter: mode
                    .needs_cardinalities()
                    .then(|| CardinalityCounter::new(config.cardinality)),
            },
        }
    }

    #[inline]
    fn add(&mut self, hash: u64) {
        match self {
            HashAccumulator::Sketch { sketch, counter } => {
                sketch.insert(hash);
                if let Some(counter) = counter {
                    counter.add(hash);
                }
            }
            HashAccumulator::Exact(set) => {
                set.insert(hash);
            }
        }
    }

    fn finish(self) -> FileRecord {
        match self {
            HashAccumulator::Sketch { sketch, counter } => FileRecord {
                hashes: sketch.into_values(),
                cardinality: counter.map(|c| c.cardinality()),
            },
            HashAccumulator::Exact(set) => {
                let cardinality = set.len() as u64;
                FileRecord {
                    hashes: set.into_iter().collect(),
                    cardinality: Some(cardinality),
                }
            }
        }
    }
}

/// Streams every k-mer hash of a FASTA/FASTQ file into `emit`.
/// Returns the number of records read.
pub fn for_each_file_hash<F: FnMut(u64)>(
    path: &Path,
    hasher: &KmerHasher,
    timeout: Option<Duration>,
    mut emit: F,
) -> Result<u64> {
    let path_str = path.to_string_lossy();
    let start = Instant::now();
    let input = get_input_reader(path)?;
    let mut reader = match parse_fastx_reader(input) {
        Ok(reader) => reader,
        // No records at all: an empty k-mer set, not a failure
        Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => {
            debug!("{} is empty", path_str);
            return Ok(0);
        }
        Err(e) => {
            return Err(OrionDistError::FileParsingError(format!("{}: {}", path_str, e)).into());
        }
    };

    let mut record_count = 0u64;
    while let Some(record) = reader.next() {
        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                return Err(OrionDistError::FileTimeout {
                    path: path_str.into_owned(),
                    secs: start.elapsed().as_secs_f64(),
                }
                .into());
            }
        }
        let record = record
            .map_err(|e| OrionDistError::FileParsingError(format!("{}: {}", path_str, e)))?;
        hasher.for_each_hash(&record.seq(), &mut emit);
        record_count += 1;
    }
    debug!("Read {} records from {}", record_count, path_str);
    Ok(record_count)
}

/// Reads a query file into its sketch (or exact hash set) and cardinality.
pub fn build_file_record(
    path: &Path,
    config: &RunConfig,
    hasher: &KmerHasher,
) -> Result<FileRecord> {
    let mut acc = HashAccumulator::for_config(config);
    for_each_file_hash(path, hasher, config.file_timeout, |h| acc.add(h))?;
    Ok(acc.finish())
}

/// Counts the distinct k-mers of a file.
pub fn count_file_kmers(path: &Path, hasher: &KmerHasher, mode: CardinalityMode) -> Result<u64> {
    let mut counter = CardinalityCounter::new(mode);
    for_each_file_hash(path, hasher, None, |h| counter.add(h))?;
    Ok(counter.cardinality())
}

/// One score per bin from the index counts of a file.
pub fn score_counts(
    counts: &[u32],
    record: &FileRecord,
    bin_sizes: &[u64],
    fpr: f64,
    config: &RunConfig,
) -> Vec<f64> {
    let size_a = record.cardinality.unwrap_or(0);
    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let score = match config.mode {
                DistanceMode::Containment => containment(count, config.sketch_size),
                DistanceMode::CorrectedJaccard => {
                    corrected_jaccard(count, config.sketch_size, fpr, size_a, bin_sizes[i])
                }
                DistanceMode::Exact => exact_jaccard(count, size_a, bin_sizes[i]),
            };
            if config.clamp { clamped(score) } else { score }
        })
        .collect()
}

/// Splits `0..len` into at most `parts` contiguous, non-empty ranges.
pub fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let step = len.div_ceil(parts.max(1));
    (0..len)
        .step_by(step)
        .map(|start| start..(start + step).min(len))
        .collect()
}

/// Everything a worker needs; shared read-only across the pool.
struct WorkContext<'a, I: ?Sized> {
    config: &'a RunConfig,
    index: &'a I,
    hasher: KmerHasher,
    fpr: f64,
    bin_sizes: &'a [u64],
    sink: &'a ResultSink,
    degraded: &'a AtomicUsize,
    progress: &'a ProgressBar,
}

impl<I: ReferenceIndex + ?Sized> WorkContext<'_, I> {
    fn process_file(&self, filename: &str) -> Result<Vec<f64>> {
        let record = build_file_record(Path::new(filename), self.config, &self.hasher)?;
        let counts = self.index.query(&record.hashes);
        Ok(score_counts(&counts, &record, self.bin_sizes, self.fpr, self.config))
    }

    /// Processes one contiguous sub-range of a chunk. Per-file failures
    /// become sentinel rows; only sink errors abort.
    fn run(&self, files: &[String]) -> Result<()> {
        let num_bins = self.index.bins().len();
        let mut row = String::new();
        for filename in files {
            let scores = match self.process_file(filename) {
                Ok(scores) => scores,
                Err(e) => {
                    warn!("Failed to process {}: {:#}. Writing NaN row.", filename, e);
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                    vec![SENTINEL; num_bins]
                }
            };
            format_row(&mut row, filename, &scores);
            self.sink.write_line(&row)?;
            self.progress.inc(1);
        }
        Ok(())
    }
}

/// Checks the loaded index against the run and returns the matching hasher.
fn check_index<I: ReferenceIndex + ?Sized>(config: &RunConfig, index: &I) -> Result<KmerHasher> {
    if index.kmer_size() != config.kmer_size {
        return Err(OrionDistError::KmerSizeMismatch(config.kmer_size, index.kmer_size()).into());
    }
    for bin in index.bins() {
        bin.single_file()?;
    }
    KmerHasher::new(index.kmer_size(), index.seed())
        .ok_or_else(|| OrionDistError::InvalidKmerSize(index.kmer_size()).into())
}

/// Reference set sizes in bin order: from index metadata when recorded,
/// otherwise by hashing the bin's file. Empty when the metric needs none.
fn resolve_bin_sizes<I: ReferenceIndex + ?Sized>(
    config: &RunConfig,
    index: &I,
    hasher: &KmerHasher,
    pool: &rayon::ThreadPool,
) -> Result<Vec<u64>> {
    if !config.mode.needs_cardinalities() {
        return Ok(Vec::new());
    }
    let mode = match config.mode {
        DistanceMode::Exact => CardinalityMode::Exact,
        _ => config.cardinality,
    };
    pool.install(|| {
        index
            .bins()
            .par_iter()
            .map(|bin| -> Result<u64> {
                if let Some(size) = bin.cardinality {
                    return Ok(size);
                }
                let file = bin.single_file()?;
                info!("Computing k-mer count of reference bin '{}' from {}", bin.name, file);
                count_file_kmers(Path::new(file), hasher, mode)
                    .with_context(|| format!("Failed to compute size of reference bin '{}'", bin.name))
            })
            .collect()
    })
}

fn write_time_file(output: &Path, timings: &Timings) -> Result<()> {
    let path = with_appended_suffix(output, "time");
    let content = format!(
        "Index I/O\tReads I/O\tCompute\n{:.2}\t{:.2}\t{:.2}\n",
        timings.index_io.as_secs_f64(),
        timings.reads_io.as_secs_f64(),
        timings.compute.as_secs_f64()
    );
    fs::write(&path, content).with_context(|| format!("Failed to write timings to {:?}", path))?;
    info!("Wrote timing breakdown to {:?}", path);
    Ok(())
}

/// Runs the whole pipeline: `loader` produces the reference index on a
/// background thread, everything else is driven by `config`.
pub fn run_distances<I, L>(config: &RunConfig, loader: L) -> Result<RunSummary>
where
    I: ReferenceIndex + 'static,
    L: FnOnce() -> Result<I> + Send + 'static,
{
    // INIT
    let mut pending = PendingIndex::spawn(loader)?;
    let reads_start = Instant::now();
    let files = read_manifest(&config.manifest)
        .with_context(|| format!("Failed to read manifest {:?}", config.manifest))?;
    let mut reads_io = reads_start.elapsed();
    let sink = ResultSink::create(&config.output)?;
    let pool = build_thread_pool(config.threads)?;

    // WAIT
    let index = pending.wait()?;
    let hasher = check_index(config, index.as_ref())?;
    let fpr = config.fpr.unwrap_or_else(|| index.false_positive_rate());
    info!(
        "Scoring {} files against {} bins (k={}, sketch size {}, fpr {}, mode {:?})",
        files.len(),
        index.bins().len(),
        hasher.k(),
        config.sketch_size,
        fpr,
        config.mode
    );
    let sizes_start = Instant::now();
    let bin_sizes = resolve_bin_sizes(config, index.as_ref(), &hasher, &pool)?;
    reads_io += sizes_start.elapsed();
    sink.write_header(&index.bin_names())?;

    // CHUNK / DISPATCH / WORK
    let degraded = AtomicUsize::new(0);
    let compute_start = Instant::now();
    track_progress_and_resources("Computing distances", files.len() as u64, |pb| {
        let ctx = WorkContext {
            config,
            index: index.as_ref(),
            hasher,
            fpr,
            bin_sizes: &bin_sizes,
            sink: &sink,
            degraded: &degraded,
            progress: pb,
        };
        for (chunk_no, chunk) in FilenameChunks::new(&files, config.chunk_size).enumerate() {
            // No-op after the first join
            pending.wait()?;
            debug!("Dispatching chunk {} with {} files", chunk_no, chunk.len());
            pool.install(|| {
                split_ranges(chunk.len(), config.threads)
                    .into_par_iter()
                    .try_for_each(|range| ctx.run(&chunk[range]))
            })?;
        }
        Ok(())
    })?;
    let compute = compute_start.elapsed();

    // DONE
    sink.flush()?;
    let degraded = degraded.into_inner();
    let timings = Timings {
        index_io: pending.load_time().unwrap_or_default(),
        reads_io,
        compute,
    };
    if degraded > 0 {
        warn!(
            "{} of {} files could not be processed and were written as NaN rows",
            degraded,
            files.len()
        );
    }
    info!(
        "Finished {} files (index I/O {:.2?}, reads I/O {:.2?}, compute {:.2?})",
        files.len(),
        timings.index_io,
        timings.reads_io,
        timings.compute
    );
    if config.write_time {
        write_time_file(&config.output, &timings)?;
    }

    Ok(RunSummary {
        files: files.len(),
        degraded,
        timings,
    })
}
