use std::{path::PathBuf, time::Duration};

use crate::{
    cardinality::{CardinalityMode, MAX_HLL_PRECISION, MIN_HLL_PRECISION},
    cli::{CardinalityArg, DistArgs, MetricArg},
    errors::OrionDistError,
    utils::get_num_threads,
};

/// Score computed for each (query file, bin) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMode {
    /// `count / sketch_size` on the query sketch.
    Containment,
    /// Containment corrected by the fpr, converted to a Jaccard estimate.
    CorrectedJaccard,
    /// Jaccard over the complete k-mer sets, no sketching.
    Exact,
}

impl DistanceMode {
    pub fn uses_sketch(self) -> bool {
        !matches!(self, DistanceMode::Exact)
    }

    pub fn needs_cardinalities(self) -> bool {
        !matches!(self, DistanceMode::Containment)
    }
}

/// Immutable settings of one run. Built once by [`RunConfig::from_args`]
/// (or directly, in tests) and passed by reference to every component.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub manifest: PathBuf,
    pub index: PathBuf,
    pub output: PathBuf,
    pub kmer_size: u8,
    pub sketch_size: u32,
    pub threads: usize,
    /// Overrides the false-positive rate reported by the index.
    pub fpr: Option<f64>,
    /// Byte budget of filenames per chunk.
    pub chunk_size: usize,
    pub mode: DistanceMode,
    pub cardinality: CardinalityMode,
    pub clamp: bool,
    pub file_timeout: Option<Duration>,
    pub write_time: bool,
}

impl RunConfig {
    pub fn from_args(args: &DistArgs, threads: usize) -> Result<Self, OrionDistError> {
        let mode = if args.exact {
            DistanceMode::Exact
        } else {
            match args.metric {
                MetricArg::Jaccard => DistanceMode::CorrectedJaccard,
                MetricArg::Containment => DistanceMode::Containment,
            }
        };
        let cardinality = match args.cardinality {
            CardinalityArg::Exact => CardinalityMode::Exact,
            CardinalityArg::Hll => CardinalityMode::HyperLogLog {
                precision: args.hll_precision,
            },
        };
        let config = RunConfig {
            manifest: args.input_file.clone(),
            index: args.index_file.clone(),
            output: args.output_file.clone(),
            kmer_size: args.kmer_size,
            sketch_size: args.sketch_size,
            threads: get_num_threads(threads),
            fpr: args.fpr,
            chunk_size: args.chunk_size,
            mode,
            cardinality,
            clamp: args.clamp,
            file_timeout: args.file_timeout.map(Duration::from_secs),
            write_time: args.write_time,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrionDistError> {
        if self.kmer_size == 0 || self.kmer_size > 32 {
            return Err(OrionDistError::InvalidKmerSize(self.kmer_size));
        }
        if self.mode.uses_sketch() && self.sketch_size == 0 {
            return Err(OrionDistError::InvalidSketchSize(self.sketch_size));
        }
        if let Some(fpr) = self.fpr {
            if !(0.0..1.0).contains(&fpr) {
                return Err(OrionDistError::InvalidFpr(fpr));
            }
        }
        if self.chunk_size == 0 {
            return Err(OrionDistError::InvalidChunkSize(self.chunk_size));
        }
        if self.file_timeout.is_some_and(|t| t.is_zero()) {
            return Err(OrionDistError::InvalidFileTimeout);
        }
        if let CardinalityMode::HyperLogLog { precision } = self.cardinality {
            if !(MIN_HLL_PRECISION..=MAX_HLL_PRECISION).contains(&precision) {
                return Err(OrionDistError::InvalidHllPrecision(precision));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Wrapper {
        #[clap(flatten)]
        args: DistArgs,
    }

    fn parse(extra: &[&str]) -> DistArgs {
        let mut argv = vec!["test", "-i", "m.txt", "-x", "idx.bin", "-o", "out.tsv"];
        argv.extend_from_slice(extra);
        Wrapper::parse_from(argv).args
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_args(&parse(&[]), 2).unwrap();
        assert_eq!(config.kmer_size, 32);
        assert_eq!(config.sketch_size, 10_000);
        assert_eq!(config.threads, 2);
        assert_eq!(config.fpr, None);
        assert_eq!(config.chunk_size, 10 << 20);
        assert_eq!(config.mode, DistanceMode::CorrectedJaccard);
        assert_eq!(config.cardinality, CardinalityMode::HyperLogLog { precision: 12 });
        assert!(!config.clamp);
        assert!(config.file_timeout.is_none());
    }

    #[test]
    fn test_mode_selection() {
        let exact = RunConfig::from_args(&parse(&["--exact", "--metric", "containment"]), 1).unwrap();
        assert_eq!(exact.mode, DistanceMode::Exact);
        let containment = RunConfig::from_args(&parse(&["--metric", "containment"]), 1).unwrap();
        assert_eq!(containment.mode, DistanceMode::Containment);
        assert!(!containment.mode.needs_cardinalities());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            RunConfig::from_args(&parse(&["-k", "33"]), 1),
            Err(OrionDistError::InvalidKmerSize(33))
        ));
        assert!(matches!(
            RunConfig::from_args(&parse(&["-s", "0"]), 1),
            Err(OrionDistError::InvalidSketchSize(0))
        ));
        assert!(matches!(
            RunConfig::from_args(&parse(&["--fpr", "1.5"]), 1),
            Err(OrionDistError::InvalidFpr(_))
        ));
        assert!(matches!(
            RunConfig::from_args(&parse(&["--chunk-size", "0"]), 1),
            Err(OrionDistError::InvalidChunkSize(0))
        ));
        assert!(matches!(
            RunConfig::from_args(&parse(&["--hll-precision", "30"]), 1),
            Err(OrionDistError::InvalidHllPrecision(30))
        ));
        assert!(matches!(
            RunConfig::from_args(&parse(&["--file-timeout", "0"]), 1),
            Err(OrionDistError::InvalidFileTimeout)
        ));
        let timed = RunConfig::from_args(&parse(&["--file-timeout", "30"]), 1).unwrap();
        assert_eq!(timed.file_timeout, Some(Duration::from_secs(30)));
        // Sketch size is irrelevant in exact mode
        assert!(RunConfig::from_args(&parse(&["--exact", "-s", "0"]), 1).is_ok());
    }
}
