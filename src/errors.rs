use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrionDistError {
    #[error("Invalid K-mer size: {0}. Must be between 1 and 32.")]
    InvalidKmerSize(u8),

    #[error("Invalid sketch size: {0}. Must be greater than 0.")]
    InvalidSketchSize(u32),

    #[error("Invalid false-positive rate: {0}. Must be in [0, 1).")]
    InvalidFpr(f64),

    #[error("Invalid chunk size: {0}. Must be greater than 0 bytes.")]
    InvalidChunkSize(usize),

    #[error("Invalid HyperLogLog precision: {0}. Must be between 4 and 16.")]
    InvalidHllPrecision(u8),

    #[error("Invalid file timeout: 0 seconds would time out every file. Omit it to disable the timeout.")]
    InvalidFileTimeout,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse manifest {path:?}: {reason}")]
    ManifestParsing { path: PathBuf, reason: String },

    #[error("Reference bin '{name}' lists {count} files; exactly one file per bin is supported")]
    MultiFileBin { name: String, count: usize },

    #[error("Failed to load reference index: {0}")]
    IndexLoad(String),

    #[error("K-mer size mismatch: run configured with k={0} but the index was built with k={1}")]
    KmerSizeMismatch(u8, u8),

    #[error("Failed to parse input file: {0}")]
    FileParsingError(String),

    #[error("Timed out after {secs:.2}s while reading {path}")]
    FileTimeout { path: String, secs: f64 },

    #[error("I/O error")]
    IoError(#[from] std::io::Error),
}
