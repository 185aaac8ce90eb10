use anyhow::{Context, Result};
use log::{debug, info};
use probabilistic_collections::bloom::BloomFilter;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, io::Write, path::Path};

use crate::{
    errors::OrionDistError,
    utils::{get_input_reader, get_output_writer},
};

/// Bumped whenever the serialized layout of [`BinIndex`] changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Metadata of one reference bin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BinMeta {
    /// Column identifier in the output header.
    pub name: String,
    /// Source file(s) of the bin. Exactly one is supported.
    pub files: Vec<String>,
    /// Number of distinct k-mers in the bin, when recorded at build time.
    pub cardinality: Option<u64>,
}

impl BinMeta {
    pub fn new(name: impl Into<String>, file: impl Into<String>, cardinality: Option<u64>) -> Self {
        BinMeta {
            name: name.into(),
            files: vec![file.into()],
            cardinality,
        }
    }

    /// The bin's single source file, or `MultiFileBin` otherwise.
    pub fn single_file(&self) -> Result<&str, OrionDistError> {
        match self.files.as_slice() {
            [file] => Ok(file.as_str()),
            other => Err(OrionDistError::MultiFileBin {
                name: self.name.clone(),
                count: other.len(),
            }),
        }
    }
}

/// Multi-set membership structure queried by the pipeline.
///
/// Implementations are immutable once built and must be safe to query from
/// many workers at once.
pub trait ReferenceIndex: Send + Sync {
    fn kmer_size(&self) -> u8;

    /// Seed of the k-mer hasher the bins were built with.
    fn seed(&self) -> u64;

    /// Upper bound on the per-hash false-positive rate of `query`.
    fn false_positive_rate(&self) -> f64;

    /// Bins in stable column order.
    fn bins(&self) -> &[BinMeta];

    /// For every bin, how many of `hashes` it reports as present.
    /// Duplicated hashes are counted once per occurrence.
    fn query(&self, hashes: &[u64]) -> Vec<u32>;

    fn bin_names(&self) -> Vec<&str> {
        self.bins().iter().map(|b| b.name.as_str()).collect()
    }
}

/// Membership filter of a single bin.
///
/// Bloom bins carry their SipHash keys in the artifact, so a loaded filter
/// answers exactly like the one that was built.
#[derive(Serialize, Deserialize)]
pub enum BinFilter {
    Exact(HashSet<u64>),
    Bloom(BloomFilter<u64>),
}

impl BinFilter {
    pub fn exact<I: IntoIterator<Item = u64>>(hashes: I) -> Self {
        BinFilter::Exact(hashes.into_iter().collect())
    }

    /// Bloom filter sized for `hashes` at target rate `fpr` (in (0, 1)).
    pub fn bloom(hashes: &HashSet<u64>, fpr: f64) -> Self {
        let mut filter = BloomFilter::new(hashes.len().max(1), fpr);
        for hash in hashes {
            filter.insert(hash);
        }
        BinFilter::Bloom(filter)
    }

    #[inline]
    pub fn contains(&self, hash: u64) -> bool {
        match self {
            BinFilter::Exact(set) => set.contains(&hash),
            BinFilter::Bloom(bloom) => bloom.contains(&hash),
        }
    }

    pub fn false_positive_rate(&self) -> f64 {
        match self {
            BinFilter::Exact(_) => 0.0,
            // Fill-ratio estimate over the inserted items
            BinFilter::Bloom(bloom) => bloom.estimated_fpp(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BinFilter::Exact(_) => "exact",
            BinFilter::Bloom(_) => "bloom",
        }
    }
}

impl fmt::Debug for BinFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinFilter::Exact(set) => write!(f, "Exact({} hashes)", set.len()),
            BinFilter::Bloom(bloom) => write!(f, "Bloom(fpp {:.4})", bloom.estimated_fpp()),
        }
    }
}

/// Serializable reference index: one filter per bin.
#[derive(Serialize, Deserialize, Debug)]
pub struct BinIndex {
    format_version: u32,
    k: u8,
    seed: u64,
    bins: Vec<BinMeta>,
    filters: Vec<BinFilter>,
}

impl BinIndex {
    pub fn new(k: u8, seed: u64) -> Self {
        BinIndex {
            format_version: INDEX_FORMAT_VERSION,
            k,
            seed,
            bins: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn add_bin(&mut self, meta: BinMeta, filter: BinFilter) {
        self.bins.push(meta);
        self.filters.push(filter);
    }

    pub fn filters(&self) -> &[BinFilter] {
        &self.filters
    }

    /// Structural checks applied to every loaded artifact.
    pub fn validate(&self) -> Result<(), OrionDistError> {
        if self.format_version != INDEX_FORMAT_VERSION {
            return Err(OrionDistError::IndexLoad(format!(
                "unsupported format version {} (expected {})",
                self.format_version, INDEX_FORMAT_VERSION
            )));
        }
        if self.k == 0 || self.k > 32 {
            return Err(OrionDistError::InvalidKmerSize(self.k));
        }
        if self.bins.len() != self.filters.len() {
            return Err(OrionDistError::IndexLoad(format!(
                "{} bins but {} filters",
                self.bins.len(),
                self.filters.len()
            )));
        }
        for bin in &self.bins {
            bin.single_file()?;
        }
        Ok(())
    }
}

impl ReferenceIndex for BinIndex {
    fn kmer_size(&self) -> u8 {
        self.k
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn false_positive_rate(&self) -> f64 {
        self.filters
            .iter()
            .map(BinFilter::false_positive_rate)
            .fold(0.0, f64::max)
    }

    fn bins(&self) -> &[BinMeta] {
        &self.bins
    }

    fn query(&self, hashes: &[u64]) -> Vec<u32> {
        self.filters
            .iter()
            .map(|filter| hashes.iter().filter(|&&h| filter.contains(h)).count() as u32)
            .collect()
    }
}

/// Loads and validates a [`BinIndex`] artifact.
/// Handles decompression automatically based on file extension.
pub fn load_index(path: &Path) -> Result<BinIndex> {
    info!("Loading reference index from: {:?}", path);
    if !path.exists() {
        return Err(OrionDistError::FileNotFound(path.to_string_lossy().into_owned()).into());
    }
    let mut reader = get_input_reader(path)
        .with_context(|| format!("Failed to get input reader for reference index: {:?}", path))?;

    let index: BinIndex = bincode::deserialize_from(&mut reader)
        .map_err(|e| OrionDistError::IndexLoad(format!("{:?}: {}", path, e)))?;
    index.validate()?;

    info!(
        "Successfully loaded reference index from {:?} (k={}, {} bins, fpr={})",
        path,
        index.k,
        index.bins.len(),
        index.false_positive_rate()
    );
    Ok(index)
}

/// Writes a [`BinIndex`] artifact, compressed according to the extension.
pub fn save_index(index: &BinIndex, path: &Path) -> Result<()> {
    debug!("Writing reference index with {} bins to {:?}", index.bins.len(), path);
    let mut writer = get_output_writer(path)
        .with_context(|| format!("Failed to get output writer for reference index: {:?}", path))?;
    bincode::serialize_into(&mut writer, index)
        .with_context(|| format!("Failed to serialize reference index to {:?}", path))?;
    writer
        .flush()
        .context("Failed to flush reference index writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn two_bin_index() -> BinIndex {
        let mut index = BinIndex::new(21, 7);
        index.add_bin(BinMeta::new("a", "a.fa", Some(3)), BinFilter::exact([1, 2, 3]));
        index.add_bin(BinMeta::new("b", "b.fa", Some(2)), BinFilter::exact([3, 4]));
        index
    }

    #[test]
    fn test_query_counts_per_bin() {
        let index = two_bin_index();
        assert_eq!(index.bin_names(), vec!["a", "b"]);
        assert_eq!(index.query(&[1, 3, 4, 9]), vec![2, 2]);
        assert_eq!(index.query(&[]), vec![0, 0]);
        // Duplicates count per occurrence
        assert_eq!(index.query(&[3, 3]), vec![2, 2]);
        assert_eq!(index.false_positive_rate(), 0.0);
    }

    #[test]
    fn test_bloom_bins_report_rate() {
        let hashes: HashSet<u64> = (0..1000u64).map(crate::kmer::mix64).collect();
        let mut index = BinIndex::new(21, 0);
        index.add_bin(BinMeta::new("x", "x.fa", None), BinFilter::bloom(&hashes, 0.01));
        let fpr = index.false_positive_rate();
        assert!(fpr > 0.0 && fpr < 0.02, "fpr {}", fpr);
        let all: Vec<u64> = hashes.iter().copied().collect();
        assert_eq!(index.query(&all), vec![1000]);
        // Observed rate on absent hashes stays near the target
        let absent: Vec<u64> = (1000..101_000u64).map(crate::kmer::mix64).collect();
        let false_hits = index.query(&absent)[0];
        assert!(false_hits < 2_000, "{} false hits", false_hits);
    }

    #[test]
    fn test_bloom_bin_survives_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let hashes: HashSet<u64> = (0..500u64).map(crate::kmer::mix64).collect();
        let mut index = BinIndex::new(15, 3);
        index.add_bin(BinMeta::new("b", "b.fa", Some(500)), BinFilter::bloom(&hashes, 0.05));
        let lookups: Vec<u64> = (0..5_000u64).map(crate::kmer::mix64).collect();
        let before = index.query(&lookups);

        let path = dir.path().join("bloom.idx.gz");
        save_index(&index, &path)?;
        let loaded = load_index(&path)?;
        assert_eq!(loaded.filters()[0].kind(), "bloom");
        assert_eq!(loaded.query(&lookups), before);
        assert_eq!(loaded.false_positive_rate(), index.false_positive_rate());
        Ok(())
    }

    #[test]
    fn test_multi_file_bin_is_rejected() {
        let mut index = two_bin_index();
        index.add_bin(
            BinMeta {
                name: "multi".into(),
                files: vec!["m1.fa".into(), "m2.fa".into()],
                cardinality: None,
            },
            BinFilter::exact([5]),
        );
        match index.validate() {
            Err(OrionDistError::MultiFileBin { name, count }) => {
                assert_eq!(name, "multi");
                assert_eq!(count, 2);
            }
            other => panic!("expected MultiFileBin, got {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load_compressed() -> Result<()> {
        let dir = TempDir::new()?;
        for name in ["index.bin", "index.bin.gz", "index.bin.zst"] {
            let path = dir.path().join(name);
            save_index(&two_bin_index(), &path)?;
            let loaded = load_index(&path)?;
            assert_eq!(loaded.kmer_size(), 21);
            assert_eq!(loaded.seed(), 7);
            assert_eq!(loaded.bins(), two_bin_index().bins());
            assert_eq!(loaded.query(&[1, 4]), vec![1, 1]);
        }
        Ok(())
    }

    #[test]
    fn test_load_rejects_garbage() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"definitely not an index")?;
        let err = load_index(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to load reference index"), "{}", err);
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_index(Path::new("/nonexistent/index.bin")).unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }
}
