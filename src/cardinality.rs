use probabilistic_collections::{SipHasherBuilder, hyperloglog};
use std::collections::HashSet;

/// How the k-mer set size of a file is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalityMode {
    /// Keep every distinct hash. Exact, memory grows with the file.
    Exact,
    /// HyperLogLog with 2^precision one-byte registers.
    HyperLogLog { precision: u8 },
}

pub const MIN_HLL_PRECISION: u8 = 4;
pub const MAX_HLL_PRECISION: u8 = 16;

// Fixed SipHash keys: every counter in every run hashes identically, so
// estimates do not depend on which worker or which run saw the file.
const HLL_KEYS: (u64, u64) = (0x6f72_696f_6e2d_6469, 0x7374_2d68_6c6c_0001);

/// Standard error of a HyperLogLog with `2^precision` registers,
/// `1.04 / sqrt(2^precision)`, nudged up so the register count derived from
/// it does not round past `precision`.
pub fn hll_error_probability(precision: u8) -> f64 {
    1.04 / f64::from(1u32 << precision).sqrt() * (1.0 + 1e-9)
}

/// Distinct counter over k-mer hashes.
pub struct HyperLogLog {
    inner: hyperloglog::HyperLogLog<u64>,
}

impl HyperLogLog {
    /// `precision` must lie in 4..=16.
    pub fn new(precision: u8) -> Self {
        assert!(
            (MIN_HLL_PRECISION..=MAX_HLL_PRECISION).contains(&precision),
            "HyperLogLog precision out of range: {}",
            precision
        );
        let (k0, k1) = HLL_KEYS;
        HyperLogLog {
            inner: hyperloglog::HyperLogLog::with_hasher(
                hll_error_probability(precision),
                SipHasherBuilder::from_seed(k0, k1),
            ),
        }
    }

    #[inline]
    pub fn add(&mut self, hash: u64) {
        self.inner.insert(&hash);
    }

    pub fn estimate(&self) -> u64 {
        // Saturating cast: a slightly negative estimate on an empty counter is 0
        self.inner.len().round() as u64
    }
}

impl std::fmt::Debug for HyperLogLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperLogLog")
            .field("estimate", &self.estimate())
            .finish()
    }
}

/// Per-file cardinality counter, chosen by [`CardinalityMode`].
#[derive(Debug)]
pub enum CardinalityCounter {
    Exact(HashSet<u64>),
    HyperLogLog(HyperLogLog),
}

impl CardinalityCounter {
    pub fn new(mode: CardinalityMode) -> Self {
        match mode {
            CardinalityMode::Exact => CardinalityCounter::Exact(HashSet::new()),
            CardinalityMode::HyperLogLog { precision } => {
                CardinalityCounter::HyperLogLog(HyperLogLog::new(precision))
            }
        }
    }

    #[inline]
    pub fn add(&mut self, hash: u64) {
        match self {
            CardinalityCounter::Exact(set) => {
                set.insert(hash);
            }
            CardinalityCounter::HyperLogLog(hll) => hll.add(hash),
        }
    }

    pub fn cardinality(&self) -> u64 {
        match self {
            CardinalityCounter::Exact(set) => set.len() as u64,
            CardinalityCounter::HyperLogLog(hll) => hll.estimate(),
        }
    }
}
