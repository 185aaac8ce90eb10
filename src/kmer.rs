// Canonical k-mer encoding and seeded hashing

/// 2-bit code of a nucleotide (A=0, C=1, G=2, T=3), case-insensitive.
/// Anything else, including `N`, has no code.
#[inline]
pub fn encode_base(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Packs exactly `k` bases (1 <= k <= 32) into the low `2k` bits, first base
/// most significant.
pub fn seq_to_u64(seq: &[u8], k: u8) -> Option<u64> {
    if !(1..=32).contains(&k) || seq.len() != usize::from(k) {
        return None;
    }
    seq.iter()
        .try_fold(0u64, |acc, &base| Some((acc << 2) | encode_base(base)?))
}

/// Reverse complement of a packed k-mer.
pub fn reverse_complement_u64(kmer: u64, k: u8) -> u64 {
    assert!((1..=32).contains(&k), "k-mer length out of range: {}", k);
    // Complementing flips each 2-bit code (A<->T, C<->G); then reverse the
    // order of the 32 two-bit groups and drop the unused low groups.
    let mut x = !kmer;
    x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    x = ((x >> 4) & 0x0f0f_0f0f_0f0f_0f0f) | ((x & 0x0f0f_0f0f_0f0f_0f0f) << 4);
    x.swap_bytes() >> (64 - 2 * u32::from(k))
}

/// The smaller of a k-mer and its reverse complement, so both strands of
/// the same locus encode identically.
#[inline]
pub fn canonical_u64(kmer: u64, k: u8) -> u64 {
    kmer.min(reverse_complement_u64(kmer, k))
}

/// 64-bit finalizer (MurmurHash3 fmix64). Bijective, so distinct canonical
/// k-mers never collide for a fixed seed.
#[inline]
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

/// Seeded canonical k-mer hasher.
///
/// Both the query side (sketches, cardinality counters) and the reference
/// index must hash with the same `k` and `seed`, otherwise every distance is
/// meaningless. The pipeline takes the seed from the loaded index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerHasher {
    k: u8,
    seed: u64,
    mask: u64,
}

impl KmerHasher {
    /// Returns `None` if `k` is outside 1..=32.
    pub fn new(k: u8, seed: u64) -> Option<Self> {
        if k == 0 || k > 32 {
            return None;
        }
        let mask = if k == 32 {
            u64::MAX
        } else {
            (1u64 << (2 * k)) - 1
        };
        Some(KmerHasher { k, seed, mask })
    }

    pub fn k(&self) -> u8 {
        self.k
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Hashes an already canonical 2-bit encoded k-mer.
    #[inline]
    pub fn hash_canonical(&self, canonical: u64) -> u64 {
        mix64(canonical ^ self.seed)
    }

    /// Calls `emit` with the hash of every canonical k-mer in `seq`, left to
    /// right. Windows containing a non-ACGT base are skipped.
    pub fn for_each_hash<F: FnMut(u64)>(&self, seq: &[u8], mut emit: F) {
        let k = self.k as usize;
        let rc_shift = 2 * (self.k - 1);
        let mut fwd: u64 = 0;
        let mut rev: u64 = 0;
        let mut valid = 0usize;

        for &base in seq {
            let Some(code) = encode_base(base) else {
                valid = 0;
                fwd = 0;
                rev = 0;
                continue;
            };
            fwd = ((fwd << 2) | code) & self.mask;
            rev = (rev >> 2) | ((code ^ 0b11) << rc_shift);
            valid += 1;
            if valid >= k {
                emit(self.hash_canonical(fwd.min(rev)));
            }
        }
    }

    /// Collects the hashes of `seq` into a vector.
    pub fn hashes(&self, seq: &[u8]) -> Vec<u64> {
        let mut out = Vec::with_capacity(seq.len().saturating_sub(self.k as usize - 1));
        self.for_each_hash(seq, |h| out.push(h));
        out
    }
}
