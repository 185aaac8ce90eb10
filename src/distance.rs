//! Similarity estimators.
//!
//! All functions are pure and never panic. Degenerate inputs (zero
//! denominators) produce non-finite values that flow into the output as-is.

/// Score written for every bin of a file that could not be processed.
pub const SENTINEL: f64 = f64::NAN;

/// Fraction of the sketch found in a reference bin: `count / sketch_size`.
///
/// Lies in [0, 1] for `count <= sketch_size`. A zero `sketch_size` yields a
/// non-finite value.
#[inline]
pub fn containment(count: u32, sketch_size: u32) -> f64 {
    f64::from(count) / f64::from(sketch_size)
}

/// Containment corrected for the index false-positive rate, converted into
/// a Jaccard estimate.
///
/// A is the query set, B the reference set:
///
/// ```text
/// C_est = count / sketch_size - fpr
/// J_est = |A| * C_est / (|A| + |B| - |A| * C_est)
/// ```
///
/// No clamping: `C_est` may be negative and `J_est` may leave [0, 1].
pub fn corrected_jaccard(count: u32, sketch_size: u32, fpr: f64, size_a: u64, size_b: u64) -> f64 {
    let c_est = containment(count, sketch_size) - fpr;
    let size_a = size_a as f64;
    let numerator = size_a * c_est;
    numerator / (size_a + size_b as f64 - numerator)
}

/// Exact Jaccard index from a true intersection count:
/// `count / (|A| + |B| - count)`.
pub fn exact_jaccard(count: u32, size_a: u64, size_b: u64) -> f64 {
    let count = f64::from(count);
    count / (size_a as f64 + size_b as f64 - count)
}

/// Clamps a score into [0, 1]. NaN stays NaN.
#[inline]
pub fn clamped(score: f64) -> f64 {
    if score.is_nan() {
        score
    } else {
        score.clamp(0.0, 1.0)
    }
}
