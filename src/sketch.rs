use std::collections::BinaryHeap;

/// Bounded bottom-S min-hash sketch.
///
/// Keeps the `capacity` numerically smallest hash values seen so far in a
/// max-heap, so the current maximum (the eviction candidate) is always at the
/// top. Values are not deduplicated: inserting the same hash twice occupies
/// two slots, which makes this an approximation of a true k-minimum-values
/// set when the input contains repeated k-mers.
///
/// A sketch belongs to exactly one file and one worker; it is not meant to be
/// shared across threads while being filled.
#[derive(Debug, Clone)]
pub struct MinSketch {
    capacity: usize,
    heap: BinaryHeap<u64>,
}

impl MinSketch {
    pub fn new(capacity: usize) -> Self {
        MinSketch {
            capacity,
            // Cap the upfront allocation; large sketches grow on demand.
            heap: BinaryHeap::with_capacity(capacity.min(1 << 16)),
        }
    }

    /// Offers a hash to the sketch.
    ///
    /// Below capacity the value is always kept. At capacity it replaces the
    /// current maximum only if strictly smaller.
    #[inline]
    pub fn insert(&mut self, hash: u64) {
        if self.heap.len() < self.capacity {
            self.heap.push(hash);
        } else if let Some(mut top) = self.heap.peek_mut() {
            if hash < *top {
                // Sifts down when `top` is dropped
                *top = hash;
            }
        }
    }

    pub fn extend_from<I: IntoIterator<Item = u64>>(&mut self, hashes: I) {
        for hash in hashes {
            self.insert(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// The largest retained value, if any.
    pub fn max(&self) -> Option<u64> {
        self.heap.peek().copied()
    }

    /// Retained values in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &u64> + '_ {
        self.heap.iter()
    }

    /// Consumes the sketch, returning its values in ascending order.
    pub fn into_values(self) -> Vec<u64> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::mix64;

    fn pseudo_random(n: usize, seed: u64) -> Vec<u64> {
        (0..n as u64).map(|i| mix64(i.wrapping_add(seed))).collect()
    }

    fn smallest(values: &[u64], s: usize) -> Vec<u64> {
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        sorted.truncate(s);
        sorted
    }

    #[test]
    fn test_size_is_min_of_inserts_and_capacity() {
        for (n, s) in [(0usize, 10usize), (5, 10), (10, 10), (1000, 10), (7, 1)] {
            let mut sketch = MinSketch::new(s);
            sketch.extend_from(pseudo_random(n, 3));
            assert_eq!(sketch.len(), n.min(s), "n={} s={}", n, s);
            assert_eq!(sketch.is_full(), n >= s);
        }
    }

    #[test]
    fn test_retains_smallest_values_regardless_of_order() {
        let values = pseudo_random(500, 99);
        let expected = smallest(&values, 32);

        let mut reversed = values.clone();
        reversed.reverse();
        let mut ascending = values.clone();
        ascending.sort_unstable();
        let mut descending = ascending.clone();
        descending.reverse();
        // Interleave the two halves
        let (left, right) = values.split_at(values.len() / 2);
        let interleaved: Vec<u64> = left
            .iter()
            .zip(right.iter())
            .flat_map(|(a, b)| [*b, *a])
            .collect();

        for order in [values, reversed, ascending, descending, interleaved] {
            let mut sketch = MinSketch::new(32);
            sketch.extend_from(order);
            assert_eq!(sketch.into_values(), expected);
        }
    }

    #[test]
    fn test_duplicates_are_not_collapsed() {
        let mut sketch = MinSketch::new(4);
        sketch.extend_from([5, 5, 5, 9, 1, 5]);
        assert_eq!(sketch.into_values(), vec![1, 5, 5, 5]);
    }

    #[test]
    fn test_equal_to_max_is_rejected() {
        let mut sketch = MinSketch::new(2);
        sketch.extend_from([3, 7]);
        sketch.insert(7);
        assert_eq!(sketch.max(), Some(7));
        assert_eq!(sketch.into_values(), vec![3, 7]);
    }

    #[test]
    fn test_zero_capacity_retains_nothing() {
        let mut sketch = MinSketch::new(0);
        sketch.extend_from([1, 2, 3]);
        assert!(sketch.is_empty());
        assert!(sketch.is_full());
        assert_eq!(sketch.max(), None);
    }

    #[test]
    fn test_values_matches_into_values() {
        let mut sketch = MinSketch::new(8);
        sketch.extend_from(pseudo_random(100, 1));
        let mut seen: Vec<u64> = sketch.values().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, sketch.into_values());
    }
}
