use std::collections::HashMap;
use std::hash::Hash;

/// Sparse symmetric similarity matrix.
///
/// Absent pairs read as 0 and the diagonal is never stored. Once built
/// the matrix is only read; retraining builds a new one.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix<K: Copy + Eq + Hash + Ord> {
    entries: HashMap<K, HashMap<K, f64>>,
    /// Per-key neighbors, similarity desc then key asc
    ranked: HashMap<K, Vec<(K, f64)>>,
    pairs: usize,
}

impl<K: Copy + Eq + Hash + Ord> SimilarityMatrix<K> {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            ranked: HashMap::new(),
            pairs: 0,
        }
    }

    pub(super) fn insert_pair(&mut self, a: K, b: K, value: f64) {
        if a == b {
            return;
        }
        let previous = self.entries.entry(a).or_default().insert(b, value);
        self.entries.entry(b).or_default().insert(a, value);
        if previous.is_none() {
            self.pairs += 1;
        }
    }

    pub(super) fn finalize(&mut self) {
        self.ranked = self
            .entries
            .iter()
            .map(|(key, row)| {
                let mut neighbors: Vec<(K, f64)> = row.iter().map(|(k, v)| (*k, *v)).collect();
                neighbors.sort_by(|x, y| {
                    y.1.partial_cmp(&x.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| x.0.cmp(&y.0))
                });
                (*key, neighbors)
            })
            .collect();
    }

    pub fn get(&self, a: K, b: K) -> f64 {
        if a == b {
            return 0.0;
        }
        self.entries
            .get(&a)
            .and_then(|row| row.get(&b))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn neighbors(&self, key: K) -> &[(K, f64)] {
        self.ranked.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of keys with at least one non-zero neighbor
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs
    }
}

impl<K: Copy + Eq + Hash + Ord> Default for SimilarityMatrix<K> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbors_sorted_and_symmetric() {
        let mut m: SimilarityMatrix<u32> = SimilarityMatrix::empty();
        m.insert_pair(1, 2, 0.3);
        m.insert_pair(1, 3, 0.9);
        m.insert_pair(1, 4, 0.3);
        m.insert_pair(5, 5, 1.0);
        m.finalize();

        assert_eq!(m.neighbors(1), &[(3, 0.9), (2, 0.3), (4, 0.3)]);
        assert_eq!(m.get(3, 1), 0.9);
        assert_eq!(m.get(5, 5), 0.0);
        assert!(!m.contains(5));
        assert_eq!(m.pair_count(), 3);
        assert!(m.neighbors(42).is_empty());
    }
}
