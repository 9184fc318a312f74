// ============================================
// Similarity Engine
// ============================================
//
// Item-item and user-user cosine similarity over the sparse rating
// matrix. Work is proportional to the number of co-rating pairs: for
// every user row we only visit pairs of items that user actually rated
// (and symmetrically for item columns).

mod matrix;

pub use matrix::SimilarityMatrix;

use crate::models::{ItemId, ScoredRating, UserId};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, info};

/// Ratings indexed both ways: rows (user -> item -> score) and columns
/// (item -> user -> score). Unscored rows never reach this type.
#[derive(Debug, Clone, Default)]
pub struct SparseRatingMatrix {
    rows: HashMap<UserId, HashMap<ItemId, f64>>,
    columns: HashMap<ItemId, HashMap<UserId, f64>>,
    rating_count: usize,
}

impl SparseRatingMatrix {
    pub fn from_ratings(ratings: &[ScoredRating]) -> Self {
        let mut matrix = Self::default();
        for rating in ratings {
            let score = rating.score as f64;
            let previous = matrix
                .rows
                .entry(rating.user_id)
                .or_default()
                .insert(rating.item_id, score);
            matrix
                .columns
                .entry(rating.item_id)
                .or_default()
                .insert(rating.user_id, score);
            if previous.is_none() {
                matrix.rating_count += 1;
            }
        }
        matrix
    }

    pub fn row(&self, user_id: UserId) -> Option<&HashMap<ItemId, f64>> {
        self.rows.get(&user_id)
    }

    pub fn column(&self, item_id: ItemId) -> Option<&HashMap<UserId, f64>> {
        self.columns.get(&item_id)
    }

    pub fn score(&self, user_id: UserId, item_id: ItemId) -> Option<f64> {
        self.rows.get(&user_id)?.get(&item_id).copied()
    }

    pub fn user_count(&self) -> usize {
        self.rows.len()
    }

    pub fn item_count(&self) -> usize {
        self.columns.len()
    }

    pub fn rating_count(&self) -> usize {
        self.rating_count
    }

    pub fn rows(&self) -> &HashMap<UserId, HashMap<ItemId, f64>> {
        &self.rows
    }

    pub fn columns(&self) -> &HashMap<ItemId, HashMap<UserId, f64>> {
        &self.columns
    }

    /// Mean score and distinct rater count of an item
    pub fn item_stats(&self, item_id: ItemId) -> Option<(f64, usize)> {
        let column = self.columns.get(&item_id)?;
        if column.is_empty() {
            return None;
        }
        let sum: f64 = column.values().sum();
        Some((sum / column.len() as f64, column.len()))
    }
}

/// Cosine similarity between item columns
pub fn item_similarity(matrix: &SparseRatingMatrix, min_co_raters: usize) -> SimilarityMatrix<ItemId> {
    if matrix.user_count() < 2 || matrix.item_count() < 2 {
        debug!(
            users = matrix.user_count(),
            items = matrix.item_count(),
            "Too few rated entities for item similarity"
        );
        return SimilarityMatrix::empty();
    }

    let similarity = cosine(matrix.columns(), matrix.rows(), min_co_raters);
    info!(
        items = matrix.item_count(),
        pairs = similarity.pair_count(),
        "Built item similarity matrix"
    );
    similarity
}

/// Cosine similarity between user rows
pub fn user_similarity(matrix: &SparseRatingMatrix, min_co_raters: usize) -> SimilarityMatrix<UserId> {
    if matrix.user_count() < 2 || matrix.item_count() < 2 {
        debug!(
            users = matrix.user_count(),
            items = matrix.item_count(),
            "Too few rated entities for user similarity"
        );
        return SimilarityMatrix::empty();
    }

    let similarity = cosine(matrix.rows(), matrix.columns(), min_co_raters);
    info!(
        users = matrix.user_count(),
        pairs = similarity.pair_count(),
        "Built user similarity matrix"
    );
    similarity
}

/// `vectors` holds the entities being compared; `dimensions` is the same
/// data transposed, used to enumerate only co-occurring pairs.
fn cosine<K, D>(
    vectors: &HashMap<K, HashMap<D, f64>>,
    dimensions: &HashMap<D, HashMap<K, f64>>,
    min_co_raters: usize,
) -> SimilarityMatrix<K>
where
    K: Copy + Eq + Hash + Ord,
    D: Eq + Hash,
{
    let norms: HashMap<K, f64> = vectors
        .iter()
        .map(|(key, v)| (*key, v.values().map(|x| x * x).sum::<f64>().sqrt()))
        .collect();

    // (a, b) with a < b -> (dot product, co-rater count)
    let mut accumulators: HashMap<(K, K), (f64, usize)> = HashMap::new();
    for entries in dimensions.values() {
        let mut keyed: Vec<(K, f64)> = entries.iter().map(|(k, v)| (*k, *v)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        for (i, (a, va)) in keyed.iter().enumerate() {
            for (b, vb) in &keyed[i + 1..] {
                let acc = accumulators.entry((*a, *b)).or_insert((0.0, 0));
                acc.0 += va * vb;
                acc.1 += 1;
            }
        }
    }

    let mut similarity = SimilarityMatrix::empty();
    for ((a, b), (dot, co_raters)) in accumulators {
        if co_raters < min_co_raters {
            continue;
        }
        let denom = norms.get(&a).copied().unwrap_or(0.0) * norms.get(&b).copied().unwrap_or(0.0);
        if denom <= 0.0 {
            continue;
        }
        let value = (dot / denom).clamp(-1.0, 1.0);
        if value != 0.0 {
            similarity.insert_pair(a, b, value);
        }
    }
    similarity.finalize();
    similarity
}
