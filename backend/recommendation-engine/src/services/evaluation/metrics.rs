use crate::models::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Offline evaluation results attached to a model artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// `None` when no held-out rating was scorable
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub f1_at_k: f64,
    pub ndcg_at_k: f64,
    /// Fraction of the catalog appearing in at least one top-K list
    pub coverage: f64,
    /// Mean pairwise tag dissimilarity inside top-K lists
    pub diversity: Option<f64>,
    pub k: usize,
    /// Held-out ratings that received a prediction
    pub predictions: usize,
    /// Users with at least one relevant held-out rating
    pub ranked_users: usize,
}

/// Root mean squared error and mean absolute error over (predicted, actual)
pub fn rmse_mae(pairs: &[(f64, f64)]) -> (Option<f64>, Option<f64>) {
    if pairs.is_empty() {
        return (None, None);
    }
    let n = pairs.len() as f64;
    let squared: f64 = pairs.iter().map(|(p, a)| (p - a).powi(2)).sum();
    let absolute: f64 = pairs.iter().map(|(p, a)| (p - a).abs()).sum();
    (Some((squared / n).sqrt()), Some(absolute / n))
}

/// Ranking quality of one user's top-K list
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankingScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub ndcg: f64,
}

/// `relevant` maps held-out relevant items to their graded gain
pub fn ranking_scores(recommended: &[ItemId], relevant: &HashMap<ItemId, f64>, k: usize) -> RankingScores {
    if relevant.is_empty() || k == 0 {
        return RankingScores::default();
    }

    let top = &recommended[..recommended.len().min(k)];
    let hits = top.iter().filter(|item| relevant.contains_key(item)).count() as f64;

    let precision = hits / k as f64;
    let recall = hits / relevant.len() as f64;
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let dcg: f64 = top
        .iter()
        .enumerate()
        .filter_map(|(rank, item)| relevant.get(item).map(|gain| gain / discount(rank)))
        .sum();

    let mut ideal: Vec<f64> = relevant.values().copied().collect();
    ideal.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let idcg: f64 = ideal
        .iter()
        .take(k)
        .enumerate()
        .map(|(rank, gain)| gain / discount(rank))
        .sum();

    RankingScores {
        precision,
        recall,
        f1,
        ndcg: if idcg > 0.0 { dcg / idcg } else { 0.0 },
    }
}

/// log2(rank + 2) for a zero-based rank
fn discount(rank: usize) -> f64 {
    ((rank + 2) as f64).log2()
}

/// Mean pairwise Jaccard dissimilarity of feature tags; `None` for lists
/// shorter than two
pub fn intra_list_diversity(
    recommended: &[ItemId],
    tags: &HashMap<ItemId, &BTreeSet<String>>,
) -> Option<f64> {
    if recommended.len() < 2 {
        return None;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in recommended.iter().enumerate() {
        for b in &recommended[i + 1..] {
            total += 1.0 - jaccard(tags.get(a).copied(), tags.get(b).copied());
            pairs += 1;
        }
    }
    Some(total / pairs as f64)
}

fn jaccard(a: Option<&BTreeSet<String>>, b: Option<&BTreeSet<String>>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let union = a.union(b).count();
            if union == 0 {
                0.0
            } else {
                a.intersection(b).count() as f64 / union as f64
            }
        }
        _ => 0.0,
    }
}

pub fn coverage(recommended: &HashSet<ItemId>, catalog_size: usize) -> f64 {
    if catalog_size == 0 {
        0.0
    } else {
        recommended.len() as f64 / catalog_size as f64
    }
}
