use super::ScoringStrategy;
use crate::config::{SimilarityConfig, StrategyConfig};
use crate::error::{EngineError, Result};
use crate::models::{ItemId, StrategyKind, UserProfile};
use crate::services::similarity::{item_similarity, SimilarityMatrix, SparseRatingMatrix};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Item-based collaborative filtering.
///
/// Prediction for an unseen item `j`:
///   sum(sim(i, j) * r(u, i)) / sum(sim(i, j))
/// over the k most similar items `i` the user rated, with sim > 0.
/// Fewer than `min_neighbors` such items makes `j` unscorable.
#[derive(Debug, Clone)]
pub struct ItemCfStrategy {
    similarity: SimilarityMatrix<ItemId>,
    k_neighbors: usize,
    min_neighbors: usize,
}

impl ItemCfStrategy {
    pub fn fit(
        matrix: &SparseRatingMatrix,
        similarity: &SimilarityConfig,
        strategy: &StrategyConfig,
    ) -> Result<Self> {
        let similarity = item_similarity(matrix, similarity.min_co_raters);
        if similarity.is_empty() {
            return Err(EngineError::DataInsufficient(format!(
                "no item pairs share raters ({} users, {} items)",
                matrix.user_count(),
                matrix.item_count()
            )));
        }

        info!(
            items = similarity.len(),
            pairs = similarity.pair_count(),
            k = strategy.k_neighbors,
            "Item-CF model fitted"
        );

        Ok(Self {
            similarity,
            k_neighbors: strategy.k_neighbors,
            min_neighbors: strategy.min_neighbors,
        })
    }

    pub fn similarity(&self) -> &SimilarityMatrix<ItemId> {
        &self.similarity
    }
}

impl ScoringStrategy for ItemCfStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ItemCf
    }

    fn score_candidates(&self, profile: &UserProfile) -> Result<HashMap<ItemId, f64>> {
        if profile.ratings.is_empty() {
            return Err(EngineError::DataInsufficient(format!(
                "user {} has no scored ratings",
                profile.user_id
            )));
        }

        let candidates: HashSet<ItemId> = profile
            .ratings
            .keys()
            .flat_map(|rated| self.similarity.neighbors(*rated))
            .filter(|(_, sim)| *sim > 0.0)
            .map(|(item_id, _)| *item_id)
            .filter(|item_id| !profile.has_interacted(*item_id))
            .collect();

        let scores: HashMap<ItemId, f64> = candidates
            .into_iter()
            .filter_map(|item_id| {
                self.predict_score(profile, item_id)
                    .map(|score| (item_id, score))
            })
            .collect();

        debug!(
            user_id = %profile.user_id,
            rated = profile.ratings.len(),
            scored = scores.len(),
            "Item-CF scoring"
        );
        Ok(scores)
    }

    fn predict_score(&self, profile: &UserProfile, item_id: ItemId) -> Option<f64> {
        let mut neighbors: Vec<(ItemId, f64, f64)> = profile
            .ratings
            .iter()
            .filter(|(rated, _)| **rated != item_id)
            .map(|(rated, r)| (*rated, self.similarity.get(*rated, item_id), *r as f64))
            .filter(|(_, sim, _)| *sim > 0.0)
            .collect();

        if neighbors.len() < self.min_neighbors {
            return None;
        }

        neighbors.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        neighbors.truncate(self.k_neighbors);

        let (weighted, total) = neighbors
            .iter()
            .fold((0.0, 0.0), |(w, t), (_, sim, r)| (w + sim * r, t + sim));
        (total > 0.0).then(|| weighted / total)
    }
}
