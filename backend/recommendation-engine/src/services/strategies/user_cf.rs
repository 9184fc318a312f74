use super::ScoringStrategy;
use crate::config::{SimilarityConfig, StrategyConfig};
use crate::error::{EngineError, Result};
use crate::models::{ItemId, StrategyKind, UserId, UserProfile};
use crate::services::similarity::{user_similarity, SimilarityMatrix, SparseRatingMatrix};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// User-based collaborative filtering.
///
/// Prediction for item `j`: similarity-weighted mean of the ratings given
/// to `j` by the k most similar users who rated it (sim > 0). Users not
/// present in the fitted matrix cannot be scored.
#[derive(Debug, Clone)]
pub struct UserCfStrategy {
    similarity: SimilarityMatrix<UserId>,
    ratings: Arc<SparseRatingMatrix>,
    k_neighbors: usize,
    min_neighbors: usize,
}

impl UserCfStrategy {
    pub fn fit(
        ratings: Arc<SparseRatingMatrix>,
        similarity: &SimilarityConfig,
        strategy: &StrategyConfig,
    ) -> Result<Self> {
        let similarity = user_similarity(&ratings, similarity.min_co_raters);
        if similarity.is_empty() {
            return Err(EngineError::DataInsufficient(format!(
                "no user pairs share rated items ({} users, {} items)",
                ratings.user_count(),
                ratings.item_count()
            )));
        }

        info!(
            users = similarity.len(),
            pairs = similarity.pair_count(),
            k = strategy.k_neighbors,
            "User-CF model fitted"
        );

        Ok(Self {
            similarity,
            ratings,
            k_neighbors: strategy.k_neighbors,
            min_neighbors: strategy.min_neighbors,
        })
    }

    pub fn similarity(&self) -> &SimilarityMatrix<UserId> {
        &self.similarity
    }

    /// Up to k positive-similarity neighbors of `user_id` who rated `item_id`
    fn raters_of(&self, user_id: UserId, item_id: ItemId) -> Vec<(f64, f64)> {
        let Some(column) = self.ratings.column(item_id) else {
            return Vec::new();
        };

        self.similarity
            .neighbors(user_id)
            .iter()
            .filter(|(_, sim)| *sim > 0.0)
            .filter_map(|(neighbor, sim)| column.get(neighbor).map(|r| (*sim, *r)))
            .take(self.k_neighbors)
            .collect()
    }
}

impl ScoringStrategy for UserCfStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UserCf
    }

    fn score_candidates(&self, profile: &UserProfile) -> Result<HashMap<ItemId, f64>> {
        if !self.similarity.contains(profile.user_id) {
            return Err(EngineError::DataInsufficient(format!(
                "user {} has no similar users",
                profile.user_id
            )));
        }

        let candidates: HashSet<ItemId> = self
            .similarity
            .neighbors(profile.user_id)
            .iter()
            .filter(|(_, sim)| *sim > 0.0)
            .filter_map(|(neighbor, _)| self.ratings.row(*neighbor))
            .flat_map(|row| row.keys().copied())
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
            neighbors = self.similarity.neighbors(profile.user_id).len(),
            scored = scores.len(),
            "User-CF scoring"
        );
        Ok(scores)
    }

    fn predict_score(&self, profile: &UserProfile, item_id: ItemId) -> Option<f64> {
        let raters = self.raters_of(profile.user_id, item_id);
        if raters.len() < self.min_neighbors {
            return None;
        }

        let (weighted, total) = raters
            .iter()
            .fold((0.0, 0.0), |(w, t), (sim, r)| (w + sim * r, t + sim));
        (total > 0.0).then(|| weighted / total)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::rating;
    use super::*;

    fn model() -> UserCfStrategy {
        let matrix = SparseRatingMatrix::from_ratings(&[
            rating(1, 1, 8),
            rating(1, 2, 7),
            rating(2, 1, 7),
            rating(2, 2, 8),
            rating(2, 3, 9),
            rating(3, 1, 9),
            rating(3, 2, 6),
            rating(3, 3, 5),
            rating(4, 4, 10),
        ]);
        UserCfStrategy::fit(
            Arc::new(matrix),
            &SimilarityConfig::default(),
            &StrategyConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_prediction_from_similar_users() {
        let model = model();
        let profile = UserProfile::new(UserId(1))
            .with_rating(ItemId(1), 8)
            .with_rating(ItemId(2), 7);

        let predicted = model.predict_score(&profile, ItemId(3)).unwrap();
        let s2 = model.similarity().get(UserId(1), UserId(2));
        let s3 = model.similarity().get(UserId(1), UserId(3));
        let expected = (s2 * 9.0 + s3 * 5.0) / (s2 + s3);
        assert!((predicted - expected).abs() < 1e-9);

        let scores = model.score_candidates(&profile).unwrap();
        assert_eq!(scores.keys().copied().collect::<Vec<_>>(), vec![ItemId(3)]);
    }

    #[test]
    fn test_isolated_user_is_insufficient() {
        let model = model();
        let profile = UserProfile::new(UserId(4)).with_rating(ItemId(4), 10);
        assert!(model.score_candidates(&profile).unwrap_err().is_data_insufficient());

        let unknown = UserProfile::new(UserId(77)).with_rating(ItemId(1), 5);
        assert!(model.score_candidates(&unknown).unwrap_err().is_data_insufficient());
    }

    #[test]
    fn test_single_rater_is_not_scorable() {
        let model = model();
        let profile = UserProfile::new(UserId(2))
            .with_rating(ItemId(1), 7)
            .with_rating(ItemId(2), 8)
            .with_rating(ItemId(3), 9);
        // only user 4 rated item 4, and user 4 is not a neighbor
        assert_eq!(model.predict_score(&profile, ItemId(4)), None);
    }
}
