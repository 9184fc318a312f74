use super::ScoringStrategy;
use crate::error::{EngineError, Result};
use crate::models::{popularity_score, Item, ItemId, ScoredItem, StrategyKind, UserProfile};
use crate::services::similarity::SparseRatingMatrix;
use crate::utils::sort_scored;
use std::collections::HashMap;
use tracing::info;

/// Global ranking by `mean_rating * ln(members + 1)`.
///
/// Always available: with no ratings processed it ranks the catalog by
/// its published mean score and community size.
#[derive(Debug, Clone, Default)]
pub struct PopularityStrategy {
    ranking: Vec<ScoredItem>,
    weights: HashMap<ItemId, f64>,
    /// Mean rating per item, the rating-scale estimate for RMSE/MAE
    means: HashMap<ItemId, f64>,
}

impl PopularityStrategy {
    /// Catalog-only ranking
    pub fn from_catalog(items: &[Item]) -> Self {
        let entries = items
            .iter()
            .map(|item| (item.item_id, item.mean_score, item.members));
        Self::from_entries(entries)
    }

    /// Recompute weights from a rating snapshot: snapshot mean where the item
    /// was rated (catalog mean otherwise), and the larger of the published
    /// community size and the distinct rater count.
    pub fn fit(items: &[Item], matrix: &SparseRatingMatrix) -> Result<Self> {
        if items.is_empty() {
            return Err(EngineError::DataInsufficient(
                "catalog is empty".to_string(),
            ));
        }

        let entries = items.iter().map(|item| match matrix.item_stats(item.item_id) {
            Some((mean, raters)) => (item.item_id, mean, item.members.max(raters as u64)),
            None => (item.item_id, item.mean_score, item.members),
        });
        let model = Self::from_entries(entries);

        info!(
            items = model.ranking.len(),
            rated_items = matrix.item_count(),
            "Popularity ranking recomputed"
        );
        Ok(model)
    }

    fn from_entries(entries: impl Iterator<Item = (ItemId, f64, u64)>) -> Self {
        let mut weights = HashMap::new();
        let mut means = HashMap::new();
        for (item_id, mean, members) in entries {
            weights.insert(item_id, popularity_score(mean, members));
            if mean > 0.0 {
                means.insert(item_id, mean);
            }
        }

        let mut ranking: Vec<ScoredItem> = weights
            .iter()
            .map(|(item_id, score)| ScoredItem {
                item_id: *item_id,
                score: *score,
            })
            .collect();
        sort_scored(&mut ranking);

        Self {
            ranking,
            weights,
            means,
        }
    }

    /// Top `n` items, skipping anything in `exclude`
    pub fn top(&self, n: usize, exclude: impl Fn(ItemId) -> bool) -> Vec<ScoredItem> {
        self.ranking
            .iter()
            .filter(|s| !exclude(s.item_id))
            .take(n)
            .copied()
            .collect()
    }

    pub fn weights(&self) -> &HashMap<ItemId, f64> {
        &self.weights
    }

    pub fn weight(&self, item_id: ItemId) -> f64 {
        self.weights.get(&item_id).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.ranking.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranking.is_empty()
    }
}

impl ScoringStrategy for PopularityStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Popularity
    }

    fn score_candidates(&self, profile: &UserProfile) -> Result<HashMap<ItemId, f64>> {
        Ok(self
            .weights
            .iter()
            .filter(|(item_id, _)| !profile.has_interacted(**item_id))
            .map(|(item_id, score)| (*item_id, *score))
            .collect())
    }

    fn predict_score(&self, _profile: &UserProfile, item_id: ItemId) -> Option<f64> {
        self.means.get(&item_id).copied()
    }

    fn rank(&self, _profile: &UserProfile, scores: HashMap<ItemId, f64>) -> Vec<ScoredItem> {
        // already sorted; keep the precomputed order
        self.ranking
            .iter()
            .filter(|s| scores.contains_key(&s.item_id))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{item, rating};
    use super::*;
    use crate::models::UserId;

    #[test]
    fn test_catalog_ranking_without_ratings() {
        let items = vec![
            item(1, &[], 9.0, 0),
            item(2, &[], 7.0, 1000),
            item(3, &[], 8.0, 1000),
        ];
        let model = PopularityStrategy::from_catalog(&items);

        let ids: Vec<u64> = model.top(10, |_| false).iter().map(|s| s.item_id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(model.weight(ItemId(1)), 0.0);
    }

    #[test]
    fn test_fit_uses_snapshot_mean_and_rater_count() {
        let items = vec![item(1, &[], 2.0, 1), item(2, &[], 5.0, 100)];
        let matrix = SparseRatingMatrix::from_ratings(&[
            rating(1, 1, 10),
            rating(2, 1, 10),
            rating(3, 1, 10),
        ]);
        let model = PopularityStrategy::fit(&items, &matrix).unwrap();

        // item 1: mean 10 over 3 raters (3 > published 1)
        assert!((model.weight(ItemId(1)) - 10.0 * 4f64.ln()).abs() < 1e-9);
        // item 2 unrated: catalog values
        assert!((model.weight(ItemId(2)) - 5.0 * 101f64.ln()).abs() < 1e-9);
        assert_eq!(model.predict_score(&UserProfile::new(UserId(9)), ItemId(1)), Some(10.0));
    }

    #[test]
    fn test_recommend_excludes_interacted() {
        let items = vec![item(1, &[], 9.0, 10), item(2, &[], 8.0, 10), item(3, &[], 7.0, 10)];
        let model = PopularityStrategy::from_catalog(&items);
        let mut profile = UserProfile::new(UserId(1));
        profile.interacted.insert(ItemId(1));

        let recs = model.recommend(&profile, 5).unwrap();
        let ids: Vec<u64> = recs.iter().map(|s| s.item_id.0).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(model.top(5, |id| profile.has_interacted(id)), recs);
    }

    #[test]
    fn test_fit_rejects_empty_catalog() {
        let matrix = SparseRatingMatrix::default();
        assert!(PopularityStrategy::fit(&[], &matrix).unwrap_err().is_data_insufficient());
    }
}
