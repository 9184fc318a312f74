// ============================================
// Evaluation Engine
// ============================================
//
// Offline metrics for a fitted strategy against a held-out partition:
// RMSE/MAE over scorable held-out ratings, and Precision/Recall/F1/NDCG@K
// plus catalog coverage and tag diversity over each user's top-K list.
// Only held-out ratings are ever compared against predictions.

mod metrics;
mod split;

pub use metrics::{
    coverage, intra_list_diversity, ranking_scores, rmse_mae, ModelMetrics, RankingScores,
};
pub use split::{leave_k_out, TrainTestSplit};

use crate::config::EvaluationConfig;
use crate::models::{Item, ItemId, ScoredRating, UserId, UserProfile};
use crate::services::strategies::ScoringStrategy;
use crate::utils::mean;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

pub struct Evaluator<'a> {
    config: &'a EvaluationConfig,
    /// Train-partition profiles keyed by user
    profiles: BTreeMap<UserId, UserProfile>,
    /// Held-out ratings of the sampled users
    held_out: BTreeMap<UserId, Vec<ScoredRating>>,
    tags: HashMap<ItemId, &'a BTreeSet<String>>,
    catalog_size: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a EvaluationConfig, split: &TrainTestSplit, catalog: &'a [Item]) -> Self {
        let mut profiles: BTreeMap<UserId, UserProfile> = BTreeMap::new();
        for rating in &split.train {
            let profile = profiles
                .entry(rating.user_id)
                .or_insert_with(|| UserProfile::new(rating.user_id));
            profile.ratings.insert(rating.item_id, rating.score);
            profile.interacted.insert(rating.item_id);
        }

        let mut held_out: BTreeMap<UserId, Vec<ScoredRating>> = BTreeMap::new();
        for rating in &split.test {
            held_out.entry(rating.user_id).or_default().push(*rating);
        }

        if config.max_users > 0 && held_out.len() > config.max_users {
            let mut users: Vec<UserId> = held_out.keys().copied().collect();
            let mut rng = StdRng::seed_from_u64(config.seed);
            users.shuffle(&mut rng);
            let sampled: HashSet<UserId> = users.into_iter().take(config.max_users).collect();
            held_out.retain(|user, _| sampled.contains(user));
        }

        let catalog_size = if catalog.is_empty() {
            split
                .train
                .iter()
                .chain(split.test.iter())
                .map(|r| r.item_id)
                .collect::<HashSet<_>>()
                .len()
        } else {
            catalog.len()
        };

        Self {
            config,
            profiles,
            held_out,
            tags: catalog
                .iter()
                .map(|item| (item.item_id, &item.feature_tags))
                .collect(),
            catalog_size,
        }
    }

    pub fn evaluated_users(&self) -> usize {
        self.held_out.len()
    }

    pub fn evaluate(&self, strategy: &dyn ScoringStrategy) -> ModelMetrics {
        let k = self.config.k;
        let mut pairs: Vec<(f64, f64)> = Vec::new();
        let mut per_user: Vec<RankingScores> = Vec::new();
        let mut diversities: Vec<f64> = Vec::new();
        let mut recommended_any: HashSet<ItemId> = HashSet::new();

        for (user_id, held) in &self.held_out {
            let profile = self
                .profiles
                .get(user_id)
                .cloned()
                .unwrap_or_else(|| UserProfile::new(*user_id));

            for rating in held {
                if let Some(predicted) = strategy.predict_score(&profile, rating.item_id) {
                    pairs.push((predicted, rating.score as f64));
                }
            }

            let relevant: HashMap<ItemId, f64> = held
                .iter()
                .filter(|r| r.score >= self.config.relevance_threshold)
                .map(|r| (r.item_id, r.score as f64))
                .collect();
            if relevant.is_empty() {
                continue;
            }

            // a strategy that cannot rank for this user scores an empty list
            let top: Vec<ItemId> = match strategy.recommend(&profile, k) {
                Ok(items) => items.into_iter().map(|s| s.item_id).collect(),
                Err(e) => {
                    debug!(user_id = %user_id, strategy = %strategy.kind(), error = %e, "No ranking for user");
                    Vec::new()
                }
            };

            per_user.push(ranking_scores(&top, &relevant, k));
            if let Some(d) = intra_list_diversity(&top, &self.tags) {
                diversities.push(d);
            }
            recommended_any.extend(top);
        }

        let (rmse, mae) = rmse_mae(&pairs);
        let metrics = ModelMetrics {
            rmse,
            mae,
            precision_at_k: mean(per_user.iter().map(|s| s.precision)).unwrap_or(0.0),
            recall_at_k: mean(per_user.iter().map(|s| s.recall)).unwrap_or(0.0),
            f1_at_k: mean(per_user.iter().map(|s| s.f1)).unwrap_or(0.0),
            ndcg_at_k: mean(per_user.iter().map(|s| s.ndcg)).unwrap_or(0.0),
            coverage: coverage(&recommended_any, self.catalog_size),
            diversity: mean(diversities),
            k,
            predictions: pairs.len(),
            ranked_users: per_user.len(),
        };

        info!(
            strategy = %strategy.kind(),
            rmse = ?metrics.rmse,
            mae = ?metrics.mae,
            precision_at_k = metrics.precision_at_k,
            recall_at_k = metrics.recall_at_k,
            ndcg_at_k = metrics.ndcg_at_k,
            predictions = metrics.predictions,
            ranked_users = metrics.ranked_users,
            "Evaluation finished"
        );
        metrics
    }
}
