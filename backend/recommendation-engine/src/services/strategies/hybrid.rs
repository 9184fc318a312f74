use super::ScoringStrategy;
use crate::error::{EngineError, Result};
use crate::models::{ItemId, StrategyKind, UserProfile};
use crate::utils::scale_scores;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Weighted blend of component strategies.
///
/// Each component's candidate scores are divided by that component's best
/// score before the weighted sum, so every component's top item counts 1
/// whatever the size of its candidate list, and any positively scored item
/// counts more than one the component did not return. An item missing from
/// a component contributes 0 for that term; an item missing from every
/// component is not a candidate.
pub struct HybridStrategy {
    components: Vec<(Arc<dyn ScoringStrategy>, f64)>,
    min_user_ratings: usize,
}

impl HybridStrategy {
    pub fn new(components: Vec<(Arc<dyn ScoringStrategy>, f64)>, min_user_ratings: usize) -> Self {
        Self {
            components,
            min_user_ratings,
        }
    }

    pub fn component_kinds(&self) -> Vec<StrategyKind> {
        self.components.iter().map(|(s, _)| s.kind()).collect()
    }
}

impl ScoringStrategy for HybridStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    fn score_candidates(&self, profile: &UserProfile) -> Result<HashMap<ItemId, f64>> {
        if profile.rating_count() < self.min_user_ratings {
            return Err(EngineError::DataInsufficient(format!(
                "user {} has {} ratings, hybrid needs {}",
                profile.user_id,
                profile.rating_count(),
                self.min_user_ratings
            )));
        }

        let mut combined: HashMap<ItemId, f64> = HashMap::new();
        for (strategy, weight) in &self.components {
            let scores = match strategy.score_candidates(profile) {
                Ok(scores) => scores,
                Err(e) if e.is_data_insufficient() => {
                    debug!(
                        user_id = %profile.user_id,
                        component = %strategy.kind(),
                        reason = %e,
                        "Hybrid component produced no candidates"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (item_id, scaled) in scale_scores(&scores) {
                *combined.entry(item_id).or_insert(0.0) += weight * scaled;
            }
        }

        if combined.is_empty() {
            return Err(EngineError::DataInsufficient(format!(
                "no component produced candidates for user {}",
                profile.user_id
            )));
        }
        Ok(combined)
    }

    /// Weight-renormalized mean over the components that can predict
    fn predict_score(&self, profile: &UserProfile, item_id: ItemId) -> Option<f64> {
        let (weighted, total) = self
            .components
            .iter()
            .filter_map(|(strategy, weight)| {
                strategy
                    .predict_score(profile, item_id)
                    .map(|p| (p * weight, *weight))
            })
            .fold((0.0, 0.0), |(w, t), (pw, weight)| (w + pw, t + weight));

        (total > 0.0).then(|| weighted / total)
    }
}
