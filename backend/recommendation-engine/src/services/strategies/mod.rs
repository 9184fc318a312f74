mod content;
mod hybrid;
mod item_cf;
mod popularity;
mod user_cf;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::{ItemId, ScoredItem, StrategyKind, UserProfile};
use crate::services::similarity::SparseRatingMatrix;
use crate::store::RatingSnapshot;
use crate::utils::sort_scored;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use content::ContentStrategy;
pub use hybrid::HybridStrategy;
pub use item_cf::ItemCfStrategy;
pub use popularity::PopularityStrategy;
pub use user_cf::UserCfStrategy;

/// Scoring strategy capability shared by every model variant
pub trait ScoringStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Candidate items the user has not interacted with, mapped to a
    /// strategy-specific score (higher is better)
    fn score_candidates(&self, profile: &UserProfile) -> Result<HashMap<ItemId, f64>>;

    /// Estimate on the rating scale, `None` when the item is not scorable
    fn predict_score(&self, profile: &UserProfile, item_id: ItemId) -> Option<f64>;

    /// Deterministic order: score desc, item id asc
    fn rank(&self, _profile: &UserProfile, scores: HashMap<ItemId, f64>) -> Vec<ScoredItem> {
        let mut ranked: Vec<ScoredItem> = scores
            .into_iter()
            .map(|(item_id, score)| ScoredItem { item_id, score })
            .collect();
        sort_scored(&mut ranked);
        ranked
    }

    /// Top `n` unseen items
    fn recommend(&self, profile: &UserProfile, n: usize) -> Result<Vec<ScoredItem>> {
        let mut scores = self.score_candidates(profile)?;
        scores.retain(|item_id, _| !profile.has_interacted(*item_id));

        let mut ranked = self.rank(profile, scores);
        ranked.truncate(n);
        Ok(ranked)
    }
}

/// A fitted model, as stored in a registry artifact
#[derive(Clone)]
pub enum TrainedModel {
    Content(Arc<ContentStrategy>),
    ItemCf(Arc<ItemCfStrategy>),
    UserCf(Arc<UserCfStrategy>),
    Popularity(Arc<PopularityStrategy>),
    Hybrid(Arc<HybridStrategy>),
}

/// Shape of an artifact payload, for manifests and logs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayloadSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_pairs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocabulary_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranked_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<StrategyKind>>,
}

impl TrainedModel {
    pub fn kind(&self) -> StrategyKind {
        self.strategy().kind()
    }

    pub fn strategy(&self) -> &dyn ScoringStrategy {
        match self {
            TrainedModel::Content(m) => m.as_ref(),
            TrainedModel::ItemCf(m) => m.as_ref(),
            TrainedModel::UserCf(m) => m.as_ref(),
            TrainedModel::Popularity(m) => m.as_ref(),
            TrainedModel::Hybrid(m) => m.as_ref(),
        }
    }

    pub fn shared_strategy(&self) -> Arc<dyn ScoringStrategy> {
        match self {
            TrainedModel::Content(m) => m.clone(),
            TrainedModel::ItemCf(m) => m.clone(),
            TrainedModel::UserCf(m) => m.clone(),
            TrainedModel::Popularity(m) => m.clone(),
            TrainedModel::Hybrid(m) => m.clone(),
        }
    }

    pub fn summary(&self) -> PayloadSummary {
        match self {
            TrainedModel::Content(m) => PayloadSummary {
                vocabulary_size: Some(m.vocabulary_size()),
                ..Default::default()
            },
            TrainedModel::ItemCf(m) => PayloadSummary {
                similarity_pairs: Some(m.similarity().pair_count()),
                ..Default::default()
            },
            TrainedModel::UserCf(m) => PayloadSummary {
                similarity_pairs: Some(m.similarity().pair_count()),
                ..Default::default()
            },
            TrainedModel::Popularity(m) => PayloadSummary {
                ranked_items: Some(m.len()),
                ..Default::default()
            },
            TrainedModel::Hybrid(m) => PayloadSummary {
                components: Some(m.component_kinds()),
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("kind", &self.kind())
            .field("summary", &self.summary())
            .finish()
    }
}

/// Ratings a set of models is fitted on
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub snapshot: RatingSnapshot,
    pub matrix: Arc<SparseRatingMatrix>,
}

impl TrainingSet {
    pub fn new(snapshot: RatingSnapshot) -> Self {
        let matrix = Arc::new(SparseRatingMatrix::from_ratings(snapshot.ratings()));
        Self { snapshot, matrix }
    }
}

/// Fits strategies over one training set, caching results so the hybrid
/// combiner reuses component models already fitted in the same run.
pub struct StrategyTrainer<'a> {
    config: &'a Config,
    set: &'a TrainingSet,
    fitted: HashMap<StrategyKind, TrainedModel>,
}

impl<'a> StrategyTrainer<'a> {
    pub fn new(config: &'a Config, set: &'a TrainingSet) -> Self {
        Self {
            config,
            set,
            fitted: HashMap::new(),
        }
    }

    pub fn train(&mut self, kind: StrategyKind) -> Result<TrainedModel> {
        if let Some(model) = self.fitted.get(&kind) {
            return Ok(model.clone());
        }

        let model = match kind {
            StrategyKind::Popularity => TrainedModel::Popularity(Arc::new(
                PopularityStrategy::fit(self.set.snapshot.items(), &self.set.matrix)?,
            )),
            StrategyKind::Content => {
                let popularity = self.popularity()?;
                TrainedModel::Content(Arc::new(ContentStrategy::fit(
                    self.set.snapshot.items(),
                    popularity.weights(),
                    self.config.strategy.liked_threshold,
                )?))
            }
            StrategyKind::ItemCf => TrainedModel::ItemCf(Arc::new(ItemCfStrategy::fit(
                &self.set.matrix,
                &self.config.similarity,
                &self.config.strategy,
            )?)),
            StrategyKind::UserCf => TrainedModel::UserCf(Arc::new(UserCfStrategy::fit(
                self.set.matrix.clone(),
                &self.config.similarity,
                &self.config.strategy,
            )?)),
            StrategyKind::Hybrid => TrainedModel::Hybrid(Arc::new(self.fit_hybrid()?)),
        };

        debug!(strategy = %kind, summary = ?model.summary(), "Fitted strategy");
        self.fitted.insert(kind, model.clone());
        Ok(model)
    }

    fn popularity(&mut self) -> Result<Arc<PopularityStrategy>> {
        match self.train(StrategyKind::Popularity)? {
            TrainedModel::Popularity(model) => Ok(model),
            other => Err(EngineError::TrainingFailure(format!(
                "expected popularity model, got {}",
                other.kind()
            ))),
        }
    }

    fn fit_hybrid(&mut self) -> Result<HybridStrategy> {
        let (content_w, item_w, user_w) = self.config.hybrid.normalized_weights();
        let mut components: Vec<(Arc<dyn ScoringStrategy>, f64)> = Vec::new();

        for (kind, weight) in [
            (StrategyKind::Content, content_w),
            (StrategyKind::ItemCf, item_w),
            (StrategyKind::UserCf, user_w),
        ] {
            if weight <= 0.0 {
                continue;
            }
            match self.train(kind) {
                Ok(model) => components.push((model.shared_strategy(), weight)),
                Err(e) if e.is_data_insufficient() => {
                    warn!(component = %kind, error = %e, "Hybrid component skipped");
                }
                Err(e) => return Err(e),
            }
        }

        if components.is_empty() {
            return Err(EngineError::DataInsufficient(
                "no hybrid component could be fitted".to_string(),
            ));
        }

        info!(components = components.len(), "Assembled hybrid combiner");
        Ok(HybridStrategy::new(components, self.config.hybrid.min_user_ratings))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{item, rating};
    use super::*;
    use crate::models::UserId;

    fn training_set() -> TrainingSet {
        let items = vec![
            item(1, &["action", "space"], 8.0, 100),
            item(2, &["action"], 7.0, 50),
            item(3, &["romance"], 6.0, 10),
            item(4, &["space", "drama"], 9.0, 500),
        ];
        let ratings = vec![
            rating(1, 1, 9),
            rating(1, 2, 8),
            rating(1, 3, 2),
            rating(2, 1, 8),
            rating(2, 2, 7),
            rating(2, 4, 9),
            rating(3, 2, 6),
            rating(3, 3, 9),
            rating(3, 4, 4),
        ];
        TrainingSet::new(RatingSnapshot::from_scored(ratings, items))
    }

    #[test]
    fn test_trainer_fits_every_kind() {
        let config = Config::default();
        let set = training_set();
        let mut trainer = StrategyTrainer::new(&config, &set);

        for kind in StrategyKind::ALL {
            let model = trainer.train(kind).unwrap();
            assert_eq!(model.kind(), kind);
        }
    }

    #[test]
    fn test_hybrid_reuses_fitted_components() {
        let config = Config::default();
        let set = training_set();
        let mut trainer = StrategyTrainer::new(&config, &set);

        let item_cf = match trainer.train(StrategyKind::ItemCf).unwrap() {
            TrainedModel::ItemCf(m) => m,
            _ => panic!("wrong model"),
        };
        let hybrid = trainer.train(StrategyKind::Hybrid).unwrap();
        assert_eq!(
            hybrid.summary().components,
            Some(vec![StrategyKind::Content, StrategyKind::ItemCf, StrategyKind::UserCf])
        );
        // still the cached instance
        assert_eq!(Arc::strong_count(&item_cf), 3);
    }

    #[test]
    fn test_recommend_never_returns_interacted_items() {
        let config = Config::default();
        let set = training_set();
        let mut trainer = StrategyTrainer::new(&config, &set);

        let mut profile = UserProfile::new(UserId(1)).with_rating(ItemId(1), 9);
        profile.interacted.insert(ItemId(2));

        for kind in StrategyKind::ALL {
            let model = trainer.train(kind).unwrap();
            if let Ok(items) = model.strategy().recommend(&profile, 10) {
                assert!(items.iter().all(|s| s.item_id != ItemId(1) && s.item_id != ItemId(2)));
            }
        }
    }
}
