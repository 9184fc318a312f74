// ============================================
// Recommendation Server
// ============================================
//
// Query-time facade over the active artifacts. Reads never wait on a
// retrain: they clone the active `Arc` and score against it.
//
// Fallback policy: a missing artifact, insufficient data or an empty
// candidate list all degrade to the popularity ranking (minus items the
// user already interacted with). Unknown users and items are surfaced.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::jobs::RetrainOrchestrator;
use crate::models::{
    ItemId, RatingValue, RetrainJob, RetrainTarget, ScoredItem, StrategyKind, UserId, UserProfile,
};
use crate::services::registry::{ArtifactRecord, ModelRegistry};
use crate::services::strategies::{ContentStrategy, PopularityStrategy, TrainedModel};
use crate::store::InteractionStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationResponse {
    pub user_id: UserId,
    pub requested: StrategyKind,
    /// Strategy that actually produced `items`
    pub served_by: StrategyKind,
    /// Version of the serving artifact; `None` for catalog-only popularity
    pub model_version: Option<u64>,
    pub items: Vec<ScoredItem>,
}

impl RecommendationResponse {
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|s| s.item_id).collect()
    }

    pub fn is_fallback(&self) -> bool {
        self.served_by != self.requested
    }
}

/// Metrics of the active artifact of one strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub strategy: StrategyKind,
    pub description: &'static str,
    pub version: u64,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub f1_at_k: f64,
    pub ndcg_at_k: f64,
    pub coverage: f64,
    pub diversity: Option<f64>,
    pub k: usize,
    pub trained_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStats {
    pub users: usize,
    pub items: usize,
    /// Scored ratings only
    pub ratings: usize,
    pub unscored_interactions: usize,
    pub mean_rating: Option<f64>,
}

pub struct RecommendationServer {
    config: Arc<Config>,
    store: Arc<dyn InteractionStore>,
    registry: Arc<ModelRegistry>,
    orchestrator: RetrainOrchestrator,
}

impl RecommendationServer {
    pub fn new(config: Config, store: Arc<dyn InteractionStore>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(ModelRegistry::new());
        let orchestrator =
            RetrainOrchestrator::new(config.clone(), store.clone(), registry.clone());

        info!(
            service = %config.service.service_name,
            "Recommendation server initialized"
        );

        Self {
            config,
            store,
            registry,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &RetrainOrchestrator {
        &self.orchestrator
    }

    // ============================================
    // Recommendations
    // ============================================

    pub async fn get_recommendations(
        &self,
        user_id: UserId,
        n: usize,
        strategy: StrategyKind,
    ) -> Result<RecommendationResponse> {
        let profile = self.profile(user_id).await?;

        if strategy == StrategyKind::Popularity {
            return self.popularity_response(&profile, n, strategy).await;
        }

        let Some(artifact) = self.registry.get_active(strategy) else {
            warn!(
                strategy = %strategy,
                "No active artifact yet, serving popularity ranking"
            );
            return self.popularity_response(&profile, n, strategy).await;
        };

        match artifact.model.strategy().recommend(&profile, n) {
            Ok(items) if !items.is_empty() || n == 0 => Ok(RecommendationResponse {
                user_id,
                requested: strategy,
                served_by: strategy,
                model_version: Some(artifact.version),
                items,
            }),
            Ok(_) => {
                debug!(user_id = %user_id, strategy = %strategy, "No candidates, falling back to popularity");
                self.popularity_response(&profile, n, strategy).await
            }
            Err(e) if e.is_data_insufficient() => {
                debug!(
                    user_id = %user_id,
                    strategy = %strategy,
                    reason = %e,
                    "Insufficient data, falling back to popularity"
                );
                self.popularity_response(&profile, n, strategy).await
            }
            Err(e) => Err(e),
        }
    }

    /// Content neighbors of `context_item` the user has not seen; without a
    /// context item (or when it has no usable neighbors) the hybrid ranking.
    pub async fn get_contextual_recommendations(
        &self,
        user_id: UserId,
        context_item: Option<ItemId>,
        n: usize,
    ) -> Result<RecommendationResponse> {
        let Some(context_item) = context_item else {
            return self
                .get_recommendations(user_id, n, StrategyKind::Hybrid)
                .await;
        };

        let profile = self.profile(user_id).await?;
        let (mut items, version) = match self.content_model().await? {
            Some((content, version)) => (
                content.similar_items(context_item, n.saturating_add(profile.interacted.len()))?,
                version,
            ),
            None => {
                self.ensure_item(context_item).await?;
                (Vec::new(), None)
            }
        };
        items.retain(|s| !profile.has_interacted(s.item_id));
        items.truncate(n);

        if items.is_empty() && n > 0 {
            debug!(user_id = %user_id, context_item = %context_item, "Context item has no unseen neighbors");
            return self
                .get_recommendations(user_id, n, StrategyKind::Hybrid)
                .await;
        }

        Ok(RecommendationResponse {
            user_id,
            requested: StrategyKind::Content,
            served_by: StrategyKind::Content,
            model_version: version,
            items,
        })
    }

    /// Content-similarity neighbors of an item
    pub async fn get_similar(&self, item_id: ItemId, n: usize) -> Result<Vec<ScoredItem>> {
        match self.content_model().await? {
            Some((content, _)) => content.similar_items(item_id, n),
            None => self.ensure_item(item_id).await.map(|_| Vec::new()),
        }
    }

    /// Global popularity ranking; available even before any retrain
    pub async fn get_popular(&self, n: usize) -> Result<Vec<ScoredItem>> {
        let (popularity, _) = self.popularity_model().await?;
        Ok(popularity.top(n, |_| false))
    }

    async fn profile(&self, user_id: UserId) -> Result<UserProfile> {
        if !self.store.contains_user(user_id).await? {
            return Err(EngineError::UnknownUser(user_id));
        }
        let ratings = self.store.user_ratings(user_id).await?;
        Ok(UserProfile::from_ratings(user_id, &ratings))
    }

    async fn popularity_response(
        &self,
        profile: &UserProfile,
        n: usize,
        requested: StrategyKind,
    ) -> Result<RecommendationResponse> {
        let (popularity, version) = self.popularity_model().await?;
        Ok(RecommendationResponse {
            user_id: profile.user_id,
            requested,
            served_by: StrategyKind::Popularity,
            model_version: version,
            items: popularity.top(n, |item_id| profile.has_interacted(item_id)),
        })
    }

    async fn popularity_model(&self) -> Result<(Arc<PopularityStrategy>, Option<u64>)> {
        if let Some(artifact) = self.registry.get_active(StrategyKind::Popularity) {
            if let TrainedModel::Popularity(model) = &artifact.model {
                return Ok((model.clone(), Some(artifact.version)));
            }
        }
        let items = self.store.list_items().await?;
        Ok((Arc::new(PopularityStrategy::from_catalog(&items)), None))
    }

    /// Active content artifact, or tag vectors built from the catalog.
    /// `None` when no catalog item carries tags.
    async fn content_model(&self) -> Result<Option<(Arc<ContentStrategy>, Option<u64>)>> {
        if let Some(artifact) = self.registry.get_active(StrategyKind::Content) {
            if let TrainedModel::Content(model) = &artifact.model {
                return Ok(Some((model.clone(), Some(artifact.version))));
            }
        }

        debug!("No active content artifact, building tag vectors from the catalog");
        let items = self.store.list_items().await?;
        let popularity = PopularityStrategy::from_catalog(&items);
        match ContentStrategy::fit(&items, popularity.weights(), self.config.strategy.liked_threshold) {
            Ok(model) => Ok(Some((Arc::new(model), None))),
            Err(e) if e.is_data_insufficient() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn ensure_item(&self, item_id: ItemId) -> Result<()> {
        match self.store.get_item(item_id).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownItem(item_id)),
        }
    }

    // ============================================
    // Writes and catalog
    // ============================================

    /// Validate a wire score (`-1` or `[1, 10]`) and store it
    pub async fn record_rating(&self, user_id: UserId, item_id: ItemId, score: i32) -> Result<()> {
        let value = RatingValue::try_from(score).map_err(EngineError::InvalidInput)?;
        self.store.record_rating(user_id, item_id, value).await
    }

    pub async fn get_catalog_stats(&self) -> Result<CatalogStats> {
        let ratings = self.store.list_ratings().await?;
        let items = self.store.list_items().await?;
        let users = self.store.list_users().await?;

        let scored: Vec<f64> = ratings
            .iter()
            .filter_map(|r| r.score.score())
            .map(f64::from)
            .collect();

        Ok(CatalogStats {
            users: users.len(),
            items: items.len(),
            ratings: scored.len(),
            unscored_interactions: ratings.len() - scored.len(),
            mean_rating: crate::utils::mean(scored),
        })
    }

    // ============================================
    // Retraining and models
    // ============================================

    pub fn request_retrain(&self, target: RetrainTarget) -> Result<RetrainJob> {
        self.orchestrator.request(target)
    }

    pub fn get_retrain_status(&self) -> RetrainJob {
        self.orchestrator.get_retrain_status()
    }

    /// Metrics of every active artifact, in strategy order
    pub fn get_model_metrics(&self) -> Vec<StrategyMetrics> {
        StrategyKind::ALL
            .iter()
            .filter_map(|strategy| self.registry.get_active(*strategy))
            .map(|artifact| StrategyMetrics {
                strategy: artifact.strategy,
                description: artifact.strategy.description(),
                version: artifact.version,
                rmse: artifact.metrics.rmse,
                mae: artifact.metrics.mae,
                precision_at_k: artifact.metrics.precision_at_k,
                recall_at_k: artifact.metrics.recall_at_k,
                f1_at_k: artifact.metrics.f1_at_k,
                ndcg_at_k: artifact.metrics.ndcg_at_k,
                coverage: artifact.metrics.coverage,
                diversity: artifact.metrics.diversity,
                k: artifact.metrics.k,
                trained_at: artifact.created_at,
                is_active: true,
            })
            .collect()
    }

    pub fn get_model_history(&self, strategy: StrategyKind) -> Vec<ArtifactRecord> {
        self.registry
            .versions(strategy)
            .iter()
            .map(|artifact| self.registry.record(artifact))
            .collect()
    }

    pub fn rollback_model(&self, strategy: StrategyKind) -> Result<ArtifactRecord> {
        let artifact = self.registry.rollback(strategy)?;
        Ok(self.registry.record(&artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, Rating};
    use crate::store::{InMemoryStore, MockInteractionStore};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn item(id: u64, tags: &[&str], mean: f64, members: u64) -> Item {
        Item {
            item_id: ItemId(id),
            name: format!("title-{}", id),
            feature_tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            mean_score: mean,
            members,
        }
    }

    fn store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        store.insert_item(item(1, &["action", "space"], 8.0, 1000));
        store.insert_item(item(2, &["action", "space"], 7.0, 500));
        store.insert_item(item(3, &["romance"], 9.0, 2000));
        store.insert_item(item(4, &["comedy"], 6.0, 100));
        store.register_user(UserId(99));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_unknown_user_is_surfaced() {
        let server = RecommendationServer::new(Config::default(), store());
        let err = server
            .get_recommendations(UserId(404), 5, StrategyKind::Hybrid)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownUser(UserId(404))));
    }

    #[tokio::test]
    async fn test_missing_artifact_falls_back_to_popularity() {
        let store = store();
        store
            .record_rating(UserId(1), ItemId(3), RatingValue::Scored(9))
            .await
            .unwrap();
        let server = RecommendationServer::new(Config::default(), store);

        let response = server
            .get_recommendations(UserId(1), 10, StrategyKind::ItemCf)
            .await
            .unwrap();
        assert_eq!(response.served_by, StrategyKind::Popularity);
        assert!(response.is_fallback());
        assert_eq!(response.model_version, None);
        assert!(!response.item_ids().contains(&ItemId(3)));
        assert_eq!(response.items.len(), 3);
    }

    #[tokio::test]
    async fn test_unscored_interactions_are_excluded() {
        let store = store();
        store
            .record_rating(UserId(5), ItemId(1), RatingValue::Unscored)
            .await
            .unwrap();
        let server = RecommendationServer::new(Config::default(), store);

        let response = server
            .get_recommendations(UserId(5), 10, StrategyKind::Popularity)
            .await
            .unwrap();
        assert!(!response.item_ids().contains(&ItemId(1)));
    }

    #[tokio::test]
    async fn test_similar_items_without_retrain() {
        let server = RecommendationServer::new(Config::default(), store());

        let similar = server.get_similar(ItemId(1), 5).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].item_id, ItemId(2));

        assert!(matches!(
            server.get_similar(ItemId(77), 5).await,
            Err(EngineError::UnknownItem(ItemId(77)))
        ));
    }

    #[tokio::test]
    async fn test_contextual_recommendations() {
        let server = RecommendationServer::new(Config::default(), store());

        let with_context = server
            .get_contextual_recommendations(UserId(99), Some(ItemId(2)), 5)
            .await
            .unwrap();
        assert_eq!(with_context.served_by, StrategyKind::Content);
        assert_eq!(with_context.item_ids(), vec![ItemId(1)]);

        let without = server
            .get_contextual_recommendations(UserId(99), None, 2)
            .await
            .unwrap();
        assert_eq!(without.requested, StrategyKind::Hybrid);
        assert_eq!(without.items, server.get_popular(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_contextual_recommendations_with_unbounded_n() {
        let store = store();
        store
            .record_rating(UserId(1), ItemId(3), RatingValue::Scored(8))
            .await
            .unwrap();
        let server = RecommendationServer::new(Config::default(), store);

        let response = server
            .get_contextual_recommendations(UserId(1), Some(ItemId(2)), usize::MAX)
            .await
            .unwrap();
        assert_eq!(response.served_by, StrategyKind::Content);
        assert_eq!(response.item_ids(), vec![ItemId(1)]);
    }

    #[tokio::test]
    async fn test_record_rating_validates_score() {
        let server = RecommendationServer::new(Config::default(), store());

        assert!(matches!(
            server.record_rating(UserId(1), ItemId(1), 11).await,
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            server.record_rating(UserId(1), ItemId(50), 5).await,
            Err(EngineError::UnknownItem(ItemId(50)))
        ));
        server.record_rating(UserId(1), ItemId(1), -1).await.unwrap();
        server.record_rating(UserId(1), ItemId(2), 8).await.unwrap();

        let stats = server.get_catalog_stats().await.unwrap();
        assert_eq!(stats.items, 4);
        assert_eq!(stats.users, 2);
        assert_eq!(stats.ratings, 1);
        assert_eq!(stats.unscored_interactions, 1);
        assert_eq!(stats.mean_rating, Some(8.0));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut mock = MockInteractionStore::new();
        mock.expect_contains_user().returning(|_| Ok(true));
        mock.expect_user_ratings().returning(|_| Ok(Vec::<Rating>::new()));
        mock.expect_list_items()
            .returning(|| Err(EngineError::Store("catalog unavailable".to_string())));

        let server = RecommendationServer::new(Config::default(), Arc::new(mock));
        let err = server
            .get_recommendations(UserId(1), 5, StrategyKind::Popularity)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[tokio::test]
    async fn test_metrics_history_and_rollback() {
        let store = store();
        for (user, item, score) in [(1, 1, 9), (1, 2, 8), (2, 1, 7), (2, 3, 4), (3, 2, 6), (3, 3, 9)] {
            store
                .record_rating(UserId(user), ItemId(item), RatingValue::Scored(score))
                .await
                .unwrap();
        }
        let server = RecommendationServer::new(Config::default(), store);
        assert!(server.get_model_metrics().is_empty());

        let target = RetrainTarget::Strategy(StrategyKind::Popularity);
        for _ in 0..2 {
            server.request_retrain(target).unwrap();
            server
                .orchestrator()
                .wait_for(target, Duration::from_millis(5))
                .await;
        }

        let metrics = server.get_model_metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].version, 2);
        assert!(metrics[0].is_active);

        let history = server.get_model_history(StrategyKind::Popularity);
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active && history[1].is_active);

        let rolled = server.rollback_model(StrategyKind::Popularity).unwrap();
        assert_eq!(rolled.version, 1);
        assert!(rolled.is_active);
    }
}
