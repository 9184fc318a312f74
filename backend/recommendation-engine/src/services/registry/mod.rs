// ============================================
// Model Registry
// ============================================
//
// Append-only versions per strategy plus one active pointer per strategy.
// Artifacts are fully built before `register` and never mutated after;
// activation replaces an `Arc` under a short write lock, so readers see
// either the previous complete artifact or the new one.

use crate::error::{EngineError, Result};
use crate::models::StrategyKind;
use crate::services::evaluation::ModelMetrics;
use crate::services::strategies::{PayloadSummary, TrainedModel};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// An immutable trained model version
#[derive(Debug)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub strategy: StrategyKind,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub metrics: ModelMetrics,
    /// Scored ratings the serving model was fitted on
    pub training_ratings: usize,
    pub model: TrainedModel,
}

/// Serializable view of one artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub strategy: StrategyKind,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub training_ratings: usize,
    pub metrics: ModelMetrics,
    pub payload: PayloadSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryManifest {
    pub generated_at: DateTime<Utc>,
    pub active: BTreeMap<StrategyKind, u64>,
    pub artifacts: Vec<ArtifactRecord>,
}

#[derive(Default)]
pub struct ModelRegistry {
    versions: RwLock<HashMap<StrategyKind, Vec<Arc<ModelArtifact>>>>,
    active: RwLock<HashMap<StrategyKind, Arc<ModelArtifact>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new inactive version
    pub fn register(
        &self,
        model: TrainedModel,
        metrics: ModelMetrics,
        training_ratings: usize,
    ) -> Arc<ModelArtifact> {
        let strategy = model.kind();
        let mut versions = self.versions.write();
        let history = versions.entry(strategy).or_default();

        let artifact = Arc::new(ModelArtifact {
            id: Uuid::new_v4(),
            strategy,
            version: history.len() as u64 + 1,
            created_at: Utc::now(),
            metrics,
            training_ratings,
            model,
        });
        history.push(artifact.clone());

        info!(
            strategy = %strategy,
            version = artifact.version,
            artifact_id = %artifact.id,
            "Registered model artifact"
        );
        artifact
    }

    /// Point `strategy` at `version`; the only mutation of the active set
    pub fn activate(&self, strategy: StrategyKind, version: u64) -> Result<Arc<ModelArtifact>> {
        let artifact = self
            .get(strategy, version)
            .ok_or(EngineError::UnknownVersion { strategy, version })?;

        let previous = self.active.write().insert(strategy, artifact.clone());

        info!(
            strategy = %strategy,
            version = version,
            previous_version = ?previous.map(|a| a.version),
            "Activated model artifact"
        );
        Ok(artifact)
    }

    pub fn get_active(&self, strategy: StrategyKind) -> Option<Arc<ModelArtifact>> {
        self.active.read().get(&strategy).cloned()
    }

    pub fn get(&self, strategy: StrategyKind, version: u64) -> Option<Arc<ModelArtifact>> {
        let versions = self.versions.read();
        let index = usize::try_from(version).ok()?.checked_sub(1)?;
        versions.get(&strategy)?.get(index).cloned()
    }

    /// Every version of `strategy`, oldest first
    pub fn versions(&self, strategy: StrategyKind) -> Vec<Arc<ModelArtifact>> {
        self.versions
            .read()
            .get(&strategy)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-activate the version just before the active one
    pub fn rollback(&self, strategy: StrategyKind) -> Result<Arc<ModelArtifact>> {
        let current = self.get_active(strategy).ok_or_else(|| {
            EngineError::InvalidInput(format!("strategy '{}' has no active version", strategy))
        })?;

        let target = current.version.saturating_sub(1);
        if target == 0 {
            return Err(EngineError::UnknownVersion {
                strategy,
                version: target,
            });
        }
        self.activate(strategy, target)
    }

    pub fn is_active(&self, artifact: &ModelArtifact) -> bool {
        self.get_active(artifact.strategy)
            .map(|active| active.id == artifact.id)
            .unwrap_or(false)
    }

    pub fn record(&self, artifact: &ModelArtifact) -> ArtifactRecord {
        ArtifactRecord {
            id: artifact.id,
            strategy: artifact.strategy,
            version: artifact.version,
            created_at: artifact.created_at,
            is_active: self.is_active(artifact),
            training_ratings: artifact.training_ratings,
            metrics: artifact.metrics.clone(),
            payload: artifact.model.summary(),
        }
    }

    pub fn manifest(&self) -> RegistryManifest {
        let active: BTreeMap<StrategyKind, u64> = self
            .active
            .read()
            .iter()
            .map(|(strategy, artifact)| (*strategy, artifact.version))
            .collect();

        let mut artifacts: Vec<ArtifactRecord> = Vec::new();
        for strategy in StrategyKind::ALL {
            for artifact in self.versions(strategy) {
                artifacts.push(ArtifactRecord {
                    is_active: active.get(&strategy) == Some(&artifact.version),
                    ..self.record(&artifact)
                });
            }
        }

        RegistryManifest {
            generated_at: Utc::now(),
            active,
            artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use crate::services::strategies::PopularityStrategy;
    use std::collections::BTreeSet;

    fn popularity_model() -> TrainedModel {
        let items = vec![Item {
            item_id: crate::models::ItemId(1),
            name: "Mushishi".to_string(),
            feature_tags: BTreeSet::new(),
            mean_score: 8.7,
            members: 300,
        }];
        TrainedModel::Popularity(Arc::new(PopularityStrategy::from_catalog(&items)))
    }

    #[test]
    fn test_register_is_inactive_until_activated() {
        let registry = ModelRegistry::new();
        let artifact = registry.register(popularity_model(), ModelMetrics::default(), 0);

        assert_eq!(artifact.version, 1);
        assert!(registry.get_active(StrategyKind::Popularity).is_none());

        registry.activate(StrategyKind::Popularity, 1).unwrap();
        let active = registry.get_active(StrategyKind::Popularity).unwrap();
        assert_eq!(active.id, artifact.id);
        assert!(registry.is_active(&artifact));
    }

    #[test]
    fn test_versions_increase_and_rollback() {
        let registry = ModelRegistry::new();
        for _ in 0..3 {
            let artifact = registry.register(popularity_model(), ModelMetrics::default(), 0);
            registry.activate(StrategyKind::Popularity, artifact.version).unwrap();
        }
        assert_eq!(registry.versions(StrategyKind::Popularity).len(), 3);

        let rolled = registry.rollback(StrategyKind::Popularity).unwrap();
        assert_eq!(rolled.version, 2);
        assert_eq!(registry.get_active(StrategyKind::Popularity).unwrap().version, 2);

        registry.rollback(StrategyKind::Popularity).unwrap();
        assert!(matches!(
            registry.rollback(StrategyKind::Popularity),
            Err(EngineError::UnknownVersion { version: 0, .. })
        ));
    }

    #[test]
    fn test_activate_unknown_version() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.activate(StrategyKind::Hybrid, 4),
            Err(EngineError::UnknownVersion {
                strategy: StrategyKind::Hybrid,
                version: 4
            })
        ));
        assert!(registry.rollback(StrategyKind::Hybrid).is_err());
    }

    #[test]
    fn test_manifest_marks_single_active_version() {
        let registry = ModelRegistry::new();
        registry.register(popularity_model(), ModelMetrics::default(), 0);
        registry.register(popularity_model(), ModelMetrics::default(), 0);
        registry.activate(StrategyKind::Popularity, 2).unwrap();

        let manifest = registry.manifest();
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.artifacts.iter().filter(|a| a.is_active).count(), 1);
        assert_eq!(manifest.active.get(&StrategyKind::Popularity), Some(&2));

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["active"]["popularity"], 2);
    }
}
