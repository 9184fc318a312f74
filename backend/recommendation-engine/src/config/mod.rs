use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub similarity: SimilarityConfig,
    pub strategy: StrategyConfig,
    pub hybrid: HybridConfig,
    pub evaluation: EvaluationConfig,
    pub retrain: RetrainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// JSON dataset snapshot loaded by the binary
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Registry manifests are written here
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimilarityConfig {
    /// Pairs with fewer common raters are dropped from the matrix
    #[serde(default = "default_min_co_raters")]
    pub min_co_raters: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Neighbors considered per prediction (item-based and user-based CF)
    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,
    /// Fewer qualifying neighbors than this makes an item unscorable
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: usize,
    /// Ratings at or above this count as "liked" for content-based scoring
    #[serde(default = "default_liked_threshold")]
    pub liked_threshold: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HybridConfig {
    #[serde(default = "default_hybrid_weight")]
    pub content_weight: f64,
    #[serde(default = "default_hybrid_weight")]
    pub item_cf_weight: f64,
    #[serde(default = "default_hybrid_weight")]
    pub user_cf_weight: f64,
    /// Users with fewer scored ratings get the popularity ranking
    #[serde(default = "default_min_user_ratings")]
    pub min_user_ratings: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    #[serde(default = "default_eval_k")]
    pub k: usize,
    #[serde(default = "default_liked_threshold")]
    pub relevance_threshold: u8,
    /// Users sampled for ranking metrics (0 = all)
    #[serde(default = "default_max_eval_users")]
    pub max_users: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrainConfig {
    /// A run exceeding this bound is abandoned and marked as error
    #[serde(default = "default_retrain_timeout_secs")]
    pub timeout_secs: u64,
}

impl RetrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_service_name() -> String {
    "recommendation-engine".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./data/processed/snapshot.json")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("./trained_models")
}

fn default_min_co_raters() -> usize {
    1
}

fn default_k_neighbors() -> usize {
    20
}

fn default_min_neighbors() -> usize {
    2
}

fn default_liked_threshold() -> u8 {
    7
}

fn default_hybrid_weight() -> f64 {
    1.0 / 3.0
}

fn default_min_user_ratings() -> usize {
    1
}

fn default_test_ratio() -> f64 {
    0.2
}

fn default_eval_k() -> usize {
    10
}

fn default_max_eval_users() -> usize {
    1000
}

fn default_seed() -> u64 {
    42
}

fn default_retrain_timeout_secs() -> u64 {
    1800 // 30 minutes
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            snapshot_path: default_snapshot_path(),
            models_dir: default_models_dir(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            min_co_raters: default_min_co_raters(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            k_neighbors: default_k_neighbors(),
            min_neighbors: default_min_neighbors(),
            liked_threshold: default_liked_threshold(),
        }
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            content_weight: default_hybrid_weight(),
            item_cf_weight: default_hybrid_weight(),
            user_cf_weight: default_hybrid_weight(),
            min_user_ratings: default_min_user_ratings(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            test_ratio: default_test_ratio(),
            k: default_eval_k(),
            relevance_threshold: default_liked_threshold(),
            max_users: default_max_eval_users(),
            seed: default_seed(),
        }
    }
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_retrain_timeout_secs(),
        }
    }
}

impl Config {
    /// Load from the process environment (and `.env` if present), e.g.
    /// `RECO_STRATEGY_K_NEIGHBORS=30` or `RECO_HYBRID_CONTENT_WEIGHT=0.5`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        let config = Config {
            service: envy::prefixed("RECO_SERVICE_").from_iter(vars.clone())?,
            similarity: envy::prefixed("RECO_SIMILARITY_").from_iter(vars.clone())?,
            strategy: envy::prefixed("RECO_STRATEGY_").from_iter(vars.clone())?,
            hybrid: envy::prefixed("RECO_HYBRID_").from_iter(vars.clone())?,
            evaluation: envy::prefixed("RECO_EVAL_").from_iter(vars.clone())?,
            retrain: envy::prefixed("RECO_RETRAIN_").from_iter(vars)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        self.hybrid.validate()?;
        self.evaluation.validate()?;

        if self.similarity.min_co_raters == 0 {
            return Err(EngineError::Config(
                "similarity.min_co_raters must be at least 1".to_string(),
            ));
        }
        if self.retrain.timeout_secs == 0 {
            return Err(EngineError::Config(
                "retrain.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k_neighbors == 0 {
            return Err(EngineError::Config("k_neighbors must be positive".to_string()));
        }
        if self.min_neighbors == 0 || self.min_neighbors > self.k_neighbors {
            return Err(EngineError::Config(format!(
                "min_neighbors must be in [1, k_neighbors={}], got {}",
                self.k_neighbors, self.min_neighbors
            )));
        }
        if !(1..=10).contains(&self.liked_threshold) {
            return Err(EngineError::Config(format!(
                "liked_threshold must be in [1, 10], got {}",
                self.liked_threshold
            )));
        }
        Ok(())
    }
}

impl HybridConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.content_weight, self.item_cf_weight, self.user_cf_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Config(
                "hybrid weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(EngineError::Config(
                "at least one hybrid weight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Weights scaled to sum to 1: (content, item_cf, user_cf)
    pub fn normalized_weights(&self) -> (f64, f64, f64) {
        let total = self.content_weight + self.item_cf_weight + self.user_cf_weight;
        if total <= 0.0 {
            return (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        (
            self.content_weight / total,
            self.item_cf_weight / total,
            self.user_cf_weight / total,
        )
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(EngineError::Config(format!(
                "test_ratio must be in (0, 1), got {}",
                self.test_ratio
            )));
        }
        if self.k == 0 {
            return Err(EngineError::Config("evaluation k must be positive".to_string()));
        }
        if !(1..=10).contains(&self.relevance_threshold) {
            return Err(EngineError::Config(format!(
                "relevance_threshold must be in [1, 10], got {}",
                self.relevance_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(Vec::new()).unwrap();
        assert_eq!(config.strategy.k_neighbors, 20);
        assert_eq!(config.strategy.min_neighbors, 2);
        assert_eq!(config.strategy.liked_threshold, 7);
        assert_eq!(config.evaluation.k, 10);
        assert_eq!(config.hybrid.min_user_ratings, 1);
        assert_eq!(config.retrain.timeout(), Duration::from_secs(1800));
        assert_eq!(config.service.service_name, "recommendation-engine");
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = Config::from_vars(vars(&[
            ("RECO_STRATEGY_K_NEIGHBORS", "30"),
            ("RECO_HYBRID_CONTENT_WEIGHT", "2.0"),
            ("RECO_EVAL_SEED", "7"),
            ("UNRELATED_VAR", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.strategy.k_neighbors, 30);
        assert_eq!(config.evaluation.seed, 7);

        let (content, item_cf, user_cf) = config.hybrid.normalized_weights();
        assert!((content - 0.75).abs() < 1e-9);
        assert!((item_cf - user_cf).abs() < 1e-9);
        assert!((content + item_cf + user_cf - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Config::from_vars(vars(&[("RECO_STRATEGY_K_NEIGHBORS", "0")])).is_err());
        assert!(Config::from_vars(vars(&[("RECO_STRATEGY_MIN_NEIGHBORS", "50")])).is_err());
        assert!(Config::from_vars(vars(&[("RECO_EVAL_TEST_RATIO", "1.5")])).is_err());
        assert!(Config::from_vars(vars(&[("RECO_HYBRID_USER_CF_WEIGHT", "-1")])).is_err());
        assert!(Config::from_vars(vars(&[("RECO_RETRAIN_TIMEOUT_SECS", "0")])).is_err());
        assert!(Config::from_vars(vars(&[("RECO_STRATEGY_K_NEIGHBORS", "many")])).is_err());
    }
}
