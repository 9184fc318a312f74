use crate::models::{ItemId, RetrainTarget, StrategyKind, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Too few co-raters or ratings to produce a strategy output.
    /// Recovered locally by the popularity fallback, never shown to callers.
    #[error("Insufficient data: {0}")]
    DataInsufficient(String),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Retrain already running for target '{0}'")]
    RetrainConflict(RetrainTarget),

    #[error("Training failed: {0}")]
    TrainingFailure(String),

    #[error("Model version {version} not found for strategy '{strategy}'")]
    UnknownVersion { strategy: StrategyKind, version: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_data_insufficient(&self) -> bool {
        matches!(self, EngineError::DataInsufficient(_))
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::TrainingFailure(format!("training task aborted: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_insufficient_classification() {
        assert!(EngineError::DataInsufficient("no co-raters".into()).is_data_insufficient());
        assert!(!EngineError::UnknownUser(UserId(7)).is_data_insufficient());
        assert!(!EngineError::RetrainConflict(RetrainTarget::All).is_data_insufficient());
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::RetrainConflict(RetrainTarget::Strategy(StrategyKind::Hybrid));
        assert_eq!(err.to_string(), "Retrain already running for target 'hybrid'");

        let err = EngineError::UnknownVersion {
            strategy: StrategyKind::ItemCf,
            version: 3,
        };
        assert_eq!(
            err.to_string(),
            "Model version 3 not found for strategy 'item_cf'"
        );
    }
}
