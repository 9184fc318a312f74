pub mod evaluation;
pub mod registry;
pub mod server;
pub mod similarity;
pub mod strategies;

pub use evaluation::{Evaluator, ModelMetrics};
pub use registry::{ModelArtifact, ModelRegistry};
pub use server::RecommendationServer;
pub use strategies::ScoringStrategy;
