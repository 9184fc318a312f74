pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Result};
pub use jobs::RetrainOrchestrator;
pub use services::{ModelRegistry, RecommendationServer};
pub use store::{DatasetSnapshot, InMemoryStore, InteractionStore};
