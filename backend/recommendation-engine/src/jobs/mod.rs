// ============================================
// Background Jobs Module
// ============================================
//
// Retraining runs off the request path as a background task:
// 1. Snapshot ratings once from the interaction store
// 2. Split, fit and evaluate each requested strategy (blocking pool)
// 3. Register new artifacts and flip the active pointers
//
// Callers poll job state; polling never touches the training task.

pub mod retrain;

pub use retrain::RetrainOrchestrator;
