pub mod cache;
pub mod scorer;
pub mod manager;
pub mod workers;

pub use cache::{CacheStats, Computed, ContextCache, SharedBundle};
pub use manager::ContextManager;
pub use scorer::{SemanticScorer, TokenOverlapScorer};
pub use workers::WorkerSet;
