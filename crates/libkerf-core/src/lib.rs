pub mod types;
pub mod hash;
pub mod config;
pub mod error;
pub mod lease;
pub mod tokens;
pub mod extractor;
pub mod index;
pub mod relevance;
pub mod compress;
pub mod memory;

pub use error::KerfError;
pub use types::{
    AgentRole, CompressionLevel, ContentType, ContextCollection, ContextRequest, DependencyEdge, EdgeKind,
    FileContext, FileNode, Fingerprint, MemoryRecord, SymbolInfo, WorkflowPhase,
};
pub use config::{load_config, save_config, KerfConfig};
pub use hash::{compute_request_fingerprint, compute_task_key};
pub use lease::{Lease, LeaseRegistry};
pub use tokens::{Component, TokenBudget, TokenCalculator, TokenEstimator};
pub use extractor::{ExtractorRegistry, StructureExtractor};
pub use index::{CodeIndex, IndexSnapshot, IndexStats, SearchHit, SearchKind};
pub use relevance::{RankedCandidate, RankingSignals, RelevanceFilter};
pub use compress::{Compressed, CompressionStrategy, ContentCompressor};
pub use memory::AgentMemory;
