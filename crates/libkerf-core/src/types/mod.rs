pub mod collection;
pub mod file;
pub mod memory;
pub mod request;

pub use collection::{CompressionLevel, ContextCollection, FileContext};
pub use file::{ContentType, DependencyEdge, EdgeKind, FileFingerprint, FileNode, SymbolInfo};
pub use memory::MemoryRecord;
pub use request::{AgentRole, ContextRequest, Fingerprint, WorkflowPhase};

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
