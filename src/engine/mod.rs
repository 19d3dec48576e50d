//! Run infrastructure shared by the analyzers: file resolution, caching,
//! change tracking, memory sampling and error collection.

mod cache;
mod errors;
pub mod files;
mod incremental;
mod memory;
mod signature;

pub use cache::{CacheStats, CacheStore, NoCache, SourceCache};
pub use errors::{count_by_analyzer, AnalysisError, ErrorAccumulator};
pub use files::{inventory, resolve, truncate, FileSet};
pub use incremental::IncrementalTracker;
pub use memory::{MemoryGuard, MemorySampler, MemoryStatus, ProcessMemorySampler};
pub use signature::ContentSignature;
