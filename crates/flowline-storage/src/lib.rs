// Flowline storage: in-memory stores behind service types
//
// The contracts are storage-agnostic; these implementations keep
// everything in process memory, which is sufficient for a single-node
// engine and for tests.

pub mod cache;
pub mod execution_store;
pub mod workflow_store;

pub use cache::{
    compute_inputs_hash, generate_cache_key, CacheEntry, CacheKey, CacheStats, ResultCache,
    TenantCacheStats,
};
pub use execution_store::{compute_downstream_nodes, ExecutionStore};
pub use workflow_store::WorkflowStore;
