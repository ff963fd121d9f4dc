//! Tool-result caching.
//!
//! - `key`: deterministic keys from (tool, server, canonical arguments)
//! - `store`: one TTL + LRU cache per (tool, server) pair
//! - `manager`: executor wrapper that owns the per-pair caches

pub mod key;
pub mod manager;
pub mod store;

pub use key::{canonicalize_arguments, CacheKey};
pub use manager::CacheManager;
pub(crate) use store::hit_rate;
pub use store::{CacheStats, EntryMetadata, ToolCache};
