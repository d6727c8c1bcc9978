//! Generational response cache for offline support.
//!
//! This module provides the durable response cache that:
//! - Stores successful GET responses keyed by request identity
//! - Groups entries into named generations, purged on rollover
//! - Implements cache-first, network-first and navigation strategies
//! - Serves stale entries or synthetic responses when the network is unavailable

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, OFFLINE_JSON, OFFLINE_PAGE};
pub use storage::{CacheStorage, CachedEntry, NoopStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource};
