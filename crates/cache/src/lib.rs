//! Render cache for page bitmaps with LRU eviction under entry and byte
//! budgets, keyed by (page uid, rotation, resolution).

pub mod render;

pub use render::{CacheBudget, CacheStats, CachedRender, RenderCache, RenderKey};
