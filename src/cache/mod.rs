//! Cache Module
//!
//! Two-tier TTL cache (external store + bounded in-process fallback) used to
//! memoize token USD prices, hop quotes and the last good gas ceiling.

pub mod layered;
pub mod memory;
pub mod store;

pub use layered::{CacheConfig, TwoTierCache};
pub use memory::{CacheEntry, MemoryCache};
pub use store::{CacheError, RedisStore, RemoteStore};
