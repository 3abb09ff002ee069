//! In-memory analysis result caching for Argus.
//!
//! Two pieces live here:
//! - [`Fingerprint`]: a SHA-256 digest of an analysis unit's inputs (file
//!   contents + active rules + configuration), used as the cache key.
//! - [`ResultCache`]: a bounded memoization map with a per-fingerprint
//!   "single computation in flight" guarantee and change-driven invalidation.

mod fingerprint;
mod result_cache;

pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use result_cache::{CacheConfig, CacheKey, CacheStats, ResultCache};
