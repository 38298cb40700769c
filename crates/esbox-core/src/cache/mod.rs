//! Two-tier memoisation for CDN responses.
//!
//! Both tiers are keyed by request path. The local tier is a process-local
//! map of raw response bytes; the persistent tier is a disk-backed key/value
//! database surviving restarts. A transform failure over cached data is
//! treated as a miss and triggers a live refetch, so a corrupted entry can
//! never wedge the caller.

mod local;
mod store;

pub use local::LocalCache;
pub use store::{CacheDb, StoreName, DB_NAME, DB_VERSION};
