//! Response cache for application workers
//!
//! Successful responses to cacheable requests are captured while they stream
//! to the client and stored under a key derived from the request path and
//! the configured vary headers. Later requests for the same key are served
//! from the store without reaching the application.
//!
//! # Request Flow
//!
//! | Request | Store | Result |
//! |---------|-------|--------|
//! | `POST` invalidate path | any | every entry removed, `200` summary |
//! | not cacheable | untouched | handler runs, `Passthrough` |
//! | cacheable | entry found | stored response, status header `HIT` |
//! | cacheable | no entry | handler runs, status header `MISS`, 2xx stored |
//!
//! Store failures never fail a request: a failed read is a miss and a failed
//! write leaves the response uncached.

pub mod capture;
pub mod entry;
pub mod key;
pub mod layer;
pub mod store;

pub use capture::{CaptureState, CapturingSink, HIT, MISS};
pub use entry::CacheEntry;
pub use key::CacheKey;
pub use layer::{CacheOutcome, CachePredicate, CacheSettings, InvalidationReport, ResponseCache};
pub use store::{CacheStore, FileStore, MemoryStore, Purged};
