//! Specchio is a read-only caching reverse proxy for S3-compatible object
//! storage. Clients issue GET/HEAD against object keys; responses are served
//! from a bounded in-memory LRU when possible and fetched from the origin
//! otherwise, honoring HTTP cache semantics (ETag, Last-Modified,
//! Cache-Control, conditional requests, Age, Range).

pub mod cache;
pub mod config;
pub mod infra;
pub mod origin;
pub mod util;
