//! Origin access: the abstract [`ObjectStore`] contract and its
//! S3-compatible implementation.

pub mod s3;

use std::{io, time::SystemTime};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

pub use s3::S3ObjectStore;

/// Streaming object payload. Dropping the stream cancels any still-pending
/// transfer; reads past the per-request deadline fail with `TimedOut`.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// Conditional headers attached to an origin fetch.
#[derive(Debug, Clone, Default)]
pub struct Conditional {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<SystemTime>,
    pub range: Option<String>,
}

/// A successful origin response. `status` is `200 OK` unless the backend
/// returned a `Content-Range`, in which case it is `206 Partial Content`.
pub struct ObjectPayload {
    pub body: Option<ObjectBody>,
    pub headers: HeaderMap,
    pub status: StatusCode,
    pub content_length: i64,
    pub etag: String,
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("object not found")]
    NotFound,
    #[error("object not modified")]
    NotModified,
    #[error("precondition failed")]
    Precondition,
    #[error("origin transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Read-only object storage contract consumed by the request path.
///
/// Implementations compose an internal per-request deadline with the
/// caller's cancellation (dropping the returned future aborts the request).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, honoring conditional headers and an optional byte
    /// range.
    async fn get(&self, key: &str, cond: &Conditional) -> Result<ObjectPayload, OriginError>;

    /// Fetch object metadata only. `cond.range` is ignored.
    async fn head(&self, key: &str, cond: &Conditional) -> Result<ObjectPayload, OriginError>;
}
