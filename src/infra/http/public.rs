//! The object-serving path: cache consultation, conditional composition,
//! origin fetch, outcome dispatch, and the admission decision.

use std::{
    io,
    sync::Arc,
    time::{Instant, SystemTime},
};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, error};

use crate::{
    cache::{CacheEntry, policy},
    origin::{Conditional, ObjectBody, ObjectPayload, OriginError},
};

use super::ProxyState;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Serve a GET/HEAD for the object at the request path.
///
/// The decision sequence is ordered: admission control, cache consultation
/// (fresh hit, stale-while-revalidate, or fall through with the stale entry
/// as a conditional hint), conditional composition, origin fetch, outcome
/// dispatch, and finally the admission decision for successful fetches.
pub async fn serve_object(
    State(state): State<ProxyState>,
    method: Method,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    if key.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    if key.contains("..") {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let now = SystemTime::now();
    let use_cache = policy::should_use_cache(&method, &headers);
    let lookup_cache = use_cache || method == Method::HEAD;

    let mut hint: Option<Arc<CacheEntry>> = None;
    if lookup_cache {
        if let Some(entry) = state.cache.get(&key) {
            if entry.fresh(now) {
                state.metrics.cache_hits.inc();
                return cached_response(&state, &method, &entry, now, "HIT");
            }
            if use_cache && entry.stale_but_valid(now) && method == Method::GET {
                state.metrics.cache_stales.inc();
                let response = cached_response(&state, &method, &entry, now, "STALE");
                spawn_revalidation(state.clone(), key.clone(), Arc::clone(&entry));
                return response;
            }
            hint = Some(entry);
        }
    }

    let mut cond = policy::build_conditional(&headers);
    if let Some(entry) = &hint {
        if cond.if_none_match.is_none() && !entry.etag.is_empty() {
            cond.if_none_match = Some(entry.etag.clone());
        }
        if cond.if_modified_since.is_none() {
            cond.if_modified_since = entry.last_modified;
        }
    }
    if method == Method::GET {
        cond.range = headers
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
    }

    let started = Instant::now();
    let fetched = if method == Method::HEAD {
        state.origin.head(&key, &cond).await
    } else {
        state.origin.get(&key, &cond).await
    };
    let mut payload = match fetched {
        Ok(payload) => {
            state
                .metrics
                .origin_latency
                .observe(started.elapsed().as_secs_f64());
            payload
        }
        Err(err) => return origin_error_response(&state, &method, err, hint, now, &key),
    };

    let max_object_size = state.settings.cache.max_object_size;
    let should_store = use_cache
        && method == Method::GET
        && cond.range.is_none()
        && payload.status == StatusCode::OK
        && payload.content_length > 0
        && payload.content_length as u64 <= max_object_size
        && !policy::has_no_store(&payload.headers);

    if should_store {
        let body = payload.body.take().unwrap_or_else(empty_body);
        let (buffered, remainder) = match buffer_up_to(body, max_object_size).await {
            Ok(read) => read,
            Err(err) => {
                error!(target: "specchio::http", error = %err, key = %key, "read origin body");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };
        match remainder {
            None => {
                state.metrics.cache_misses.inc();
                let mut entry = CacheEntry {
                    size: buffered.len() as u64,
                    body: Bytes::from(buffered),
                    headers: payload.headers.clone(),
                    status: payload.status,
                    stored_at: now,
                    ttl: policy::ttl_from_headers(&payload.headers, state.settings.cache.ttl),
                    stale_ttl: state.settings.cache.stale_ttl,
                    etag: payload.etag.clone(),
                    last_modified: payload.last_modified,
                };
                // max-age=0 yields a zero TTL from the headers, but once the
                // admission decision has been made the default applies.
                if entry.ttl.is_zero() {
                    entry.ttl = state.settings.cache.ttl;
                }
                state.cache.set(key.clone(), entry.clone());
                return cached_response(&state, &method, &entry, now, "MISS");
            }
            Some(rest) => {
                // The object outgrew the admission limit mid-read: abandon
                // storage and stream the buffered bytes plus the remainder.
                let prefix =
                    stream::once(async move { Ok::<_, io::Error>(Bytes::from(buffered)) });
                payload.body = Some(prefix.chain(rest).boxed());
            }
        }
    }

    pass_through(&state, &method, payload)
}

/// Read at most one byte past `limit`. Returns the buffered bytes and, on
/// overflow, the unread remainder of the stream.
async fn buffer_up_to(
    mut body: ObjectBody,
    limit: u64,
) -> io::Result<(Vec<u8>, Option<ObjectBody>)> {
    let mut buffered: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        buffered.extend_from_slice(&chunk);
        if buffered.len() as u64 > limit {
            return Ok((buffered, Some(body)));
        }
    }
    Ok((buffered, None))
}

fn empty_body() -> ObjectBody {
    stream::empty::<io::Result<Bytes>>().boxed()
}

fn origin_error_response(
    state: &ProxyState,
    method: &Method,
    err: OriginError,
    hint: Option<Arc<CacheEntry>>,
    now: SystemTime,
    key: &str,
) -> Response {
    match err {
        OriginError::NotModified => {
            if let Some(entry) = hint {
                let mut refreshed = (*entry).clone();
                refreshed.stored_at = now;
                state.cache.set(key.to_string(), refreshed.clone());
                state.metrics.cache_hits.inc();
                return cached_response(state, method, &refreshed, now, "REVALIDATED");
            }
            StatusCode::NOT_MODIFIED.into_response()
        }
        OriginError::NotFound => StatusCode::NOT_FOUND.into_response(),
        OriginError::Precondition => StatusCode::PRECONDITION_FAILED.into_response(),
        OriginError::Transport(source) => {
            state.metrics.origin_errors.inc();
            error!(target: "specchio::http", error = %source, key = %key, "origin fetch failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn cached_response(
    state: &ProxyState,
    method: &Method,
    entry: &CacheEntry,
    now: SystemTime,
    cache_state: &'static str,
) -> Response {
    let mut headers = entry.headers.clone();
    headers.insert(header::AGE, HeaderValue::from(entry.age(now)));
    headers.insert(X_CACHE, HeaderValue::from_static(cache_state));

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        state.metrics.bytes_served.inc_by(entry.body.len() as u64);
        Body::from(entry.body.clone())
    };

    let mut response = Response::new(body);
    *response.status_mut() = entry.status;
    *response.headers_mut() = headers;
    response
}

fn pass_through(state: &ProxyState, method: &Method, mut payload: ObjectPayload) -> Response {
    state.metrics.cache_misses.inc();

    let mut headers = payload.headers.clone();
    headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
    if payload.content_length > 0 {
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(payload.content_length),
        );
    }

    let body = if *method == Method::HEAD {
        Body::empty()
    } else if let Some(stream) = payload.body.take() {
        let bytes_served = state.metrics.bytes_served.clone();
        Body::from_stream(
            stream.inspect_ok(move |chunk| bytes_served.inc_by(chunk.len() as u64)),
        )
    } else {
        Body::empty()
    };

    let mut response = Response::new(body);
    *response.status_mut() = payload.status;
    *response.headers_mut() = headers;
    response
}

/// Fire-and-forget revalidation after a STALE serve. Runs detached from the
/// originating request with a fresh origin deadline; a 304 re-freshens the
/// entry, a suitable 200 replaces it, anything else leaves it untouched.
fn spawn_revalidation(state: ProxyState, key: String, entry: Arc<CacheEntry>) {
    tokio::spawn(async move {
        let mut cond = Conditional::default();
        if !entry.etag.is_empty() {
            cond.if_none_match = Some(entry.etag.clone());
        }
        cond.if_modified_since = entry.last_modified;

        match state.origin.get(&key, &cond).await {
            Err(OriginError::NotModified) => {
                let mut refreshed = (*entry).clone();
                refreshed.stored_at = SystemTime::now();
                state.cache.set(key, refreshed);
            }
            Err(err) => {
                debug!(
                    target: "specchio::http",
                    error = %err,
                    key = %key,
                    "revalidation left entry untouched"
                );
            }
            Ok(mut payload) => {
                let max_object_size = state.settings.cache.max_object_size;
                if payload.content_length <= 0 || payload.content_length as u64 > max_object_size
                {
                    return;
                }
                let Some(body) = payload.body.take() else {
                    return;
                };
                let buffered = match buffer_up_to(body, max_object_size).await {
                    Ok((buffered, None)) => buffered,
                    // Read failures and oversize bodies both leave the
                    // existing entry in place.
                    Ok((_, Some(_))) | Err(_) => return,
                };

                let updated = CacheEntry {
                    size: buffered.len() as u64,
                    body: Bytes::from(buffered),
                    headers: payload.headers.clone(),
                    status: payload.status,
                    stored_at: SystemTime::now(),
                    ttl: policy::ttl_from_headers(&payload.headers, state.settings.cache.ttl),
                    stale_ttl: state.settings.cache.stale_ttl,
                    etag: payload.etag.clone(),
                    last_modified: payload.last_modified,
                };
                state.cache.set(key, updated);
            }
        }
    });
}
