//! Pure cache-decision helpers: request cacheability, response admission
//! directives, TTL extraction, and conditional header derivation.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, Method, header};

use crate::{origin::Conditional, util::http_date};

/// Whether a request is allowed to be answered from (and admitted to) the
/// cache: GET only, no `Range`, and no client opt-out via `Cache-Control:
/// no-cache`, `Cache-Control: max-age=0`, or `Pragma: no-cache`.
pub fn should_use_cache(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET {
        return false;
    }
    if headers.contains_key(header::RANGE) {
        return false;
    }
    if header_has_token(headers, &header::CACHE_CONTROL, "no-cache")
        || header_has_token(headers, &header::CACHE_CONTROL, "max-age=0")
    {
        return false;
    }
    !header_has_token(headers, &header::PRAGMA, "no-cache")
}

/// Whether a response forbids storage via the `no-store` directive.
pub fn has_no_store(headers: &HeaderMap) -> bool {
    header_has_token(headers, &header::CACHE_CONTROL, "no-store")
}

/// Extract the freshness TTL from a response `Cache-Control` header.
///
/// The first `max-age=N` directive wins: `N <= 0` yields a zero TTL (the
/// response is not cacheable by freshness), `N > 0` yields `N` seconds.
/// Absent or unparseable directives yield `fallback`.
pub fn ttl_from_headers(headers: &HeaderMap, fallback: Duration) -> Duration {
    for directive in directives(headers, &header::CACHE_CONTROL) {
        if let Some(value) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = value.trim().parse::<i64>() {
                if secs <= 0 {
                    return Duration::ZERO;
                }
                return Duration::from_secs(secs as u64);
            }
        }
    }
    fallback
}

/// Derive the client-supplied conditional from request headers. `Range` is
/// left unset here; the handler copies it for GET requests only.
pub fn build_conditional(headers: &HeaderMap) -> Conditional {
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(http_date::parse);

    Conditional {
        if_none_match,
        if_modified_since,
        range: None,
    }
}

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    directives(headers, name).any(|directive| directive.eq_ignore_ascii_case(token))
}

fn directives<'a>(
    headers: &'a HeaderMap,
    name: &'a HeaderName,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn plain_get_uses_cache() {
        assert!(should_use_cache(&Method::GET, &HeaderMap::new()));
        assert!(!should_use_cache(&Method::HEAD, &HeaderMap::new()));
        assert!(!should_use_cache(&Method::POST, &HeaderMap::new()));
    }

    #[test]
    fn range_requests_bypass_cache() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=0-1".parse().unwrap());
        assert!(!should_use_cache(&Method::GET, &headers));
    }

    #[test]
    fn cache_control_opt_outs_bypass_cache() {
        for value in ["no-cache", "NO-CACHE", "public , no-cache", "max-age=0"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::CACHE_CONTROL, value.parse().unwrap());
            assert!(!should_use_cache(&Method::GET, &headers), "value {value}");
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, "public".parse().unwrap());
        assert!(should_use_cache(&Method::GET, &headers));
    }

    #[test]
    fn pragma_no_cache_bypasses_cache() {
        let mut headers = HeaderMap::new();
        headers.insert(header::PRAGMA, "No-Cache".parse().unwrap());
        assert!(!should_use_cache(&Method::GET, &headers));
    }

    #[test]
    fn detects_no_store() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, "public".parse().unwrap());
        assert!(!has_no_store(&headers));

        headers.insert(
            header::CACHE_CONTROL,
            "public, no-store".parse().unwrap(),
        );
        assert!(has_no_store(&headers));
    }

    #[test]
    fn ttl_from_max_age() {
        let fallback = Duration::from_secs(300);

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, "max-age=60".parse().unwrap());
        assert_eq!(ttl_from_headers(&headers, fallback), Duration::from_secs(60));

        headers.insert(
            header::CACHE_CONTROL,
            "public, max-age=7200, immutable".parse().unwrap(),
        );
        assert_eq!(
            ttl_from_headers(&headers, fallback),
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn ttl_falls_back_without_directive() {
        let fallback = Duration::from_secs(10);

        assert_eq!(ttl_from_headers(&HeaderMap::new(), fallback), fallback);

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
        assert_eq!(ttl_from_headers(&headers, fallback), fallback);

        headers.insert(header::CACHE_CONTROL, "max-age=banana".parse().unwrap());
        assert_eq!(ttl_from_headers(&headers, fallback), fallback);
    }

    #[test]
    fn non_positive_max_age_yields_zero_ttl() {
        let fallback = Duration::from_secs(300);
        for value in ["max-age=0", "max-age=-5"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::CACHE_CONTROL, value.parse().unwrap());
            assert_eq!(ttl_from_headers(&headers, fallback), Duration::ZERO);
        }
    }

    #[test]
    fn conditional_copies_validators() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, "\"v1\"".parse().unwrap());
        headers.insert(
            header::IF_MODIFIED_SINCE,
            "Sun, 06 Nov 1994 08:49:37 GMT".parse().unwrap(),
        );

        let cond = build_conditional(&headers);
        assert_eq!(cond.if_none_match.as_deref(), Some("\"v1\""));
        assert_eq!(
            cond.if_modified_since,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777))
        );
        assert!(cond.range.is_none());
    }

    #[test]
    fn malformed_if_modified_since_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, "not a date".parse().unwrap());

        let cond = build_conditional(&headers);
        assert!(cond.if_modified_since.is_none());
    }
}
