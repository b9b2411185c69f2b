use std::{net::SocketAddr, time::Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::info;

use super::ProxyState;

const BEARER_PREFIX: &str = "bearer ";

/// Structured access log for every request.
pub async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let remote = client_ip(&request);
    let start = Instant::now();

    let response = next.run(request).await;

    let bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    info!(
        target: "specchio::http",
        method = %method,
        path = %uri.path(),
        status = response.status().as_u16(),
        bytes,
        elapsed_ms = start.elapsed().as_millis() as u64,
        remote = %remote,
        "request"
    );

    response
}

pub async fn enforce_rate_limit(
    State(state): State<ProxyState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.limiter {
        let ip = client_ip(&request);
        if !limiter.allow(&ip) {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }
    next.run(request).await
}

pub async fn require_admin(
    State(state): State<ProxyState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = token_matches(
        request.headers(),
        request.uri().query(),
        &state.settings.auth.token,
    );
    if authorized {
        next.run(request).await
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Accept the admin token from `X-Auth-Token`, from `Authorization: Bearer`
/// (scheme match case-insensitive), or from the `token` query parameter.
/// An empty configured token disables auth entirely.
pub(crate) fn token_matches(headers: &HeaderMap, query: Option<&str>, expected: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    match presented_token(headers, query) {
        Some(token) => constant_time_eq(&token, expected),
        None => false,
    }
}

fn presented_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(token) = headers
        .get("x-auth-token")
        .and_then(|value| value.to_str().ok())
    {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if auth.len() > BEARER_PREFIX.len()
            && auth[..BEARER_PREFIX.len()].eq_ignore_ascii_case(BEARER_PREFIX)
        {
            let token = auth[BEARER_PREFIX.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "token")
        .map(|(_, value)| value.into_owned())
}

/// Length mismatch rejects without comparing; equal lengths compare in
/// constant time.
fn constant_time_eq(candidate: &str, expected: &str) -> bool {
    if candidate.is_empty() || expected.is_empty() {
        return false;
    }
    if candidate.len() != expected.len() {
        return false;
    }
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
    {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
