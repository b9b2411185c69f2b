pub mod admin;
pub mod middleware;
pub mod public;
pub mod rate_limit;


use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::{cache::ObjectCache, config::Settings, infra::metrics::Metrics, origin::ObjectStore};

pub use rate_limit::IpRateLimiter;

/// Shared request-path state: configuration, the LRU, the origin client,
/// metrics, and the optional per-IP limiter.
#[derive(Clone)]
pub struct ProxyState {
    pub settings: Arc<Settings>,
    pub cache: Arc<ObjectCache>,
    pub origin: Arc<dyn ObjectStore>,
    pub metrics: Arc<Metrics>,
    pub limiter: Option<Arc<IpRateLimiter>>,
}

pub fn build_router(state: ProxyState) -> Router {
    let admin_routes = Router::new()
        .route("/cache/purge", post(admin::purge))
        .route("/metrics", get(admin::metrics))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    Router::new()
        .route("/healthz", get(admin::health))
        .merge(admin_routes)
        .route("/{*path}", get(public::serve_object))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::enforce_rate_limit,
        ))
        .layer(axum_middleware::from_fn(middleware::log_requests))
        .with_state(state)
}
