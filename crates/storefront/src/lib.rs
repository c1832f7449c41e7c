//! Larder storefront library.
//!
//! The cart and checkout engine (`services`), its storage (`db`) and payment
//! (`payments`) seams, and the JSON API that exposes them. The binary in
//! `main.rs` wires these to `PostgreSQL` and the configured gateway; tests
//! wire them to `MemoryStore` and `FakeGateway`.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod services;
pub mod state;

use std::time::Duration;

use axum::{Router, http::Request, response::Response};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tower_sessions::{SessionManagerLayer, SessionStore};
use tracing::Span;

use crate::middleware::RateLimiterLayer;
use crate::state::AppState;

/// Build the application router.
///
/// `limiter` guards the payment routes; tests pass `None` since oneshot
/// requests carry no client IP.
pub fn app<S>(
    state: AppState,
    session_layer: SessionManagerLayer<S>,
    limiter: Option<RateLimiterLayer>,
) -> Router
where
    S: SessionStore + Clone,
{
    let routes = match limiter {
        Some(limiter) => routes::rate_limited_routes(limiter),
        None => routes::routes(),
    };
    with_layers(routes, state, session_layer)
}

/// Wrap `routes` in the session, request id, tracing and Sentry layers.
pub fn with_layers<S>(
    routes: Router<AppState>,
    state: AppState,
    session_layer: SessionManagerLayer<S>,
) -> Router
where
    S: SessionStore + Clone,
{
    routes
        .layer(session_layer)
        .layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
                    span.record("status", response.status().as_u16());
                    span.record(
                        "latency_ms",
                        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    );
                    DefaultOnResponse::default().on_response(response, latency, span);
                }),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}
