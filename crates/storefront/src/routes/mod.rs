//! HTTP route handlers for the storefront API.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health               - Liveness check
//! GET    /health/ready         - Readiness check (storage ping)
//!
//! # Cart
//! GET    /cart                 - Caller's cart with totals
//! POST   /cart/items           - Add item (201)
//! PUT    /cart/items/{id}      - Set quantity (0 removes)
//! DELETE /cart/items/{id}      - Remove item
//! DELETE /cart                 - Clear cart
//! GET    /cart/count           - Item count (never creates a cart)
//!
//! # Payment (rate limited in production)
//! POST   /payment/intent       - Create payment intent and pending order
//! POST   /payment/confirm      - Confirm payment
//! POST   /payment/webhook      - Signed gateway events
//!
//! # Orders
//! GET    /orders/{id}          - Order visible to its shopper
//! ```

pub mod cart;
pub mod json;
pub mod orders;
pub mod payment;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
};

use crate::middleware::RateLimiterLayer;
use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).delete(cart::clear))
        .route("/items", post(cart::add_item))
        .route(
            "/items/{id}",
            put(cart::update_item).delete(cart::remove_item),
        )
        .route("/count", get(cart::count))
}

/// Create the payment routes router.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(payment::create_intent))
        .route("/confirm", post(payment::confirm))
        .route("/webhook", post(payment::webhook))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new().route("/{id}", get(orders::show))
}

fn with_payment(payment: Router<AppState>) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/cart", cart_routes())
        .nest("/payment", payment)
        .nest("/orders", order_routes())
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    with_payment(payment_routes())
}

/// All routes, with the payment routes behind `limiter`.
pub fn rate_limited_routes(limiter: RateLimiterLayer) -> Router<AppState> {
    with_payment(payment_routes().layer(limiter))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if storage is not reachable.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
