//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (hub per request, transaction per route)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Session layer (tower-sessions with `PostgreSQL` store)
//! 5. Rate limiting on checkout routes (governor)
//!
//! Identity is not middleware: handlers take [`CartIdentity`] or
//! [`ExistingIdentity`] as extractors.

pub mod identity;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use identity::{CartIdentity, ExistingIdentity};
pub use rate_limit::{RateLimiterLayer, checkout_rate_limiter};
pub use request_id::request_id_middleware;
pub use session::{SESSION_COOKIE_NAME, create_session_layer, session_layer};
