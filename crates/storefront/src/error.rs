//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server errors to Sentry
//! before responding to the client. All route handlers return
//! `Result<T, AppError>`. Error bodies share one JSON shape:
//!
//! ```json
//! { "success": false, "error": "out_of_stock", "message": "...", "errors": { "field": ["..."] } }
//! ```

use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{CartError, CheckoutError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Cart operation failed.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Checkout operation failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Request body or parameters failed validation.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: BTreeMap<String, Vec<String>>,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller could not be authenticated (e.g. bad webhook signature).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a BTreeMap<String, Vec<String>>>,
}

impl AppError {
    /// A single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            errors: BTreeMap::from([(field.to_owned(), vec![message.clone()])]),
            message,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cart(err) => match err {
                CartError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CartError::CartNotFound | CartError::ItemNotFound => StatusCode::NOT_FOUND,
                CartError::MissingIdentity
                | CartError::ProductUnavailable(_)
                | CartError::VariationRequired(_)
                | CartError::OutOfStock { .. }
                | CartError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
                CartError::Stock(_) | CartError::Repository(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Checkout(err) => match err {
                CheckoutError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CheckoutError::CartNotFound | CheckoutError::OrderNotFound => {
                    StatusCode::NOT_FOUND
                }
                CheckoutError::EmptyCart
                | CheckoutError::ProductUnavailable(_)
                | CheckoutError::OutOfStock { .. }
                | CheckoutError::PaymentIntentMismatch
                | CheckoutError::OrderNotPayable(_)
                | CheckoutError::PaymentNotCompleted { .. }
                | CheckoutError::StockExhausted { .. } => StatusCode::BAD_REQUEST,
                CheckoutError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
                CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
                CheckoutError::Amount(_)
                | CheckoutError::Order(_)
                | CheckoutError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable kind for the `error` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Internal(_) => "server_error",
            Self::Cart(err) => err.kind(),
            Self::Checkout(err) => err.kind(),
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
        }
    }

    fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::Validation { errors, .. } => Some(errors),
            Self::Checkout(CheckoutError::Validation(err)) => Some(&err.fields),
            _ => None,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Cart(err) => err.to_string(),
            Self::Checkout(CheckoutError::Gateway(_)) => "Payment service error".to_string(),
            Self::Checkout(CheckoutError::GatewayTimeout) => {
                "Payment service did not respond in time".to_string()
            }
            Self::Checkout(CheckoutError::Validation(_)) => "Invalid address".to_string(),
            Self::Checkout(err) => err.to_string(),
            Self::Validation { message, .. }
            | Self::NotFound(message)
            | Self::Unauthorized(message)
            | Self::BadRequest(message) => message.clone(),
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.public_message()
        };

        let body = ErrorBody {
            success: false,
            error: self.kind(),
            message,
            errors: self.field_errors(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for shopper actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Item added", Some(&[("cart_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
