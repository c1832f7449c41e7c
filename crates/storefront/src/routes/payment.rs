//! Checkout route handlers: payment intents, confirmation and gateway
//! webhooks.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use larder_core::{AddressInput, CartId, CurrencyCode, OrderId, OrderStatus, PaymentStatus};

use super::json::{ApiJson, ApiResponse};
use super::orders::OrderView;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::ExistingIdentity;
use crate::models::Order;
use crate::payments::webhook::{SIGNATURE_HEADER, WebhookEvent};
use crate::services::{CheckoutError, IntentCreated};
use crate::state::AppState;

/// Create intent request body.
#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub cart_id: CartId,
    pub shipping_address: AddressInput,
    pub billing_address: AddressInput,
}

/// Confirm payment request body.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub order_id: OrderId,
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub id: OrderId,
    pub order_number: String,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            total: order.total,
            status: order.status,
            payment_status: order.payment_status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub order: OrderSummary,
}

impl From<IntentCreated> for IntentResponse {
    fn from(created: IntentCreated) -> Self {
        Self {
            order: OrderSummary::from(&created.order),
            payment_intent_id: created.payment_intent_id,
            client_secret: created.client_secret,
            amount: created.amount,
            currency: created.currency,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Start checkout for one of the caller's carts.
#[instrument(skip(state, identity, body), fields(cart_id = %body.cart_id))]
pub async fn create_intent(
    State(state): State<AppState>,
    ExistingIdentity(identity): ExistingIdentity,
    ApiJson(body): ApiJson<CreateIntentRequest>,
) -> Result<ApiResponse<IntentResponse>> {
    let created = state
        .checkout()
        .create_intent(
            &identity,
            body.cart_id,
            &body.shipping_address,
            &body.billing_address,
        )
        .await?;

    let order_id = created.order.id.to_string();
    add_breadcrumb(
        "checkout",
        "Payment intent created",
        Some(&[("order_id", order_id.as_str())]),
    );

    Ok(ApiResponse::ok(created.into()))
}

/// Confirm an order after the client finished paying.
#[instrument(skip(state, body), fields(order_id = %body.order_id))]
pub async fn confirm(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ConfirmPaymentRequest>,
) -> Result<ApiResponse<OrderView>> {
    let order = state
        .checkout()
        .confirm_payment(body.order_id, &body.payment_intent_id)
        .await?;
    Ok(ApiResponse::ok(OrderView::new(&state, order)).with_message("Payment confirmed"))
}

/// Gateway webhook. Signed deliveries of `payment_intent.succeeded` confirm
/// the order bound to the intent; other events are acknowledged and ignored.
#[instrument(skip_all)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<WebhookAck>> {
    let Some(verifier) = state.webhook() else {
        warn!("Webhook delivery refused: no signing secret configured");
        return Err(AppError::Unauthorized(
            "Webhooks are not enabled".to_string(),
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing signature".to_string()))?;
    verifier
        .verify(signature, &body, Utc::now().timestamp())
        .map_err(|e| {
            warn!(error = %e, "Webhook signature rejected");
            AppError::Unauthorized("Invalid signature".to_string())
        })?;

    let event = WebhookEvent::parse(&body)
        .map_err(|e| AppError::invalid("body", e.to_string()))?;

    if !event.is_payment_succeeded() {
        info!(event_id = %event.id, event_type = %event.event_type, "Webhook event ignored");
        return Ok(ApiResponse::ok(WebhookAck { received: true }));
    }

    match state.checkout().confirm_by_intent(event.intent_id()).await {
        Ok(order) => {
            info!(event_id = %event.id, order_id = %order.id, "Order confirmed by webhook");
        }
        // The order is already flagged for review; redelivery cannot help.
        Err(CheckoutError::StockExhausted { order_id, .. }) => {
            warn!(event_id = %event.id, %order_id, "Webhook confirm ran out of stock");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(ApiResponse::ok(WebhookAck { received: true }))
}
