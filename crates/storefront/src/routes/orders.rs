//! Order route handlers.

use axum::extract::{Path, State};
use serde::Serialize;
use tracing::instrument;

use larder_core::OrderId;

use super::json::ApiResponse;
use crate::error::Result;
use crate::middleware::ExistingIdentity;
use crate::models::{CheckoutState, Order};
use crate::state::AppState;

/// Full order payload with its derived checkout state.
#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub checkout_state: CheckoutState,
}

impl OrderView {
    pub fn new(state: &AppState, order: Order) -> Self {
        Self {
            checkout_state: state.checkout().state_of(&order),
            order,
        }
    }
}

/// Show an order to the shopper who placed it; anyone else gets a 404.
#[instrument(skip(state, identity), fields(order_id = %order_id))]
pub async fn show(
    State(state): State<AppState>,
    ExistingIdentity(identity): ExistingIdentity,
    Path(order_id): Path<OrderId>,
) -> Result<ApiResponse<OrderView>> {
    let order = state.checkout().order_for(order_id, &identity).await?;
    Ok(ApiResponse::ok(OrderView::new(&state, order)))
}
