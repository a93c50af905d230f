//! Order endpoints: creation, line edits and state transitions.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{
    FulfillmentError, FulfillmentService, InMemoryCatalog, InMemoryUserDirectory, Order, OrderId,
    OrderState, ProductId, UserId,
};
use serde::{Deserialize, Serialize};
use storage::Store;

use crate::error::ApiError;

/// The service the HTTP layer drives. Catalog and users live in memory and
/// are seeded through `/products` and `/users`.
pub type Service<S> = FulfillmentService<S, InMemoryCatalog, InMemoryUserDirectory>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub service: Service<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct AddLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub target: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub state: OrderState,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub line_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub state: OrderState,
}

#[derive(Serialize)]
pub struct LineAddedResponse {
    pub order_id: String,
    pub line_id: String,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            state: order.state(),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    line_id: line.line_id.to_string(),
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    subtotal_cents: line.subtotal().cents(),
                })
                .collect(),
            total_cents: order.total().cents(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders — create an empty order for a user.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let user_id = UserId::from_uuid(parse_uuid(&req.user_id)?);
    let order_id = state.service.create_order(user_id).await?;

    let response = OrderCreatedResponse {
        order_id: order_id.to_string(),
        state: OrderState::Entered,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders/{id} — load an order with its lines.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .service
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order not found: {id}")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/lines — add a product, merging into an existing line.
#[tracing::instrument(skip(state, req))]
pub async fn add_line<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AddLineRequest>,
) -> Result<Json<LineAddedResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let line_id = state
        .service
        .add_or_merge_line(order_id, ProductId::new(req.product_id), req.quantity)
        .await?;

    Ok(Json(LineAddedResponse {
        order_id: order_id.to_string(),
        line_id: line_id.to_string(),
    }))
}

/// DELETE /orders/{id}/lines/{product_id} — remove a line.
#[tracing::instrument(skip(state))]
pub async fn remove_line<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, product_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;
    state
        .service
        .remove_line(order_id, ProductId::new(product_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /orders/{id}/transition — move the order to another state.
#[tracing::instrument(skip(state, req))]
pub async fn transition<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let target: OrderState = req.target.parse().map_err(FulfillmentError::from)?;
    let order = state.service.transition_state(order_id, target).await?;

    Ok(Json(OrderResponse::from(&order)))
}

// -- Helpers --

pub(crate) fn parse_uuid(id: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    Ok(OrderId::from_uuid(parse_uuid(id)?))
}
