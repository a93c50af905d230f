//! Product seeding and stock lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{Money, ProductId};
use serde::{Deserialize, Serialize};
use storage::{StockRecord, Store};

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub product_id: String,
    pub name: String,
    pub price_cents: i64,
    pub quantity: u32,
    #[serde(default)]
    pub reorder_threshold: u32,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: String,
    pub quantity: u32,
    pub reorder_threshold: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<StockRecord> for StockResponse {
    fn from(record: StockRecord) -> Self {
        Self {
            product_id: record.product_id.to_string(),
            quantity: record.quantity,
            reorder_threshold: record.reorder_threshold,
            updated_at: record.updated_at,
        }
    }
}

/// POST /products — add a product to the catalog and initialize its stock.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<StockResponse>), ApiError> {
    if req.product_id.trim().is_empty() {
        return Err(ApiError::BadRequest("product_id must not be empty".to_string()));
    }
    if req.price_cents < 0 {
        return Err(ApiError::BadRequest(format!(
            "Invalid price: {} (must not be negative)",
            req.price_cents
        )));
    }

    let product_id = ProductId::new(req.product_id);
    let catalog = state.service.catalog();
    if !catalog
        .insert_new(product_id.clone(), req.name, Money::from_cents(req.price_cents))
        .await
    {
        return Err(ApiError::Conflict(format!(
            "Product already exists: {product_id}"
        )));
    }

    let record = match state
        .service
        .initialize_stock(product_id.clone(), req.quantity, req.reorder_threshold)
        .await
    {
        Ok(record) => record,
        Err(err) => {
            catalog.remove_product(&product_id).await;
            tracing::warn!(%product_id, error = %err, "stock initialization failed");
            return Err(err.into());
        }
    };

    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /products/{id}/stock — current stock record of a product.
#[tracing::instrument(skip(state))]
pub async fn stock<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let product_id = ProductId::new(id);
    let record = state
        .service
        .get_stock(&product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No stock record for {product_id}")))?;

    Ok(Json(record.into()))
}
