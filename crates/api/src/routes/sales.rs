//! Walk-in sales endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::ProductId;
use domain::Sale;
use serde::{Deserialize, Serialize};
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateSaleRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct SaleResponse {
    pub id: String,
    pub product_id: String,
    pub quantity_sold: u32,
    pub total_price_cents: i64,
    pub sold_at: DateTime<Utc>,
}

impl From<Sale> for SaleResponse {
    fn from(sale: Sale) -> Self {
        Self {
            id: sale.id.to_string(),
            product_id: sale.product_id.to_string(),
            quantity_sold: sale.quantity_sold,
            total_price_cents: sale.total_price.cents(),
            sold_at: sale.sold_at,
        }
    }
}

/// POST /sales — record a walk-in sale and take the units out of stock.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateSaleRequest>,
) -> Result<(StatusCode, Json<SaleResponse>), ApiError> {
    let product_id: ProductId = parse_id(&req.product_id)?;
    let sale = state.catalog.record_sale(product_id, req.quantity).await?;
    Ok((StatusCode::CREATED, Json(sale.into())))
}

/// GET /sales — list sales, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SaleResponse>>, ApiError> {
    let sales = state.catalog.list_sales().await?;
    Ok(Json(sales.into_iter().map(Into::into).collect()))
}
