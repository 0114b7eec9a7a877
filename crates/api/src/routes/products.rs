//! Catalog endpoints: products, stock and low-stock report.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::ProductId;
use domain::{Category, Money, Product, ProductDetails};
use serde::{Deserialize, Serialize};
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct ProductRequest {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub size: String,
    pub buying_price_cents: i64,
    pub selling_price_cents: i64,
}

#[derive(Deserialize)]
pub struct CreateProductRequest {
    #[serde(flatten)]
    pub details: ProductRequest,
    #[serde(default)]
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<u32>,
}

impl From<ProductRequest> for ProductDetails {
    fn from(req: ProductRequest) -> Self {
        ProductDetails {
            name: req.name,
            category: req.category,
            size: req.size,
            buying_price: Money::from_cents(req.buying_price_cents),
            selling_price: Money::from_cents(req.selling_price_cents),
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub category_label: &'static str,
    pub size: String,
    pub buying_price_cents: i64,
    pub selling_price_cents: i64,
    pub quantity_on_hand: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            category_label: product.category.label(),
            name: product.name,
            category: product.category,
            size: product.size,
            buying_price_cents: product.buying_price.cents(),
            selling_price_cents: product.selling_price.cents(),
            quantity_on_hand: product.quantity_on_hand,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

// -- Handlers --

/// POST /products — add a product with its opening stock.
#[tracing::instrument(skip(state, req), fields(name = %req.details.name))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let product = state
        .catalog
        .add_product(req.details.into(), req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// GET /products — list all products, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state.catalog.list_products().await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// GET /products/low-stock — products at or below the threshold.
#[tracing::instrument(skip(state, query))]
pub async fn low_stock<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<LowStockQuery>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let threshold = query.threshold.unwrap_or(state.low_stock_threshold);
    let products = state.catalog.low_stock(threshold).await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// GET /products/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id(&id)?;
    Ok(Json(state.catalog.get_product(id).await?.into()))
}

/// PUT /products/:id — replace descriptive and pricing fields.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id(&id)?;
    let product = state.catalog.update_product(id, req.into()).await?;
    Ok(Json(product.into()))
}

/// DELETE /products/:id
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ProductId = parse_id(&id)?;
    state.catalog.delete_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /products/:id/restock
#[tracing::instrument(skip(state, req))]
pub async fn restock<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id(&id)?;
    let product = state.catalog.restock(id, req.quantity).await?;
    Ok(Json(product.into()))
}
