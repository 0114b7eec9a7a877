//! Customer order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use domain::{Order, OrderItem};
use serde::{Deserialize, Serialize};
use store::Store;

use super::{CurrentCustomer, parse_id};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
            subtotal_cents: item.subtotal().cents(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            customer_id: order.customer_id().to_string(),
            status: order.status().to_string(),
            items: order.items().iter().map(Into::into).collect(),
            total_cents: order.total_price().cents(),
            version: order.version().as_i64(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders — open a new pending order for the caller.
#[tracing::instrument(skip(state))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.orders.create_order(customer).await?;
    Ok((StatusCode::CREATED, Json((&order).into())))
}

/// GET /orders — the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.list_orders(customer).await?;
    Ok(Json(orders.iter().map(Into::into).collect()))
}

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let order = state.orders.get_order(customer, order_id).await?;
    Ok(Json((&order).into()))
}

/// DELETE /orders/:id — delete a pending or cancelled order.
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    state.orders.delete_order(customer, order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /orders/:id/items — add units of a product, reserving stock.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let product_id: ProductId = parse_id(&req.product_id)?;

    let result = state
        .orders
        .add_item(customer, order_id, product_id, req.quantity)
        .await?;
    Ok(Json((&result.order).into()))
}

/// PUT /orders/:id/items/:product_id — set a line's quantity; zero removes it.
#[tracing::instrument(skip(state, req))]
pub async fn update_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path((id, product_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let product_id: ProductId = parse_id(&product_id)?;

    let result = state
        .orders
        .update_item_quantity(customer, order_id, product_id, req.quantity)
        .await?;
    Ok(Json((&result.order).into()))
}

/// DELETE /orders/:id/items/:product_id
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path((id, product_id)): Path<(String, String)>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let product_id: ProductId = parse_id(&product_id)?;

    let result = state
        .orders
        .remove_item(customer, order_id, product_id)
        .await?;
    Ok(Json((&result.order).into()))
}

/// POST /orders/:id/checkout — confirm a pending order.
#[tracing::instrument(skip(state))]
pub async fn checkout<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let result = state.orders.checkout(customer, order_id).await?;
    Ok(Json((&result.order).into()))
}

/// POST /orders/:id/cancel — cancel and release stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentCustomer(customer): CurrentCustomer,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let result = state.orders.cancel(customer, order_id).await?;
    Ok(Json((&result.order).into()))
}

/// POST /orders/:id/deliver — staff marks a paid order delivered.
#[tracing::instrument(skip(state))]
pub async fn deliver<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let result = state.orders.mark_delivered(order_id).await?;
    Ok(Json((&result.order).into()))
}
