//! HTTP API server for the shop.
//!
//! Provides REST endpoints for the catalog, walk-in sales, customer orders
//! and M-Pesa payments, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{CatalogService, OrderService};
use payments::{CallbackReconciler, PaymentGateway, PaymentService};
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub catalog: CatalogService<S>,
    pub orders: OrderService<S>,
    pub payments: PaymentService<S>,
    pub reconciler: CallbackReconciler<S>,
    /// Default threshold for `GET /products/low-stock`.
    pub low_stock_threshold: u32,
}

impl<S: Store + Clone> AppState<S> {
    /// Wires every service to the same store.
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>, low_stock_threshold: u32) -> Self {
        Self {
            catalog: CatalogService::new(store.clone()),
            orders: OrderService::new(store.clone()),
            payments: PaymentService::new(store.clone(), gateway),
            reconciler: CallbackReconciler::new(store),
            low_stock_threshold,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{orders, payments, products, sales};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // Catalog
        .route("/products", post(products::create::<S>).get(products::list::<S>))
        .route("/products/low-stock", get(products::low_stock::<S>))
        .route(
            "/products/{id}",
            get(products::get::<S>)
                .put(products::update::<S>)
                .delete(products::delete::<S>),
        )
        .route("/products/{id}/restock", post(products::restock::<S>))
        .route("/sales", post(sales::create::<S>).get(sales::list::<S>))
        // Orders
        .route("/orders", post(orders::create::<S>).get(orders::list::<S>))
        .route(
            "/orders/{id}",
            get(orders::get::<S>).delete(orders::delete::<S>),
        )
        .route("/orders/{id}/items", post(orders::add_item::<S>))
        .route(
            "/orders/{id}/items/{product_id}",
            put(orders::update_item::<S>).delete(orders::remove_item::<S>),
        )
        .route("/orders/{id}/checkout", post(orders::checkout::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route("/orders/{id}/deliver", post(orders::deliver::<S>))
        // Payments
        .route("/orders/{id}/pay", post(payments::pay::<S>))
        .route("/orders/{id}/payments", get(payments::list::<S>))
        .route("/mpesa/callback", post(payments::callback::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
