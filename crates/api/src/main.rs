//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::{InMemoryPaymentGateway, MpesaGateway, PaymentGateway};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn describe_metrics() {
    metrics::describe_counter!("orders_created_total", "Orders opened by customers");
    metrics::describe_counter!("order_items_added_total", "Successful add-item commands");
    metrics::describe_counter!(
        "stock_rejections_total",
        "Adds and sales refused for insufficient stock"
    );
    metrics::describe_counter!("payments_initiated_total", "STK pushes accepted by the provider");
    metrics::describe_counter!(
        "payment_gateway_failures_total",
        "STK pushes that failed with an auth or provider error"
    );
    metrics::describe_counter!("payment_callbacks_total", "Provider callbacks by outcome");
    metrics::describe_counter!(
        "payment_amount_mismatches_total",
        "Success callbacks whose paid amount differs from the amount requested"
    );
    metrics::describe_histogram!(
        "payment_gateway_duration_seconds",
        metrics::Unit::Seconds,
        "Latency of outbound STK push requests"
    );
}

fn build_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    match config.mpesa.gateway_config() {
        Some(mpesa) => {
            tracing::info!(base_url = %mpesa.base_url, "using M-Pesa gateway");
            Arc::new(MpesaGateway::new(mpesa).expect("failed to build M-Pesa HTTP client"))
        }
        None => {
            tracing::warn!(
                "MPESA_CONSUMER_KEY/MPESA_CONSUMER_SECRET not set; payments use the in-memory sandbox gateway"
            );
            Arc::new(InMemoryPaymentGateway::new())
        }
    }
}

async fn serve<S: Store + Clone + 'static>(
    store: S,
    config: &Config,
    gateway: Arc<dyn PaymentGateway>,
    metrics_handle: PrometheusHandle,
) {
    let state = Arc::new(AppState::new(store, gateway, config.low_stock_threshold));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    describe_metrics();

    // 3. Payment provider
    let gateway = build_gateway(&config);

    // 4. Store and server
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(store, &config, gateway, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            serve(InMemoryStore::new(), &config, gateway, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
