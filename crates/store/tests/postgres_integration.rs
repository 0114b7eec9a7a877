//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{CustomerId, OrderId, ProductId, Version};
use domain::{
    Category, Money, Order, OrderStatus, Payment, PaymentStatus, PhoneNumber, Product,
    ProductDetails, Sale, StockAdjustment, SuccessDetails,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{PostgresStore, Store, StoreError, StoreExt};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_inventory_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payments, order_items, orders, sales, products")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn product(name: &str, quantity: u32) -> Product {
    Product::create(
        ProductDetails {
            name: name.to_string(),
            category: Category::Jeans,
            size: "32".to_string(),
            buying_price: Money::from_units(800),
            selling_price: Money::from_cents(149_950),
        },
        quantity,
        Utc::now(),
    )
    .unwrap()
}

async fn stored_order(store: &PostgresStore) -> Order {
    let mut order = Order::new(CustomerId::new(), Utc::now());
    let version = store.insert_order(&order).await.unwrap();
    order.set_version(version);
    order
}

fn pending_payment(order_id: OrderId, checkout_request_id: &str) -> Payment {
    Payment::pending(
        order_id,
        PhoneNumber::parse("0712345678").unwrap(),
        Money::from_units(300),
        checkout_request_id,
        Some("29115-34620561-1".to_string()),
        Utc::now(),
    )
}

#[tokio::test]
#[serial]
async fn product_round_trip() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", 4);
    store.insert_product(&jeans).await.unwrap();

    let loaded = store.require_product(jeans.id).await.unwrap();
    assert_eq!(loaded.name, "Levi's 501");
    assert_eq!(loaded.category, Category::Jeans);
    assert_eq!(loaded.selling_price, Money::from_cents(149_950));
    assert_eq!(loaded.quantity_on_hand, 4);

    assert!(store.get_product(ProductId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn guarded_decrement_stops_at_zero() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", 2);
    store.insert_product(&jeans).await.unwrap();

    let remaining = store
        .adjust_stock(StockAdjustment::reserve(jeans.id, 2), Utc::now())
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let result = store
        .adjust_stock(StockAdjustment::reserve(jeans.id, 1), Utc::now())
        .await;
    match result {
        Err(StoreError::InsufficientStock(err)) => {
            assert_eq!(err.available, 0);
            assert_eq!(err.requested, 1);
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn guarded_increment_stops_at_u32_max() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", u32::MAX - 1);
    store.insert_product(&jeans).await.unwrap();

    let result = store
        .adjust_stock(StockAdjustment::release(jeans.id, 5), Utc::now())
        .await;
    match result {
        Err(StoreError::StockLimitExceeded(err)) => {
            assert_eq!(err.on_hand, u32::MAX - 1);
            assert_eq!(err.added, 5);
        }
        other => panic!("expected stock limit, got {other:?}"),
    }

    let loaded = store.get_product(jeans.id).await.unwrap().unwrap();
    assert_eq!(loaded.quantity_on_hand, u32::MAX - 1);
}

#[tokio::test]
#[serial]
async fn concurrent_decrements_never_oversell() {
    let store = get_test_store().await;
    let jeans = product("Last Pair", 1);
    store.insert_product(&jeans).await.unwrap();

    let attempts = (0..8).map(|_| {
        let store = store.clone();
        let id = jeans.id;
        async move {
            store
                .adjust_stock(StockAdjustment::reserve(id, 1), Utc::now())
                .await
        }
    });
    let results = futures_util::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert_eq!(
        store.require_product(jeans.id).await.unwrap().quantity_on_hand,
        0
    );
}

#[tokio::test]
#[serial]
async fn update_details_leaves_stock_alone() {
    let store = get_test_store().await;
    let mut jeans = product("Levi's 501", 5);
    store.insert_product(&jeans).await.unwrap();
    store
        .adjust_stock(StockAdjustment::reserve(jeans.id, 3), Utc::now())
        .await
        .unwrap();

    jeans.selling_price = Money::from_units(1_200);
    store.update_product_details(&jeans).await.unwrap();

    let loaded = store.require_product(jeans.id).await.unwrap();
    assert_eq!(loaded.selling_price, Money::from_units(1_200));
    assert_eq!(loaded.quantity_on_hand, 2);
}

#[tokio::test]
#[serial]
async fn record_sale_and_list() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", 3);
    store.insert_product(&jeans).await.unwrap();

    let (sale, _) = Sale::record(&jeans, 2, Utc::now()).unwrap();
    assert_eq!(store.record_sale(&sale).await.unwrap(), 1);

    let sales = store.list_sales().await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].total_price, Money::from_units(2_999));

    let low = store.list_low_stock(5).await.unwrap();
    assert_eq!(low.len(), 1);
}

#[tokio::test]
#[serial]
async fn order_commit_round_trip() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", 5);
    let tee = product("Band Tee", 5);
    store.insert_product(&jeans).await.unwrap();
    store.insert_product(&tee).await.unwrap();

    let mut order = stored_order(&store).await;
    let a = order.add_item(&jeans, 2, Utc::now()).unwrap();
    let b = order.add_item(&tee, 1, Utc::now()).unwrap();
    let version = store.commit_order(&order, &[a, b]).await.unwrap();
    assert_eq!(version, Version::new(2));

    let loaded = store.require_order(order.id()).await.unwrap();
    assert_eq!(loaded.items().len(), 2);
    assert_eq!(loaded.items()[0].product_id, jeans.id);
    assert_eq!(loaded.total_price(), order.total_price());
    assert_eq!(loaded.version(), Version::new(2));
    assert_eq!(
        store.require_product(jeans.id).await.unwrap().quantity_on_hand,
        3
    );

    let listed = store
        .list_orders_for_customer(order.customer_id())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].items().len(), 2);
}

#[tokio::test]
#[serial]
async fn failed_commit_rolls_back_everything() {
    let store = get_test_store().await;
    let plenty = product("Plenty", 10);
    let scarce = product("Scarce", 1);
    store.insert_product(&plenty).await.unwrap();
    store.insert_product(&scarce).await.unwrap();

    let mut order = stored_order(&store).await;
    order.add_item(&plenty, 1, Utc::now()).unwrap();

    let adjustments = [
        StockAdjustment::reserve(plenty.id, 1),
        StockAdjustment::reserve(scarce.id, 2),
    ];
    let result = store.commit_order(&order, &adjustments).await;
    assert!(matches!(result, Err(StoreError::InsufficientStock(_))));

    let loaded = store.require_order(order.id()).await.unwrap();
    assert!(loaded.items().is_empty());
    assert_eq!(loaded.version(), Version::first());
    assert_eq!(
        store.require_product(plenty.id).await.unwrap().quantity_on_hand,
        10
    );
}

#[tokio::test]
#[serial]
async fn stale_order_version_is_rejected() {
    let store = get_test_store().await;
    let mut first = stored_order(&store).await;
    let mut second = first.clone();

    first.cancel(Utc::now()).unwrap();
    store.commit_order(&first, &[]).await.unwrap();

    second.cancel(Utc::now()).unwrap();
    let result = store.commit_order(&second, &[]).await;
    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { .. })
    ));

    let loaded = store.require_order(first.id()).await.unwrap();
    assert_eq!(loaded.status(), OrderStatus::Cancelled);
}

#[tokio::test]
#[serial]
async fn delete_product_referenced_by_order_fails() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", 5);
    store.insert_product(&jeans).await.unwrap();

    let mut order = stored_order(&store).await;
    let adjustment = order.add_item(&jeans, 1, Utc::now()).unwrap();
    store.commit_order(&order, &[adjustment]).await.unwrap();

    assert!(matches!(
        store.delete_product(jeans.id).await,
        Err(StoreError::ProductInUse(_))
    ));
}

#[tokio::test]
#[serial]
async fn delete_order_cascades_and_restocks() {
    let store = get_test_store().await;
    let jeans = product("Levi's 501", 5);
    store.insert_product(&jeans).await.unwrap();

    let mut order = stored_order(&store).await;
    let adjustment = order.add_item(&jeans, 2, Utc::now()).unwrap();
    let version = store.commit_order(&order, &[adjustment]).await.unwrap();
    order.set_version(version);
    store
        .insert_payment(&pending_payment(order.id(), "ws_CO_1"))
        .await
        .unwrap();

    store
        .delete_order(&order, &order.stock_release())
        .await
        .unwrap();

    assert!(store.get_order(order.id()).await.unwrap().is_none());
    assert!(
        store
            .get_payment_by_checkout_request_id("ws_CO_1")
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(
        store.require_product(jeans.id).await.unwrap().quantity_on_hand,
        5
    );
    assert!(store.delete_product(jeans.id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn payment_round_trip_and_duplicates() {
    let store = get_test_store().await;
    let order = stored_order(&store).await;
    let payment = pending_payment(order.id(), "ws_CO_191220191020363925");
    store.insert_payment(&payment).await.unwrap();

    let loaded = store
        .get_payment_by_checkout_request_id("ws_CO_191220191020363925")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, PaymentStatus::Pending);
    assert_eq!(loaded.phone_number.as_str(), "254712345678");
    assert_eq!(loaded.amount, Money::from_units(300));

    let result = store
        .insert_payment(&pending_payment(order.id(), "ws_CO_191220191020363925"))
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateCorrelation(_))));

    let orphan = store
        .insert_payment(&pending_payment(OrderId::new(), "ws_CO_orphan"))
        .await;
    assert!(matches!(orphan, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
#[serial]
async fn payment_transitions_are_compare_and_set() {
    let store = get_test_store().await;
    let order = stored_order(&store).await;
    let first = pending_payment(order.id(), "ws_CO_1");
    let second = pending_payment(order.id(), "ws_CO_2");
    store.insert_payment(&first).await.unwrap();
    store.insert_payment(&second).await.unwrap();

    let details = SuccessDetails {
        receipt_number: "NLJ7RT61SV".to_string(),
        amount: Money::from_units(300),
        phone_number: None,
        transaction_date: chrono::NaiveDate::from_ymd_opt(2019, 12, 19)
            .and_then(|d| d.and_hms_opt(10, 21, 15)),
    };

    let mut paid = first.clone();
    paid.record_success(details.clone(), Some("Processed".into()), Utc::now())
        .unwrap();
    assert!(
        store
            .transition_payment(&paid, PaymentStatus::Pending)
            .await
            .unwrap()
    );
    assert!(
        !store
            .transition_payment(&paid, PaymentStatus::Pending)
            .await
            .unwrap()
    );

    let mut also_paid = second.clone();
    also_paid
        .record_success(details, None, Utc::now())
        .unwrap();
    let result = store
        .transition_payment(&also_paid, PaymentStatus::Pending)
        .await;
    assert!(matches!(
        result,
        Err(StoreError::PaymentAlreadySettled(_))
    ));

    let payments = store.list_payments_for_order(order.id()).await.unwrap();
    assert_eq!(payments.len(), 2);
    assert_eq!(
        payments.iter().filter(|p| p.is_success()).count(),
        1
    );
    let stored = payments.iter().find(|p| p.id == paid.id).unwrap();
    assert_eq!(stored.receipt_number.as_deref(), Some("NLJ7RT61SV"));
    assert!(stored.transaction_date.is_some());
}
