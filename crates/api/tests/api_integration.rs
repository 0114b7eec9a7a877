//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use common::CustomerId;
use metrics_exporter_prometheus::PrometheusHandle;
use payments::InMemoryPaymentGateway;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: axum::Router,
    gateway: InMemoryPaymentGateway,
    customer: CustomerId,
}

fn setup() -> TestApp {
    let gateway = InMemoryPaymentGateway::new();
    let state = Arc::new(AppState::new(
        InMemoryStore::new(),
        Arc::new(gateway.clone()),
        5,
    ));
    TestApp {
        router: api::create_app(state, get_metrics_handle()),
        gateway,
        customer: CustomerId::new(),
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> Response {
        self.send_as(Some(self.customer), method, uri, body).await
    }

    async fn send_as(
        &self,
        customer: Option<CustomerId>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(customer) = customer {
            request = request.header("x-customer-id", customer.to_string());
        }
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn create_product(&self, quantity: u32, price_cents: i64) -> String {
        let response = self
            .send(
                "POST",
                "/products",
                Some(json!({
                    "name": "Vintage Tee",
                    "category": "T-SHIRT",
                    "size": "M",
                    "buying_price_cents": price_cents / 2,
                    "selling_price_cents": price_cents,
                    "quantity": quantity
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["id"].as_str().unwrap().to_string()
    }

    async fn create_order(&self) -> String {
        let response = self.send("POST", "/orders", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["id"].as_str().unwrap().to_string()
    }
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn callback_body(checkout_id: &str, result_code: i64) -> Value {
    if result_code != 0 {
        return json!({"Body": {"stkCallback": {
            "MerchantRequestID": "m-1",
            "CheckoutRequestID": checkout_id,
            "ResultCode": result_code,
            "ResultDesc": "Request cancelled by user"
        }}});
    }
    json!({"Body": {"stkCallback": {
        "MerchantRequestID": "m-1",
        "CheckoutRequestID": checkout_id,
        "ResultCode": 0,
        "ResultDesc": "The service request is processed successfully.",
        "CallbackMetadata": {"Item": [
            {"Name": "Amount", "Value": 300},
            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
            {"Name": "TransactionDate", "Value": 20240101120000u64},
            {"Name": "PhoneNumber", "Value": 254712345678u64}
        ]}
    }}})
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let response = app.send_as(None, "GET", "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = app.send_as(None, "GET", "/metrics", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_product_crud_and_low_stock() {
    let app = setup();
    let id = app.create_product(3, 50_000).await;

    let response = app.send("GET", &format!("/products/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["category"], "T-SHIRT");
    assert_eq!(json["quantity_on_hand"], 3);

    let response = app
        .send(
            "PUT",
            &format!("/products/{id}"),
            Some(json!({
                "name": "Vintage Tee II",
                "category": "T-SHIRT",
                "size": "L",
                "buying_price_cents": 20_000,
                "selling_price_cents": 55_000
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["quantity_on_hand"], 3);

    let response = app.send("GET", "/products/low-stock", None).await;
    let low = body_json(response).await;
    assert_eq!(low.as_array().unwrap().len(), 1);

    let response = app.send("GET", "/products/low-stock?threshold=2", None).await;
    assert!(body_json(response).await.as_array().unwrap().is_empty());

    let response = app
        .send(
            "POST",
            &format!("/products/{id}/restock"),
            Some(json!({"quantity": 7})),
        )
        .await;
    assert_eq!(body_json(response).await["quantity_on_hand"], 10);

    let response = app.send("DELETE", &format!("/products/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app.send("GET", &format!("/products/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_product_is_bad_request() {
    let app = setup();
    let response = app
        .send(
            "POST",
            "/products",
            Some(json!({
                "name": "  ",
                "category": "SHOES",
                "buying_price_cents": 100,
                "selling_price_cents": 200
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].as_str().is_some());
}

#[tokio::test]
async fn test_amounts_and_stock_beyond_storable_range() {
    let app = setup();
    let response = app
        .send(
            "POST",
            "/products",
            Some(json!({
                "name": "Gold Sneakers",
                "category": "SHOES",
                "buying_price_cents": 100,
                "selling_price_cents": 10_000_000_000_i64
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let product_id = app.create_product(5, 9_999_999_999).await;
    let order_id = app.create_order().await;
    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/items"),
            Some(json!({"product_id": product_id, "quantity": 2})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send("POST", "/sales", Some(json!({"product_id": product_id, "quantity": 2})))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let full = app.create_product(u32::MAX, 1_000).await;
    let response = app
        .send(
            "POST",
            &format!("/products/{full}/restock"),
            Some(json!({"quantity": 1})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sales_decrement_stock() {
    let app = setup();
    let id = app.create_product(2, 1_000).await;

    let response = app
        .send("POST", "/sales", Some(json!({"product_id": id, "quantity": 2})))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["total_price_cents"], 2_000);

    let response = app
        .send("POST", "/sales", Some(json!({"product_id": id, "quantity": 1})))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.send("GET", "/sales", None).await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_orders_require_customer_header() {
    let app = setup();
    let response = app.send_as(None, "POST", "/orders", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = Request::builder().method("GET").uri("/orders");
    request = request.header("x-customer-id", "not-a-uuid");
    let response = app
        .router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_other_customers_order_is_not_found() {
    let app = setup();
    let order_id = app.create_order().await;

    let response = app
        .send_as(
            Some(CustomerId::new()),
            "GET",
            &format!("/orders/{order_id}"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.send("GET", "/orders/nope", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_order_items_reserve_and_release_stock() {
    let app = setup();
    let product_id = app.create_product(5, 10_000).await;
    let order_id = app.create_order().await;

    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/items"),
            Some(json!({"product_id": product_id, "quantity": 6})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/items"),
            Some(json!({"product_id": product_id, "quantity": 3})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["items"][0]["quantity"], 3);
    assert_eq!(json["total_cents"], 30_000);

    let response = app
        .send(
            "PUT",
            &format!("/orders/{order_id}/items/{product_id}"),
            Some(json!({"quantity": 1})),
        )
        .await;
    assert_eq!(body_json(response).await["total_cents"], 10_000);

    let response = app.send("GET", &format!("/products/{product_id}"), None).await;
    assert_eq!(body_json(response).await["quantity_on_hand"], 4);

    let response = app
        .send(
            "DELETE",
            &format!("/orders/{order_id}/items/{product_id}"),
            None,
        )
        .await;
    assert!(body_json(response).await["items"].as_array().unwrap().is_empty());

    let response = app.send("GET", &format!("/products/{product_id}"), None).await;
    assert_eq!(body_json(response).await["quantity_on_hand"], 5);

    let response = app
        .send("POST", &format!("/orders/{order_id}/checkout"), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send("DELETE", &format!("/orders/{order_id}"), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_checkout_pay_and_callback_flow() {
    let app = setup();
    let product_id = app.create_product(5, 10_000).await;
    let order_id = app.create_order().await;

    app.send(
        "POST",
        &format!("/orders/{order_id}/items"),
        Some(json!({"product_id": product_id, "quantity": 3})),
    )
    .await;

    let response = app
        .send("POST", &format!("/orders/{order_id}/checkout"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "confirmed");

    // Items are locked once confirmed
    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/items"),
            Some(json!({"product_id": product_id, "quantity": 1})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.gateway.queue_checkout_request_id("XYZ123");
    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/pay"),
            Some(json!({"phone_number": "0712345678"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let payment = body_json(response).await;
    assert_eq!(payment["amount_cents"], 30_000);
    assert_eq!(payment["status"], "pending");
    assert_eq!(payment["checkout_request_id"], "XYZ123");

    for _ in 0..2 {
        let response = app
            .send_as(None, "POST", "/mpesa/callback", Some(callback_body("XYZ123", 0)))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let ack = body_json(response).await;
        assert_eq!(ack["ResultCode"], 0);
        assert_eq!(ack["ResultDesc"], "Accepted");
    }

    let response = app.send("GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(body_json(response).await["status"], "paid");

    let response = app
        .send("GET", &format!("/orders/{order_id}/payments"), None)
        .await;
    let payments = body_json(response).await;
    assert_eq!(payments.as_array().unwrap().len(), 1);
    assert_eq!(payments[0]["status"], "success");
    assert_eq!(payments[0]["receipt_number"], "NLJ7RT61SV");

    let response = app
        .send_as(None, "POST", &format!("/orders/{order_id}/deliver"), None)
        .await;
    assert_eq!(body_json(response).await["status"], "delivered");
}

#[tokio::test]
async fn test_payment_errors() {
    let app = setup();
    let product_id = app.create_product(5, 10_000).await;
    let order_id = app.create_order().await;
    app.send(
        "POST",
        &format!("/orders/{order_id}/items"),
        Some(json!({"product_id": product_id, "quantity": 1})),
    )
    .await;

    // Still pending
    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/pay"),
            Some(json!({"phone_number": "0712345678"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.send("POST", &format!("/orders/{order_id}/checkout"), None)
        .await;

    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/pay"),
            Some(json!({"phone_number": "12"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.gateway.set_fail_push(true);
    let response = app
        .send(
            "POST",
            &format!("/orders/{order_id}/pay"),
            Some(json!({"phone_number": "0712345678"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = app
        .send("GET", &format!("/orders/{order_id}/payments"), None)
        .await;
    assert!(body_json(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_callback_acknowledgements() {
    let app = setup();

    // Unknown correlation id is acknowledged
    let response = app
        .send_as(None, "POST", "/mpesa/callback", Some(callback_body("UNKNOWN", 0)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Malformed payload is rejected
    let response = app
        .send_as(None, "POST", "/mpesa/callback", Some(json!({"Body": {}})))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/mpesa/callback")
        .body(Body::from("not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_releases_stock() {
    let app = setup();
    let product_id = app.create_product(4, 10_000).await;
    let order_id = app.create_order().await;
    app.send(
        "POST",
        &format!("/orders/{order_id}/items"),
        Some(json!({"product_id": product_id, "quantity": 4})),
    )
    .await;
    app.send("POST", &format!("/orders/{order_id}/checkout"), None)
        .await;

    let response = app
        .send("POST", &format!("/orders/{order_id}/cancel"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "cancelled");

    let response = app.send("GET", &format!("/products/{product_id}"), None).await;
    assert_eq!(body_json(response).await["quantity_on_hand"], 4);

    // Product with order lines cannot be deleted
    let response = app.send("DELETE", &format!("/products/{product_id}"), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
