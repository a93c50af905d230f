//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
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

fn setup() -> axum::Router {
    let state = api::create_default_state(&api::config::Config::default());
    api::create_app(state, get_metrics_handle())
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Seeds a user and the given products; returns the user ID.
async fn seed(app: &axum::Router, products: &[(&str, i64, u32, u32)]) -> String {
    let response = send(app, "POST", "/users", Some(json!({}))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let user_id = json_body(response).await["user_id"]
        .as_str()
        .unwrap()
        .to_string();

    for (product, price, quantity, threshold) in products {
        let response = send(
            app,
            "POST",
            "/products",
            Some(json!({
                "product_id": product,
                "name": format!("Product {product}"),
                "price_cents": price,
                "quantity": quantity,
                "reorder_threshold": threshold,
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    user_id
}

async fn create_order(app: &axum::Router, user_id: &str) -> String {
    let response = send(app, "POST", "/orders", Some(json!({ "user_id": user_id }))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["state"], "entered");
    json["order_id"].as_str().unwrap().to_string()
}

async fn add_line(app: &axum::Router, order_id: &str, product: &str, quantity: i64) -> Response {
    send(
        app,
        "POST",
        &format!("/orders/{order_id}/lines"),
        Some(json!({ "product_id": product, "quantity": quantity })),
    )
    .await
}

async fn transition(app: &axum::Router, order_id: &str, target: &str) -> Response {
    send(
        app,
        "POST",
        &format!("/orders/{order_id}/transition"),
        Some(json!({ "target": target })),
    )
    .await
}

async fn stock(app: &axum::Router, product: &str) -> Value {
    let response = send(app, "GET", &format!("/products/{product}/stock"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let response = send(&app, "GET", "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = send(&app, "GET", "/metrics", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_order_lifecycle_over_http() {
    let app = setup();
    let user_id = seed(&app, &[("SKU-001", 1000, 100, 10)]).await;
    let order_id = create_order(&app, &user_id).await;

    let response = add_line(&app, &order_id, "SKU-001", 2).await;
    assert_eq!(response.status(), StatusCode::OK);
    let first_line = json_body(response).await["line_id"].clone();
    let response = add_line(&app, &order_id, "SKU-001", 1).await;
    assert_eq!(json_body(response).await["line_id"], first_line);

    let response = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = json_body(response).await;
    assert_eq!(order["id"], order_id.as_str());
    assert_eq!(order["state"], "entered");
    assert_eq!(order["lines"].as_array().unwrap().len(), 1);
    assert_eq!(order["lines"][0]["quantity"], 3);
    assert_eq!(order["total_cents"], 3000);

    let response = transition(&app, &order_id, "paid").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["state"], "paid");
    assert_eq!(stock(&app, "SKU-001").await["quantity"], 97);

    let response = transition(&app, &order_id, "cancelled").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stock(&app, "SKU-001").await["quantity"], 100);
}

#[tokio::test]
async fn test_insufficient_stock_is_conflict() {
    let app = setup();
    let user_id = seed(&app, &[("R", 100, 3, 0)]).await;
    let order_id = create_order(&app, &user_id).await;
    add_line(&app, &order_id, "R", 1000).await;

    let response = transition(&app, &order_id, "paid").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().contains("Insufficient stock"));
    assert_eq!(stock(&app, "R").await["quantity"], 3);
}

#[tokio::test]
async fn test_unknown_target_state_is_bad_request() {
    let app = setup();
    let user_id = seed(&app, &[("P", 100, 3, 0)]).await;
    let order_id = create_order(&app, &user_id).await;

    let response = transition(&app, &order_id, "shipped").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_transition_is_conflict() {
    let app = setup();
    let user_id = seed(&app, &[("P", 100, 3, 0)]).await;
    let order_id = create_order(&app, &user_id).await;

    let response = transition(&app, &order_id, "cancelled").await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = transition(&app, &order_id, "paid").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_zero_quantity_is_bad_request() {
    let app = setup();
    let user_id = seed(&app, &[("P", 100, 3, 0)]).await;
    let order_id = create_order(&app, &user_id).await;

    let response = add_line(&app, &order_id, "P", 0).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_amount_overflow_is_bad_request() {
    let app = setup();
    let user_id = seed(&app, &[("MAX", i64::MAX, 10, 0)]).await;
    let order_id = create_order(&app, &user_id).await;

    let response = add_line(&app, &order_id, "MAX", 2).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = add_line(&app, &order_id, "MAX", 1).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = add_line(&app, &order_id, "MAX", 1).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = json_body(response).await;
    assert_eq!(order["lines"][0]["quantity"], 1);
    assert_eq!(order["total_cents"], i64::MAX);
}

#[tokio::test]
async fn test_checkout_of_empty_order_is_conflict() {
    let app = setup();
    let user_id = seed(&app, &[]).await;
    let order_id = create_order(&app, &user_id).await;

    let response = transition(&app, &order_id, "awaiting_payment").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().contains("has no lines"));
}

#[tokio::test]
async fn test_remove_line() {
    let app = setup();
    let user_id = seed(&app, &[("P", 100, 3, 0)]).await;
    let order_id = create_order(&app, &user_id).await;
    add_line(&app, &order_id, "P", 1).await;

    let uri = format!("/orders/{order_id}/lines/P");
    let response = send(&app, "DELETE", &uri, None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, "DELETE", &uri, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_order_for_unknown_user() {
    let app = setup();
    let fake_id = uuid::Uuid::new_v4();

    let response = send(&app, "POST", "/orders", Some(json!({ "user_id": fake_id }))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup();
    let fake_id = uuid::Uuid::new_v4();

    let response = send(&app, "GET", &format!("/orders/{fake_id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_order_id() {
    let app = setup();
    let response = send(&app, "GET", "/orders/not-a-uuid", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_product_is_conflict() {
    let app = setup();
    seed(&app, &[("P", 100, 3, 0)]).await;

    let response = send(
        &app,
        "POST",
        "/products",
        Some(json!({
            "product_id": "P",
            "name": "Again",
            "price_cents": 1,
            "quantity": 1,
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(stock(&app, "P").await["quantity"], 3);
}

#[tokio::test]
async fn test_failed_stock_initialization_drops_catalog_entry() {
    let state = api::create_default_state(&api::config::Config::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    seed(&app, &[("P", 100, 3, 0)]).await;

    let product_id = domain::ProductId::new("P");
    let catalog = state.service.catalog();
    assert!(catalog.remove_product(&product_id).await.is_some());

    let response = send(
        &app,
        "POST",
        "/products",
        Some(json!({
            "product_id": "P",
            "name": "Again",
            "price_cents": 1,
            "quantity": 1,
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(catalog.get(&product_id).await.is_none());
    assert_eq!(stock(&app, "P").await["quantity"], 3);
}

#[tokio::test]
async fn test_concurrent_product_creation_admits_one() {
    let app = setup();
    let requests = (0..4).map(|i| {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                "POST",
                "/products",
                Some(json!({
                    "product_id": "P",
                    "name": format!("Product {i}"),
                    "price_cents": 100,
                    "quantity": 5,
                })),
            )
            .await
            .status()
        })
    });

    let mut created = 0;
    for request in requests.collect::<Vec<_>>() {
        let status = request.await.unwrap();
        if status == StatusCode::CREATED {
            created += 1;
        } else {
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }
    assert_eq!(created, 1);
    assert_eq!(stock(&app, "P").await["quantity"], 5);
}

#[tokio::test]
async fn test_stock_of_unknown_product() {
    let app = setup();
    let response = send(&app, "GET", "/products/NOPE/stock", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
