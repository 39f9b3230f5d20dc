mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{body_json, decimal, TestApp};
use medicart_api::errors::ServiceError;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn first_add_creates_cart_and_snapshots_price() {
    let app = TestApp::new().await;
    let (user, token) = app.seed_customer().await;
    let paracetamol = app.seed_medicine("Paracetamol", dec!(25.50), 40, false).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "medicineId": paracetamol.id, "quantity": 2 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    let cart = &body["data"];
    assert_eq!(cart["userId"], user.id.to_string());
    assert_eq!(decimal(&cart["totalPrice"]), dec!(51.00));
    assert_eq!(cart["version"], 1);
    assert_eq!(cart["lines"][0]["name"], "Paracetamol");
    assert_eq!(cart["lines"][0]["position"], 1);
    assert_eq!(decimal(&cart["lines"][0]["unitPriceAtAdd"]), dec!(25.50));
}

#[tokio::test]
async fn duplicate_medicine_is_rejected_without_merging() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let cetirizine = app.seed_medicine("Cetirizine", dec!(12), 10, false).await;
    let carts = &app.state.services.cart;

    carts.add_line(user.id, cetirizine.id, 1).await.unwrap();
    let err = carts.add_line(user.id, cetirizine.id, 3).await.unwrap_err();
    assert_matches!(err, ServiceError::DuplicateLine(name) if name == "Cetirizine");

    let cart = carts.get_cart(user.id).await.unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].quantity, 1);
    assert_eq!(cart.total_price, dec!(12));
}

#[tokio::test]
async fn zero_quantity_is_rejected_before_any_lookup() {
    let app = TestApp::new().await;
    let (_, token) = app.seed_customer().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "medicineId": Uuid::new_v4(), "quantity": 0 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let err = app
        .state
        .services
        .cart
        .add_line(Uuid::new_v4(), Uuid::new_v4(), 0)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity);
}

#[tokio::test]
async fn unknown_medicine_is_not_found() {
    let app = TestApp::new().await;
    let (_, token) = app.seed_customer().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/add",
            Some(json!({ "medicineId": Uuid::new_v4(), "quantity": 1 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn update_keeps_snapshot_and_recomputes_total() {
    let app = TestApp::new().await;
    let (user, token) = app.seed_customer().await;
    let ors = app.seed_medicine("ORS Sachet", dec!(10), 50, false).await;
    let carts = &app.state.services.cart;

    carts.add_line(user.id, ors.id, 1).await.unwrap();
    app.set_price(ors.id, dec!(14)).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/update/{}", ors.id),
            Some(json!({ "quantity": 3 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cart = body_json(response).await["data"].clone();
    assert_eq!(cart["version"], 2);
    assert_eq!(decimal(&cart["totalPrice"]), dec!(30));
    let line = &cart["lines"][0];
    assert_eq!(decimal(&line["unitPriceAtAdd"]), dec!(10));
    assert_eq!(decimal(&line["currentPrice"]), dec!(14));
}

#[tokio::test]
async fn update_of_missing_line_is_not_found() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let zinc = app.seed_medicine("Zinc", dec!(5), 5, false).await;
    let carts = &app.state.services.cart;

    let err = carts.update_quantity(user.id, zinc.id, 2).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    carts.add_line(user.id, zinc.id, 1).await.unwrap();
    let err = carts
        .update_quantity(user.id, Uuid::new_v4(), 2)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn removing_absent_line_leaves_version_untouched() {
    let app = TestApp::new().await;
    let (user, token) = app.seed_customer().await;
    let a = app.seed_medicine("Antacid", dec!(8), 5, false).await;
    let b = app.seed_medicine("Bandage", dec!(3), 5, false).await;
    let carts = &app.state.services.cart;

    carts.add_line(user.id, a.id, 1).await.unwrap();
    let before = carts.add_line(user.id, b.id, 2).await.unwrap();
    assert_eq!(before.version, 2);

    let untouched = carts.remove_line(user.id, Uuid::new_v4()).await.unwrap();
    assert_eq!(untouched.version, 2);
    assert_eq!(untouched.total_price, dec!(14));

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/delete/{}", a.id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = body_json(response).await["data"].clone();
    assert_eq!(cart["version"], 3);
    assert_eq!(decimal(&cart["totalPrice"]), dec!(6));
    assert_eq!(cart["lines"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn lines_keep_insertion_order() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let carts = &app.state.services.cart;

    let names = ["Azithromycin", "Metformin", "Cough Syrup"];
    for name in names {
        let m = app.seed_medicine(name, dec!(1), 10, false).await;
        carts.add_line(user.id, m.id, 1).await.unwrap();
    }

    let cart = carts.get_cart(user.id).await.unwrap();
    let listed: Vec<_> = cart.lines.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(listed, names);
    let positions: Vec<_> = cart.lines.iter().map(|l| l.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
}

#[tokio::test]
async fn get_cart_without_cart_is_not_found() {
    let app = TestApp::new().await;
    let (_, token) = app.seed_customer().await;

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn carts_are_isolated_per_user() {
    let app = TestApp::new().await;
    let (alice, _) = app.seed_customer().await;
    let (bob, bob_token) = app.seed_customer().await;
    let vitamin = app.seed_medicine("Vitamin D", dec!(99), 10, false).await;

    app.state
        .services
        .cart
        .add_line(alice.id, vitamin.id, 1)
        .await
        .unwrap();

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&bob_token))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let err = app
        .state
        .services
        .cart
        .remove_line(bob.id, vitamin.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
