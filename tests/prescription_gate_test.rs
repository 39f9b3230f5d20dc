mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use medicart_api::{entities::PaymentMethod, errors::ServiceError, services::PlaceOrderRequest};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

fn cod(user_id: Uuid) -> PlaceOrderRequest {
    PlaceOrderRequest {
        user_id,
        payment_method: PaymentMethod::Cod,
        total_amount_claimed: None,
        payment_ref: None,
        order_ref: None,
        signature: None,
    }
}

#[tokio::test]
async fn unapproved_prescription_line_blocks_checkout() {
    let app = TestApp::new().await;
    let (user, token) = app.seed_customer().await;
    let amoxicillin = app.seed_medicine("Amoxicillin", dec!(120), 10, true).await;
    app.state
        .services
        .cart
        .add_line(user.id, amoxicillin.id, 1)
        .await
        .unwrap();

    let response = app
        .request(
            Method::POST,
            "/api/v1/buy-medicine",
            Some(json!({ "paymentMethod": "cod" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "PRESCRIPTION_PENDING");
    assert!(body["message"].as_str().unwrap().contains("Amoxicillin"));

    assert_eq!(app.stock_of(amoxicillin.id).await, 10);
    assert_eq!(app.order_count(user.id).await, 0);
}

#[tokio::test]
async fn approval_unblocks_checkout_without_bumping_cart_version() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let (_, admin_token) = app.seed_admin().await;
    let insulin = app.seed_medicine("Insulin", dec!(450), 4, true).await;
    let cart = app
        .state
        .services
        .cart
        .add_line(user.id, insulin.id, 2)
        .await
        .unwrap();
    let line_id = cart.lines[0].id;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/medicines/approve-cart-item/{}", line_id),
            Some(json!({ "isApproved": true })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Cart item approved");
    assert_eq!(body["data"]["isApproved"], true);

    let after = app.state.services.cart.get_cart(user.id).await.unwrap();
    assert_eq!(after.version, cart.version);
    assert!(after.lines[0].is_approved);

    let placed = app.state.services.checkout.place_order(cod(user.id)).await.unwrap();
    assert_eq!(placed.total_amount, dec!(900));
    assert_eq!(app.stock_of(insulin.id).await, 2);
}

#[tokio::test]
async fn rejection_blocks_again() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let tramadol = app.seed_medicine("Tramadol", dec!(60), 10, true).await;
    let cart = app
        .state
        .services
        .cart
        .add_line(user.id, tramadol.id, 1)
        .await
        .unwrap();
    let prescriptions = &app.state.services.prescriptions;

    prescriptions.set_approval(cart.lines[0].id, true).await.unwrap();
    let line = prescriptions.set_approval(cart.lines[0].id, false).await.unwrap();
    assert!(!line.is_approved);

    let err = app
        .state
        .services
        .checkout
        .place_order(cod(user.id))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PrescriptionPending(name) if name == "Tramadol");
}

#[tokio::test]
async fn approving_unknown_line_is_not_found() {
    let app = TestApp::new().await;
    let (_, admin_token) = app.seed_admin().await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/medicines/approve-cart-item/{}", Uuid::new_v4()),
            Some(json!({ "isApproved": true })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_approval_counts_only_changed_prescription_lines() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let (_, admin_token) = app.seed_admin().await;
    let carts = &app.state.services.cart;

    let rx_a = app.seed_medicine("Atorvastatin", dec!(80), 10, true).await;
    let rx_b = app.seed_medicine("Losartan", dec!(70), 10, true).await;
    let otc = app.seed_medicine("Saline Spray", dec!(40), 10, false).await;
    let first = carts.add_line(user.id, rx_a.id, 1).await.unwrap();
    carts.add_line(user.id, rx_b.id, 1).await.unwrap();
    carts.add_line(user.id, otc.id, 1).await.unwrap();

    app.state
        .services
        .prescriptions
        .set_approval(first.lines[0].id, true)
        .await
        .unwrap();

    let response = app
        .request(
            Method::PUT,
            "/api/v1/medicines/bulk-approve-cart-items",
            Some(json!({ "userId": user.id, "approve": true })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "1 items approved");
    assert_eq!(body["data"]["updated"], 1);

    let cart = carts.get_cart(user.id).await.unwrap();
    let otc_line = cart.lines.iter().find(|l| l.medicine_id == otc.id).unwrap();
    assert!(!otc_line.is_approved);
    assert!(cart
        .lines
        .iter()
        .filter(|l| l.prescription_required)
        .all(|l| l.is_approved));

    let again = app
        .state
        .services
        .prescriptions
        .bulk_set_approval(user.id, true)
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn bulk_approval_without_cart_is_not_found() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;

    let err = app
        .state
        .services
        .prescriptions
        .bulk_set_approval(user.id, true)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn prescription_cart_lists_pending_lines_in_order() {
    let app = TestApp::new().await;
    let (user, _) = app.seed_customer().await;
    let (_, admin_token) = app.seed_admin().await;
    let carts = &app.state.services.cart;

    let otc = app.seed_medicine("Lozenges", dec!(15), 10, false).await;
    let rx_1 = app.seed_medicine("Prednisolone", dec!(35), 10, true).await;
    let rx_2 = app.seed_medicine("Clonazepam", dec!(55), 10, true).await;
    carts.add_line(user.id, otc.id, 1).await.unwrap();
    carts.add_line(user.id, rx_1.id, 2).await.unwrap();
    carts.add_line(user.id, rx_2.id, 1).await.unwrap();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/medicines/prescription-cart/{}", user.id),
            None,
            Some(&admin_token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["medicineName"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Prednisolone", "Clonazepam"]);
}

#[tokio::test]
async fn customers_cannot_review_prescriptions() {
    let app = TestApp::new().await;
    let (user, token) = app.seed_customer().await;
    let rx = app.seed_medicine("Warfarin", dec!(25), 10, true).await;
    let cart = app
        .state
        .services
        .cart
        .add_line(user.id, rx.id, 1)
        .await
        .unwrap();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/medicines/approve-cart-item/{}", cart.lines[0].id),
            Some(json!({ "isApproved": true })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_INSUFFICIENT_PERMISSIONS");

    let cart = app.state.services.cart.get_cart(user.id).await.unwrap();
    assert!(!cart.lines[0].is_approved);
}
