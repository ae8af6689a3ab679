mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{body_json, TestApp};
use profileyou_accounting_api::entities::{
    item_status::ItemStatus,
    order::{self, ServiceKind},
    payment::PaymentStatus,
    reputation_case,
};
use profileyou_accounting_api::services::orders::CreateOrderInput;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use uuid::Uuid;

async fn seed_paid_order(app: &TestApp, user_id: Uuid) -> profileyou_accounting_api::entities::payment::Model {
    let method = app.seed_payment_method("Card", "stripe").await;
    let now = Utc::now();
    let case = reputation_case::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        title: Set("Case".to_string()),
        price: Set(dec!(120.00)),
        status: Set(ItemStatus::AwaitingPaidConfirmation),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed reputation case");

    let order = app
        .state
        .services
        .orders
        .create_order(CreateOrderInput {
            user_id,
            service_kind: ServiceKind::ReputationCase,
            items: vec![case.id],
            payment_method_id: method.id,
            discount_code_id: None,
        })
        .await
        .expect("create order");

    app.state
        .services
        .orders
        .create_payment(order.id, None)
        .await
        .expect("create payment")
}

#[tokio::test]
async fn payment_detail_needs_both_the_token_and_the_owner() {
    let app = TestApp::new().await;
    let user = app.seed_user("token@example.com", false, false).await;
    let payment = seed_paid_order(&app, user.id).await;
    let detail_path = format!("/payments/{}/{}", payment.id, payment.token);

    let response = app
        .request(Method::GET, &detail_path, None, Some(user.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["status"], "pending");
    assert_eq!(detail["purchased_items"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        detail["purchased_items"][0]["sku"]
            .as_str()
            .expect("sku present")
            .starts_with("order-reputation-case-"),
        true
    );

    // A leaked URL is worthless without the owner: anonymous callers and
    // other users both read absence, never forbidden.
    let response = app
        .request(Method::GET, &detail_path, None, None, None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let outsider = app.seed_user("outsider@example.com", false, false).await;
    let response = app
        .request(Method::GET, &detail_path, None, Some(outsider.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Staff can audit any payment.
    let staff = app.seed_user("staff@example.com", true, false).await;
    let response = app
        .request(Method::GET, &detail_path, None, Some(staff.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A wrong token reads as absence even for the owner.
    let response = app
        .request(
            Method::GET,
            &format!("/payments/{}/{}", payment.id, "A".repeat(32)),
            None,
            Some(user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_landings_require_the_owner() {
    let app = TestApp::new().await;
    let user = app.seed_user("landing@example.com", false, false).await;
    let payment = seed_paid_order(&app, user.id).await;
    let success_path = format!("/payments/{}/success/{}", payment.id, payment.token);

    let response = app
        .request(Method::GET, &success_path, None, None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let outsider = app.seed_user("other@example.com", false, false).await;
    let response = app
        .request(Method::GET, &success_path, None, Some(outsider.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Neither rejected landing may have captured the payment.
    let stored = app
        .state
        .services
        .payments
        .find_by_token(&payment.token)
        .await
        .expect("lookup")
        .expect("payment present");
    assert_eq!(stored.status, PaymentStatus::Pending);

    let response = app
        .request(Method::GET, &success_path, None, Some(user.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "confirmed");
}

#[tokio::test]
async fn webhook_capture_is_idempotent() {
    let app = TestApp::new().await;
    let user = app.seed_user("hook@example.com", false, false).await;
    let payment = seed_paid_order(&app, user.id).await;

    let response = app
        .request(
            Method::POST,
            "/webhooks/payments",
            Some(json!({"payment_token": payment.token, "status": "confirmed"})),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "confirmed");

    // The duplicate notification flips nothing and dispatches nothing.
    let response = app
        .request(
            Method::POST,
            "/webhooks/payments",
            Some(json!({"payment_token": payment.token, "status": "confirmed"})),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.queue.submitted().is_empty());

    let (stored, transitioned) = app
        .state
        .services
        .payments
        .mark_captured(&payment.token, PaymentStatus::Failed)
        .await
        .expect("replay capture");
    assert_eq!(stored.status, PaymentStatus::Confirmed);
    assert!(!transitioned);
}

#[tokio::test]
async fn unknown_webhook_token_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/webhooks/payments",
            Some(json!({"payment_token": "Z".repeat(32), "status": "confirmed"})),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn payment_report_is_staff_only() {
    let app = TestApp::new().await;
    let user = app.seed_user("reportee@example.com", false, false).await;
    let staff = app.seed_user("auditor@example.com", true, false).await;
    seed_paid_order(&app, user.id).await;

    let response = app
        .request(Method::GET, "/payments/report", None, Some(user.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::GET,
            "/payments/report?status=pending",
            None,
            Some(staff.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["total"], 1);
    assert_eq!(report["payments"].as_array().map(|a| a.len()), Some(1));

    let response = app
        .request(
            Method::GET,
            "/payments/report?status=confirmed",
            None,
            Some(staff.id),
            None,
        )
        .await;
    let report = body_json(response).await;
    assert_eq!(report["total"], 0);
}

#[tokio::test]
async fn saving_a_payment_refreshes_the_variant_from_the_order() {
    let app = TestApp::new().await;
    let user = app.seed_user("variant@example.com", false, false).await;
    let payment = seed_paid_order(&app, user.id).await;
    assert_eq!(payment.variant, "stripe");

    // Repoint the order at a different payment method behind the service's
    // back; the next save must mirror the new variant onto the payment.
    let paypal = app.seed_payment_method("PayPal", "paypal").await;
    let order = app
        .state
        .services
        .payments
        .order_for(&payment)
        .await
        .expect("order for payment");
    let mut active: order::ActiveModel = order.into();
    active.payment_method_id = Set(paypal.id);
    active
        .update(&*app.state.db)
        .await
        .expect("repoint payment method");

    let saved = app
        .state
        .services
        .payments
        .save(payment.into())
        .await
        .expect("save payment");
    assert_eq!(saved.variant, "paypal");
}
