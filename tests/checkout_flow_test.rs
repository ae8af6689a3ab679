mod common;

use axum::http::{header, Method, StatusCode};
use common::{body_json, TestApp};
use profileyou_accounting_api::entities::{
    checkout_session::Entity as CheckoutSessionEntity,
    item_status::ItemStatus,
    mailbox::Entity as MailboxEntity,
    order::Entity as OrderEntity,
    site,
    social_profile::Entity as SocialProfileEntity,
    user::Entity as UserEntity,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;

const SESSION: &str = "sess-checkout-1";

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect carries a Location header")
        .to_str()
        .expect("Location header is valid utf-8")
        .to_string()
}

/// Splits "/payments/{id}/{token}" off an absolute payment URL.
fn payment_path_parts(url: &str) -> (String, String) {
    let path = url
        .strip_prefix("http://pay.test.example/payments/")
        .expect("payment URL points at the configured domain");
    let (id, token) = path.split_once('/').expect("payment URL has id and token");
    (id.to_string(), token.to_string())
}

fn total_of(cart: &serde_json::Value) -> Decimal {
    cart["total"]
        .as_str()
        .expect("total is serialized as a string")
        .parse()
        .expect("total parses as a decimal")
}

#[tokio::test]
async fn checkout_happy_path_creates_one_order_and_dispatches_once() {
    let app = TestApp::new().await;
    let user = app.seed_user("buyer@example.com", false, false).await;
    let site_a = app.seed_site("Instagram", dec!(10.00)).await;
    let site_b = app.seed_site("LinkedIn", dec!(15.50)).await;
    app.seed_mailbox("pool-1@mail.example").await;
    let method = app.seed_payment_method("Card", "stripe").await;

    for site in [&site_a, &site_b] {
        let response = app
            .request(
                Method::POST,
                &format!("/cart/items?site={}", site.id),
                None,
                None,
                Some(SESSION),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let cart = body_json(
        app.request(Method::GET, "/cart", None, None, Some(SESSION))
            .await,
    )
    .await;
    assert_eq!(total_of(&cart), dec!(25.50));

    let response = app
        .request(
            Method::POST,
            "/checkout/details",
            Some(json!({"username": "gritty", "first_name": "Grit"})),
            None,
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let payment_url = location(&response);

    // Duplicate submission is absorbed and lands on the same payment.
    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), payment_url);

    let profiles = SocialProfileEntity::find()
        .all(&*app.state.db)
        .await
        .expect("load profiles");
    assert_eq!(profiles.len(), 2);
    assert!(profiles
        .iter()
        .all(|p| p.status == ItemStatus::AwaitingPaidConfirmation));

    // Gateway sends the buyer back after a successful capture.
    let (payment_id, token) = payment_path_parts(&payment_url);
    let response = app
        .request(
            Method::GET,
            &format!("/payments/{}/success/{}", payment_id, token),
            None,
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let profiles = SocialProfileEntity::find()
        .all(&*app.state.db)
        .await
        .expect("load profiles");
    assert!(profiles.iter().all(|p| p.status == ItemStatus::PaidRequested));
    assert_eq!(app.queue.submitted().len(), 2);

    let user_row = UserEntity::find_by_id(user.id)
        .one(&*app.state.db)
        .await
        .expect("load user")
        .expect("user exists");
    assert!(user_row.made_an_order);

    // The session is reset for the next purchase.
    let session = CheckoutSessionEntity::find_by_id(SESSION.to_string())
        .one(&*app.state.db)
        .await
        .expect("load session")
        .expect("session exists");
    assert!(!session.is_blocked);
    assert!(session.cart.is_empty());

    // A second landing on the success URL dispatches nothing new.
    let response = app
        .request(
            Method::GET,
            &format!("/payments/{}/success/{}", payment_id, token),
            None,
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.queue.submitted().len(), 2);
}

#[tokio::test]
async fn failed_payment_keeps_the_cart_for_a_retry() {
    let app = TestApp::new().await;
    let user = app.seed_user("retry@example.com", false, false).await;
    let site = app.seed_site("Facebook", dec!(12.00)).await;
    app.seed_mailbox("pool-2@mail.example").await;
    let method = app.seed_payment_method("Card", "stripe").await;

    app.request(
        Method::POST,
        &format!("/cart/items?site={}", site.id),
        None,
        None,
        Some(SESSION),
    )
    .await;
    app.request(
        Method::POST,
        "/checkout/details",
        Some(json!({"username": "retry"})),
        None,
        Some(SESSION),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let (payment_id, token) = payment_path_parts(&location(&response));

    let response = app
        .request(
            Method::GET,
            &format!("/payments/{}/failure/{}", payment_id, token),
            None,
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let session = CheckoutSessionEntity::find_by_id(SESSION.to_string())
        .one(&*app.state.db)
        .await
        .expect("load session")
        .expect("session exists");
    assert!(!session.is_blocked);
    assert_eq!(session.cart.len(), 1);
    assert!(app.queue.submitted().is_empty());

    let user_row = UserEntity::find_by_id(user.id)
        .one(&*app.state.db)
        .await
        .expect("load user")
        .expect("user exists");
    assert!(!user_row.made_an_order);
}

#[tokio::test]
async fn exhausted_mailbox_pool_fails_loudly_and_releases_the_block() {
    let app = TestApp::new().await;
    let user = app.seed_user("no-mailbox@example.com", false, false).await;
    let site = app.seed_site("TikTok", dec!(8.00)).await;
    let method = app.seed_payment_method("Card", "stripe").await;

    app.request(
        Method::POST,
        &format!("/cart/items?site={}", site.id),
        None,
        None,
        Some(SESSION),
    )
    .await;
    app.request(
        Method::POST,
        "/checkout/details",
        Some(json!({"username": "poolless"})),
        None,
        Some(SESSION),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // No half-finished profile survives the failure.
    let profiles = SocialProfileEntity::find()
        .all(&*app.state.db)
        .await
        .expect("load profiles");
    assert!(profiles.is_empty());

    // The failed attempt released the block, so a retry can succeed.
    app.seed_mailbox("pool-late@mail.example").await;
    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn submit_with_empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let user = app.seed_user("empty@example.com", false, false).await;
    let method = app.seed_payment_method("Card", "stripe").await;

    app.request(
        Method::POST,
        "/checkout/details",
        Some(json!({"username": "empty"})),
        None,
        Some(SESSION),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_details_must_be_an_object() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/checkout/details",
            Some(json!(["not", "an", "object"])),
            None,
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_requires_a_session_and_a_user() {
    let app = TestApp::new().await;
    let user = app.seed_user("gate@example.com", false, false).await;
    let method = app.seed_payment_method("Card", "stripe").await;

    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            None,
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cart_lines_keep_the_price_they_were_added_at() {
    let app = TestApp::new().await;
    let site = app.seed_site("Pinterest", dec!(9.99)).await;

    app.request(
        Method::POST,
        &format!("/cart/items?site={}", site.id),
        None,
        None,
        Some(SESSION),
    )
    .await;

    // Reprice the site after the add.
    let mut active: site::ActiveModel = site.into();
    active.price = Set(dec!(19.99));
    active
        .update(&*app.state.db)
        .await
        .expect("update site price");

    let cart = body_json(
        app.request(Method::GET, "/cart", None, None, Some(SESSION))
            .await,
    )
    .await;
    assert_eq!(total_of(&cart), dec!(9.99));
}

#[tokio::test]
async fn a_failed_submit_persists_nothing() {
    let app = TestApp::new().await;
    let user = app.seed_user("atomic@example.com", false, false).await;
    let site = app.seed_site("Twitter", dec!(8.00)).await;
    let mailbox = app.seed_mailbox("pool-atomic@mail.example").await;

    app.request(
        Method::POST,
        &format!("/cart/items?site={}", site.id),
        None,
        None,
        Some(SESSION),
    )
    .await;
    app.request(
        Method::POST,
        "/checkout/details",
        Some(json!({"username": "atomic"})),
        None,
        Some(SESSION),
    )
    .await;

    // A payment method id that resolves to no row fails the submission
    // after the mailbox claim and the profile writes.
    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": uuid::Uuid::new_v4()})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The whole attempt rolled back: no profiles, no order, and the mailbox
    // is back in the pool.
    let profiles = SocialProfileEntity::find()
        .all(&*app.state.db)
        .await
        .expect("load profiles");
    assert!(profiles.is_empty());

    let orders = OrderEntity::find().all(&*app.state.db).await.expect("load orders");
    assert!(orders.is_empty());

    let mailbox = MailboxEntity::find_by_id(mailbox.id)
        .one(&*app.state.db)
        .await
        .expect("load mailbox")
        .expect("mailbox exists");
    assert!(mailbox.user_id.is_none());

    // The block was released, so a corrected retry goes through.
    let method = app.seed_payment_method("Card", "stripe").await;
    let response = app
        .request(
            Method::POST,
            "/checkout",
            Some(json!({"payment_method_id": method.id})),
            Some(user.id),
            Some(SESSION),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}
