mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use profileyou_accounting_api::errors::ServiceError;
use profileyou_accounting_api::services::discount_codes::{
    CreateDiscountCodeInput, DiscountCodeService,
};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn sales_reps_create_codes_and_get_a_generated_one_by_default() {
    let app = TestApp::new().await;
    let rep = app.seed_user("rep@example.com", false, true).await;

    let response = app
        .request(
            Method::POST,
            "/discount-codes",
            Some(json!({"discount": "15", "commission": "5"})),
            Some(rep.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let code = body_json(response).await;
    let generated = code["code"].as_str().expect("code present");
    assert_eq!(generated.len(), 10);
    assert!(generated.chars().all(|c| c.is_ascii_uppercase()));
    assert_eq!(code["sales_rep_id"], rep.id.to_string());

    let response = app
        .request(Method::GET, "/discount-codes", None, Some(rep.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let codes = body_json(response).await;
    assert_eq!(codes.as_array().map(|a| a.len()), Some(1));
}

#[tokio::test]
async fn duplicate_explicit_codes_conflict() {
    let app = TestApp::new().await;
    let rep = app.seed_user("rep@example.com", false, true).await;

    let body = json!({"code": "SUMMER", "discount": "20", "commission": "10"});
    let response = app
        .request(Method::POST, "/discount-codes", Some(body.clone()), Some(rep.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .request(Method::POST, "/discount-codes", Some(body), Some(rep.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn percentages_outside_the_range_are_rejected() {
    let app = TestApp::new().await;
    let rep = app.seed_user("rep@example.com", false, true).await;

    for body in [
        json!({"discount": "120", "commission": "5"}),
        json!({"discount": "10", "commission": "-1"}),
    ] {
        let response = app
            .request(Method::POST, "/discount-codes", Some(body), Some(rep.id), None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn non_reps_cannot_see_the_code_surface_exists() {
    let app = TestApp::new().await;
    let buyer = app.seed_user("buyer@example.com", false, false).await;

    let response = app
        .request(Method::GET, "/discount-codes", None, Some(buyer.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::POST,
            "/discount-codes",
            Some(json!({"discount": "15", "commission": "5"})),
            Some(buyer.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_staff_attribute_codes_to_other_reps() {
    let app = TestApp::new().await;
    let rep = app.seed_user("rep@example.com", false, true).await;
    let other = app.seed_user("other-rep@example.com", false, true).await;
    let staff = app.seed_user("staff@example.com", true, false).await;

    let response = app
        .request(
            Method::POST,
            "/discount-codes",
            Some(json!({"sales_rep_id": other.id, "discount": "15", "commission": "5"})),
            Some(rep.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::POST,
            "/discount-codes",
            Some(json!({"sales_rep_id": other.id, "discount": "15", "commission": "5"})),
            Some(staff.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let code = body_json(response).await;
    assert_eq!(code["sales_rep_id"], other.id.to_string());
}

#[tokio::test]
async fn generation_gives_up_once_the_code_space_is_exhausted() {
    let app = TestApp::new().await;
    let rep = app.seed_user("rep@example.com", false, true).await;

    // Single-character codes leave only 26 possibilities; occupy them all so
    // every generation attempt collides.
    let service = DiscountCodeService::new(
        app.state.db.clone(),
        app.state.event_sender.clone(),
    )
    .with_code_length(1);

    for c in 'A'..='Z' {
        service
            .create(CreateDiscountCodeInput {
                sales_rep_id: rep.id,
                code: Some(c.to_string()),
                discount: dec!(5),
                commission: dec!(1),
            })
            .await
            .expect("seed single-letter code");
    }

    let err = service
        .create(CreateDiscountCodeInput {
            sales_rep_id: rep.id,
            code: None,
            discount: dec!(5),
            commission: dec!(1),
        })
        .await
        .expect_err("generation should exhaust its attempts");
    assert!(matches!(err, ServiceError::InternalError(_)));
}
