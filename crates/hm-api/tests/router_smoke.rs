use axum::{body::Body, http::Request, http::StatusCode, Router};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn livez_is_healthy() {
    let app = hm_api::create_router(hm_api::test_state());
    let (status, body) = get(&app, "/livez").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn invalid_search_is_rejected_with_request_id() {
    let app = hm_api::create_router(hm_api::test_state());

    let (status, body) = get(&app, "/api/search?occupations=D1101&lat=north&lon=6.17").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
    assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn count_requires_an_occupation() {
    let app = hm_api::create_router(hm_api::test_state());
    let (status, _) = get(&app, "/api/count?departments=57").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_siret_is_rejected() {
    let app = hm_api::create_router(hm_api::test_state());
    let (status, body) = get(&app, "/api/companies/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn huge_page_size_is_rejected() {
    let app = hm_api::create_router(hm_api::test_state());
    let (status, body) =
        get(&app, "/api/search?occupations=D1101&departments=57&page=2&page_size=18446744073709551615").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}
