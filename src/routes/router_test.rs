use super::*;
use axum::body::Body;
use axum::http::{Method, Request, header};
use tower::ServiceExt;

use crate::state::test_helpers::test_app_state;

fn request(method: Method, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .expect("request")
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = app(test_app_state());
    let res = app
        .oneshot(request(Method::GET, "/healthz", Body::empty()))
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_requires_session_cookie() {
    for (method, uri) in [
        (Method::GET, "/api/projects"),
        (Method::GET, "/api/dashboard"),
        (Method::GET, "/api/rooms"),
        (Method::POST, "/api/auth/ws-ticket"),
    ] {
        let app = app(test_app_state());
        let res = app
            .oneshot(request(method.clone(), uri, Body::empty()))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
    }
}

#[tokio::test]
async fn login_rejects_malformed_email() {
    let app = app(test_app_state());
    let body = Body::from(r#"{"email":"not-an-email"}"#);
    let res = app
        .oneshot(request(Method::POST, "/api/auth/login", body))
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ws_without_ticket_is_unauthorized() {
    let app = app(test_app_state());
    let res = app
        .oneshot(request(Method::GET, "/api/ws", Body::empty()))
        .await
        .expect("response");
    // The upgrade extractor rejects a plain GET before the ticket check.
    assert!(res.status().is_client_error());
}

#[tokio::test]
async fn login_without_email_explains_rejection() {
    use http_body_util::BodyExt;

    let app = app(test_app_state());
    let res = app
        .oneshot(request(Method::POST, "/api/auth/login", Body::from("{}")))
        .await
        .expect("response");
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = res.into_body().collect().await.expect("body").to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("email"), "unexpected rejection body: {text}");
}
