//! Authentication integration tests.
//!
//! Tests verify:
//! - Basic credentials are checked before dispatch
//! - Valid signed URLs work for publish and subscribe
//! - Expired, tampered and incomplete signatures are rejected

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use base64::Engine;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use ntrip_caster::{
    create_router, BasicAuth, Caster, RouterConfig, SignedUrlAuth, DEFAULT_TIMEOUT,
};

const TEST_SECRET: &str = "test-secret-key-for-hmac-signing";

fn basic_router() -> (Arc<Caster>, axum::Router) {
    let auth = BasicAuth::new().with_user("base", "rover-pass");
    let caster = Arc::new(Caster::new(auth, DEFAULT_TIMEOUT));
    let router = create_router(Arc::clone(&caster), RouterConfig::new().with_tracing(false));
    (caster, router)
}

fn signed_router() -> (Arc<Caster>, axum::Router) {
    let caster = Arc::new(Caster::new(SignedUrlAuth::new(TEST_SECRET), DEFAULT_TIMEOUT));
    let router = create_router(Arc::clone(&caster), RouterConfig::new().with_tracing(false));
    (caster, router)
}

fn basic_header(user: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    format!("Basic {}", encoded)
}

fn open_source() -> Body {
    Body::from_stream(futures_util::stream::pending::<Result<Bytes, std::io::Error>>())
}

async fn error_type(response: axum::response::Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["error"].as_str().unwrap().to_string()
}

// =============================================================================
// Basic Authentication
// =============================================================================

#[tokio::test]
async fn test_basic_missing_credentials() {
    let (_caster, router) = basic_router();

    let request = Request::get("/S1").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"ntrip-caster\""
    );
    assert_eq!(error_type(response).await, "missing_credentials");
}

#[tokio::test]
async fn test_basic_wrong_password() {
    let (_caster, router) = basic_router();

    let request = Request::get("/S1")
        .header(header::AUTHORIZATION, basic_header("base", "guess"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "invalid_credentials");
}

#[tokio::test]
async fn test_basic_valid_credentials_reach_dispatch() {
    let (caster, router) = basic_router();
    let credentials = basic_header("base", "rover-pass");

    // Authorized, but nothing is published yet.
    let request = Request::get("/S1")
        .header(header::AUTHORIZATION, &credentials)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::post("/S1")
        .header(header::AUTHORIZATION, &credentials)
        .body(open_source())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(caster.get_mountpoint("/S1").is_some());

    caster.delete_mountpoint("/S1");
}

// =============================================================================
// Signed URLs
// =============================================================================

#[tokio::test]
async fn test_signed_publish_and_subscribe() {
    let (caster, router) = signed_router();
    let auth = SignedUrlAuth::new(TEST_SECRET);
    let (signature, expiry) = auth.sign("/RTCM3", Duration::from_secs(3600));
    let uri = format!("/RTCM3?exp={}&sig={}", expiry, signature);

    let request = Request::post(&uri).body(open_source()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::get(&uri).body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    caster.delete_mountpoint("/RTCM3");
}

#[tokio::test]
async fn test_signed_url_with_extra_params() {
    let (_caster, router) = signed_router();
    let auth = SignedUrlAuth::new(TEST_SECRET);
    let url = auth.generate_signed_url(
        "",
        "/RTCM3",
        Duration::from_secs(3600),
        &[("user", "rover-7")],
    );

    let request = Request::get(&url).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let tampered = url.replace("rover-7", "rover-8");
    let request = Request::get(&tampered).body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_url_expired() {
    let (_caster, router) = signed_router();
    let auth = SignedUrlAuth::new(TEST_SECRET);

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let expiry = now - 60;
    let signature = auth.sign_with_expiry("/RTCM3", expiry);

    let request = Request::get(format!("/RTCM3?exp={}&sig={}", expiry, signature))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "signature_expired");
}

#[tokio::test]
async fn test_signature_for_other_path_rejected() {
    let (caster, router) = signed_router();
    let auth = SignedUrlAuth::new(TEST_SECRET);
    let (signature, expiry) = auth.sign("/RTCM3", Duration::from_secs(3600));

    let request = Request::post(format!("/OTHER?exp={}&sig={}", expiry, signature))
        .body(open_source())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "invalid_signature");
    assert!(caster.get_mountpoint("/OTHER").is_none());
}

#[tokio::test]
async fn test_missing_signature_params() {
    let (_caster, router) = signed_router();

    let request = Request::get("/RTCM3").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "missing_signature");

    let request = Request::get("/RTCM3?sig=abcd").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_type(response).await, "missing_expiry");
}
