//! Dispatch integration tests.
//!
//! Tests verify the status code and body for every branch of the request
//! dispatcher, driven through the router with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use ntrip_caster::{create_router, AllowAll, Caster, RouterConfig, DEFAULT_TIMEOUT};

use super::test_utils::{wait_until, DenyPaths};

fn router_for(caster: &Arc<Caster>) -> axum::Router {
    create_router(Arc::clone(caster), RouterConfig::new().with_tracing(false))
}

/// A request body that never yields data or ends.
fn open_source() -> Body {
    Body::from_stream(futures_util::stream::pending::<Result<Bytes, std::io::Error>>())
}

fn post(path: &str, body: Body) -> Request<Body> {
    Request::post(path).body(body).unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::get(path).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Subscribe
// =============================================================================

#[tokio::test]
async fn test_subscribe_to_missing_mountpoint() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));

    let response = router_for(&caster).oneshot(get("/NOPE")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = json_body(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);
    assert!(json["message"].as_str().unwrap().contains("/NOPE"));
}

#[tokio::test]
async fn test_subscribe_to_live_mountpoint() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
    let router = router_for(&caster);

    let publish = router.clone().oneshot(post("/S1", open_source())).await.unwrap();
    assert_eq!(publish.status(), StatusCode::OK);

    let response = router.oneshot(get("/S1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );

    let mount = caster.get_mountpoint("/S1").unwrap();
    assert_eq!(mount.subscriber_count(), 1);

    // Dropping the response body deregisters the subscriber.
    drop(response);
    assert_eq!(mount.subscriber_count(), 0);

    caster.delete_mountpoint("/S1");
}

// =============================================================================
// Publish
// =============================================================================

#[tokio::test]
async fn test_publish_conflict() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
    let router = router_for(&caster);

    let first = router.clone().oneshot(post("/S1", open_source())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router.oneshot(post("/S1", open_source())).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(second).await["error"], "conflict");

    // The first source is untouched.
    let mount = caster.get_mountpoint("/S1").unwrap();
    assert!(!mount.is_closed());

    caster.delete_mountpoint("/S1");
}

#[tokio::test]
async fn test_publisher_response_ends_when_mountpoint_deleted() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));

    let response = router_for(&caster)
        .oneshot(post("/S1", open_source()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = tokio::spawn(async move { response.into_body().collect().await });

    assert!(caster.delete_mountpoint("/S1").is_some());

    let collected = tokio::time::timeout(std::time::Duration::from_secs(5), body)
        .await
        .expect("publisher response did not end")
        .unwrap()
        .unwrap();
    assert!(collected.to_bytes().is_empty());
}

#[tokio::test]
async fn test_empty_publish_tears_down() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
    let router = router_for(&caster);

    let response = router
        .clone()
        .oneshot(post("/S1", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(wait_until(|| caster.get_mountpoint("/S1").is_none()).await);

    let response = router.oneshot(get("/S1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mountpoint_paths_are_case_sensitive() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
    let router = router_for(&caster);

    let publish = router.clone().oneshot(post("/S1", open_source())).await.unwrap();
    assert_eq!(publish.status(), StatusCode::OK);

    let response = router.clone().oneshot(get("/s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let publish = router.oneshot(post("/s1", open_source())).await.unwrap();
    assert_eq!(publish.status(), StatusCode::OK);
    assert_eq!(caster.mountpoints(), vec!["/S1", "/s1"]);

    caster.delete_mountpoint("/S1");
    caster.delete_mountpoint("/s1");
}

// =============================================================================
// Other Methods and Authorization
// =============================================================================

#[tokio::test]
async fn test_unsupported_methods() {
    let caster = Arc::new(Caster::new(AllowAll, DEFAULT_TIMEOUT));
    let router = router_for(&caster);

    for method in ["PUT", "DELETE", "PATCH"] {
        let request = Request::builder()
            .method(method)
            .uri("/S1")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED, "{}", method);
        assert_eq!(json_body(response).await["error"], "not_implemented");
    }

    assert!(caster.mountpoints().is_empty());
}

#[tokio::test]
async fn test_denied_request_never_reaches_registry() {
    let caster = Arc::new(Caster::new(DenyPaths::new(&["/SECRET"]), DEFAULT_TIMEOUT));
    let router = router_for(&caster);

    let response = router
        .clone()
        .oneshot(post("/SECRET", open_source()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    assert!(caster.get_mountpoint("/SECRET").is_none());

    // Authorization runs before method dispatch.
    let request = Request::builder()
        .method("PUT")
        .uri("/SECRET")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router.oneshot(get("/OPEN")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
