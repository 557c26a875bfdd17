use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request as HttpRequest, StatusCode};
use pretty_assertions::assert_eq;
use tower::ServiceExt as _;

use corral::containers;
use corral::ext::Extensions;
use corral::fsutil;
use corral::git;
use corral::id::Identifier;
use corral::job::{dispatch, Dispatcher};
use corral::port::{Port, PortAllocator};
use corral::ssh;
use corral::test::fake_sysd;

use corral_agent::api;

/// Pin the state root to a temporary directory and build the same router the
/// daemon serves.
fn router() -> axum::Router {
    let base = tempfile::tempdir().unwrap().into_path();
    std::env::set_var(corral::config::ENV_BASE_PATH, &base);
    let _ = corral::config::set_container_base_path(&base);
    let _ = fake_sysd();

    let mut handlers = ssh::Handlers::new();
    ssh::register_handlers(&mut handlers);
    git::register_permissions(&mut handlers);
    containers::register_authorized_keys(&mut handlers);
    let handlers = Arc::new(handlers);

    let allocator = Arc::new(PortAllocator::start(
        corral::config::container_base_path(),
        Port::new(4000).unwrap(),
        Port::new(4100).unwrap(),
    ));

    let mut ext = Extensions::new(handlers.clone());
    containers::extend(&mut ext, allocator);
    git::extend(&mut ext);
    ssh::extend(&mut ext, handlers);

    let state = Arc::new(api::AppState {
        registry: Arc::new(std::mem::take(&mut ext.jobs)),
        dispatcher: Dispatcher::start(dispatch::Config::default()),
    });
    api::router(std::mem::take(&mut ext.routes), state)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn content_streams_the_environment_file() {
    let app = router();
    let id = Identifier::new("apienv1").unwrap();
    fsutil::atomic_write(&id.environment_path(), b"A=1\n").unwrap();

    let response = app
        .oneshot(
            HttpRequest::get("/content?type=env&locator=apienv1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(body_string(response).await, "A=1\n");
}

#[tokio::test]
async fn missing_environment_is_not_found() {
    let app = router();

    let response = app
        .oneshot(
            HttpRequest::get("/content?type=env&locator=apienv2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["message"].as_str().unwrap().contains("does not exist"));
}

#[tokio::test]
async fn mismatched_api_versions_are_rejected() {
    let app = router();

    let response = app
        .oneshot(
            HttpRequest::get("/content?type=env&locator=apienv3")
                .header(header::IF_MATCH, "api=999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn invalid_identifiers_are_bad_requests() {
    let app = router();

    let response = app
        .oneshot(
            HttpRequest::put("/containers/x/started")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn started_reports_missing_containers() {
    let app = router();

    let response = app
        .oneshot(
            HttpRequest::put("/containers/apigone1/started")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
