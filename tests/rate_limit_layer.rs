mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use tower::ServiceExt;

use common::{body_json, header, offline_config, router_for};

fn limited_app(dir: &std::path::Path, max_requests: u32) -> Router {
    let mut config = offline_config(dir);
    config.rate_limit.enabled = true;
    config.rate_limit.max_requests = max_requests;
    config.rate_limit.window_secs = 60;
    router_for(&config)
}

async fn get_from(app: &Router, uri: &str, ip: &str) -> Response {
    let req = Request::get(uri)
        .header("x-forwarded-for", ip)
        .body(Body::empty())
        .expect("request");
    app.clone().oneshot(req).await.expect("response")
}

#[tokio::test]
async fn image_requests_over_the_limit_get_429() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = limited_app(dir.path(), 2);

    for _ in 0..2 {
        let resp = get_from(&app, "/16x16", "203.0.113.7").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = get_from(&app, "/16x16", "203.0.113.7").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&resp, "x-ratelimit-limit"), "2");
    assert_eq!(header(&resp, "x-ratelimit-remaining"), "0");
    let retry: u64 = header(&resp, "retry-after").parse().expect("retry-after");
    assert!((1..=60).contains(&retry));
    assert!(header(&resp, "x-ratelimit-reset").parse::<i64>().is_ok());

    let v = body_json(resp).await;
    assert_eq!(v["error"], "Rate Limit Exceeded");
    assert_eq!(v["limit"], 2);
    assert_eq!(v["window"], "60 seconds");
    assert!(v["retryAfter"].as_u64().is_some());
}

#[tokio::test]
async fn clients_are_counted_separately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = limited_app(dir.path(), 1);

    assert_eq!(get_from(&app, "/16", "198.51.100.1").await.status(), StatusCode::OK);
    assert_eq!(get_from(&app, "/16", "198.51.100.2").await.status(), StatusCode::OK);
    assert_eq!(
        get_from(&app, "/16", "198.51.100.1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn non_image_paths_are_not_limited() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = limited_app(dir.path(), 1);

    for _ in 0..3 {
        let resp = get_from(&app, "/health", "192.0.2.10").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = get_from(&app, "/api/fonts", "192.0.2.10").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
