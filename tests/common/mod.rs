#![allow(dead_code)]

use std::sync::Arc;

use axum::{Router, body::Body, http::Request, response::Response};
use imges_backend::config::AppConfig;
use imges_backend::features::image::FontRegistry;
use imges_backend::{AppState, build_router};
use resvg::usvg::fontdb;
use tower::ServiceExt;

/// 不访问外网的测试配置：字体与图元回源指向本地丢弃端口
pub fn offline_config(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.fonts.cache_dir = dir.join("fonts").to_string_lossy().into_owned();
    config.fonts.css_endpoint = "http://127.0.0.1:9/css".to_string();
    config.fonts.timeout_ms = 300;
    config.pictographs.base_url = "http://127.0.0.1:9/72x72".to_string();
    config.pictographs.timeout_ms = 300;
    config.stats.enabled = false;
    config.shortlinks.enabled = false;
    config.rate_limit.enabled = false;
    config
}

pub fn state_for(config: &AppConfig) -> AppState {
    let fonts = FontRegistry::with_database(fontdb::Database::new(), &config.fonts);
    AppState::new(config, Arc::new(fonts))
}

pub fn router_for(config: &AppConfig) -> Router {
    build_router(state_for(config), config)
}

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

pub async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).expect("parse json")
}

pub fn header<'a>(resp: &'a Response, name: &str) -> &'a str {
    resp.headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .expect("header str")
}
