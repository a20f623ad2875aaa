//! 路由装配：图片 fallback、API 前缀路由、短链跳转、文档与中间件
use axum::{Router, routing::get};
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::features::{health, image, shortlink};
use crate::openapi::ApiDoc;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

pub fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

/// 构建完整应用路由
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    let api_router = Router::<AppState>::new()
        .merge(image::create_image_api_router())
        .merge(shortlink::create_shortlink_api_router());

    let rate_limiter = state.rate_limiter.clone();
    let mut app = Router::<AppState>::new()
        .route("/health", get(health::health_check))
        .merge(shortlink::create_redirect_router())
        .nest(&config.api.prefix, api_router)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // 其余路径都按图片规格解析
        .fallback(image::render_image)
        .with_state(state);

    if let Some(limiter) = rate_limiter {
        app = app.layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    app.layer(CompressionLayer::new().compress_when(compression_predicate()))
}
