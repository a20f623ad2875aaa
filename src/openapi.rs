use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// 为 Swagger UI 提供正确的接口前缀 Servers 配置。
///
/// 图片、短链跳转与 `/health` 挂在根路径；`/shorten`、`/fonts` 挂在 `config.api.prefix`（默认 /api）下。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（图片、短链跳转、/health）"))
            .build();

        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("JSON 接口（默认 /api）"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api")
                    .description(Some(
                        "接口前缀：对应 config.api.prefix（可通过 APP_API__PREFIX 覆盖）",
                    )),
            )
            .build();

        openapi.servers = Some(vec![root, api]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::image::handler::render_image,
        crate::features::image::handler::list_fonts,
        crate::features::shortlink::handler::create_short_url,
        crate::features::shortlink::handler::redirect_short_url,
    ),
    components(schemas(
        crate::error::ErrorDocument,
        crate::error::ValidationKind,
        crate::features::health::HealthResponse,
        crate::features::image::ImageFormat,
        crate::features::image::FontCategory,
        crate::features::image::handler::FontInfo,
        crate::features::image::handler::FontListResponse,
        crate::features::shortlink::handler::ShortenRequest,
        crate::features::shortlink::handler::ShortenResponse,
    )),
    modifiers(&ApiServers),
    tags(
        (
            name = "Image",
            description = "占位图生成：尺寸、颜色、文字与效果均编码在 URL 中（png/jpeg/webp 输出）。"
        ),
        (name = "ShortLink", description = "短链：为较长的图片地址生成易记短码。"),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "Imges Backend API",
        version = env!("CARGO_PKG_VERSION"),
        description = "占位图服务 API（Axum + utoipa）。注意：`/shorten` 与 `/fonts` 实际挂载在 `config.api.prefix`（默认 /api）下，OpenAPI 的 paths 不包含该前缀。"
    )
)]
pub struct ApiDoc;
