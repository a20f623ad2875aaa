use std::collections::HashMap;
use std::time::Instant;

use axum::body::Bytes;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::task::JoinSet;
use utoipa::ToSchema;

use crate::{error::AppError, features::stats::models::ImageEvent, state::AppState};

use super::encoder::encode;
use super::fonts::{DEFAULT_FAMILY, FONT_CATALOG, FontCategory};
use super::layout::pictograph_urls;
use super::parser::parse_image_request;
use super::renderer::{RenderContext, render_canvas};
use super::types::ImageRequest;

const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// 路径百分号解码（`%23fff` → `#fff`）；非法序列原样保留
fn decode_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3])
            && let Ok(b) = u8::from_str_radix(hex, 16)
        {
            out.push(b);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn image_response(req: &ImageRequest, bytes: Bytes) -> Response {
    let spec = &req.spec;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(spec.format.content_type()),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
    );
    headers.insert("x-image-width", HeaderValue::from(spec.width));
    headers.insert("x-image-height", HeaderValue::from(spec.height));
    headers.insert(
        "x-image-format",
        HeaderValue::from_static(spec.format.as_str()),
    );
    headers.insert("x-image-scale", HeaderValue::from(spec.scale));
    (StatusCode::OK, headers, bytes).into_response()
}

/// 并发预取文本中的图元；失败的图元不出现在结果里
async fn prefetch_glyphs(state: &AppState, text: &str) -> HashMap<String, Bytes> {
    let urls = pictograph_urls(text, state.glyphs.base_url());
    let mut glyphs = HashMap::with_capacity(urls.len());
    if urls.is_empty() {
        return glyphs;
    }

    let mut set = JoinSet::new();
    for url in urls {
        let fetcher = state.glyphs.clone();
        set.spawn(async move {
            let png = fetcher.fetch(&url).await;
            (url, png)
        });
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((url, Some(png))) => {
                glyphs.insert(url, png);
            }
            Ok((_, None)) => {}
            Err(e) => tracing::warn!("图元预取任务异常: {}", e),
        }
    }
    glyphs
}

#[utoipa::path(
    get,
    path = "/{dimensions}/{background}/{foreground}",
    summary = "生成占位图",
    description = "按路径中的尺寸与颜色、查询参数中的文字与效果生成占位图。\
        `dimensions` 形如 `800x600`、`300`、`1200x630@2x.webp`；背景与前景色可省略，\
        背景可写作渐变 `ff6b6b-4ecdc4` 或 `random`。",
    params(
        ("dimensions" = String, Path, description = "WIDTHxHEIGHT 或 SIZE，可带 @2x/@3x 与 .png/.jpg/.jpeg/.webp"),
        ("background" = String, Path, description = "背景色（3/6 位十六进制、渐变 a-b 或 random），默认 cccccc"),
        ("foreground" = String, Path, description = "前景色，默认 333333"),
        ("text" = Option<String>, Query, description = "文字，`\\n` 换行；默认 `{W} × {H}`"),
        ("font" = Option<String>, Query, description = "字体键，见 /api/fonts；未知值回退 sans-serif"),
        ("weight" = Option<String>, Query, description = "normal | bold"),
        ("style" = Option<String>, Query, description = "normal | italic"),
        ("align" = Option<String>, Query, description = "top | center | bottom | custom"),
        ("y" = Option<u32>, Query, description = "align=custom 时的基线 Y，0-4000"),
        ("border" = Option<u32>, Query, description = "边框宽度 0-100"),
        ("borderColor" = Option<String>, Query, description = "边框颜色，默认前景色"),
        ("blur" = Option<u32>, Query, description = "模糊半径 0-50"),
        ("radius" = Option<u32>, Query, description = "圆角 0-500"),
        ("shadow" = Option<u32>, Query, description = "阴影 0-100"),
        ("shadowColor" = Option<String>, Query, description = "阴影颜色，默认 000000"),
        ("noise" = Option<u32>, Query, description = "噪点强度 0-100"),
        ("pattern" = Option<String>, Query, description = "dots | stripes | checkerboard | grid"),
        ("patternColor" = Option<String>, Query, description = "纹理颜色，默认前景色"),
        ("quality" = Option<u8>, Query, description = "JPEG/WebP 质量 1-100，默认 90"),
        ("format" = Option<String>, Query, description = "png | jpeg | jpg | webp，优先于扩展名"),
        ("size" = Option<u32>, Query, description = "字号 1-500，默认短边的 1/10")
    ),
    responses(
        (status = 200, description = "图片字节（image/png、image/jpeg 或 image/webp）"),
        (status = 400, description = "参数校验失败", body = crate::error::ErrorDocument),
        (status = 429, description = "请求过于频繁"),
        (status = 500, description = "生成失败", body = crate::error::ErrorDocument)
    ),
    tag = "Image"
)]
pub async fn render_image(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let t_total = Instant::now();
    let path = decode_path(uri.path());
    if path.trim_matches('/').is_empty() {
        return Err(AppError::NotFound("Nothing here; try /800x600".to_string()));
    }

    let req = parse_image_request(&path, &query)?;
    let key = req.cache_key();
    let track = |req: &ImageRequest| {
        if let Some(stats) = state.stats.as_ref() {
            stats.track(ImageEvent::from_request(
                req,
                &query,
                header_str(&headers, header::USER_AGENT),
                header_str(&headers, header::REFERER),
            ));
        }
    };

    // 含 random 的请求每次结果不同，不参与缓存
    let cache = state.image_cache.as_ref().filter(|_| !req.uses_random);
    if let Some(cache) = cache
        && let Some(bytes) = cache.get(&key).await
    {
        tracing::debug!(target: "imges_backend::image", "缓存命中: {}", key);
        track(&req);
        return Ok(image_response(&req, bytes));
    }

    // 网络相关的准备全部在进入阻塞渲染前完成
    let t_assets = Instant::now();
    let font = state.fonts.load_font(&req.options.font).await;
    let glyphs = prefetch_glyphs(&state, &req.options.text).await;
    let assets_ms = t_assets.elapsed().as_millis();

    let sem = state.render_semaphore.clone();
    let t_wait = Instant::now();
    let permit = sem
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("获取渲染信号量失败: {e}")))?;
    let wait_ms = t_wait.elapsed().as_millis();

    let ctx = RenderContext {
        fontdb: state.fonts.database(),
        font_family: font.family.clone(),
        glyphs,
        pictograph_base_url: state.glyphs.base_url().to_string(),
    };
    let render_req = req.clone();
    let t_render = Instant::now();
    let bytes = tokio::task::spawn_blocking(move || {
        let pixmap = render_canvas(&render_req, &ctx)?;
        encode(&pixmap, render_req.spec.format, render_req.options.quality)
    })
    .await
    .map_err(|e| AppError::Internal(format!("阻塞渲染任务执行失败: {e}")))??;
    drop(permit);
    let bytes = Bytes::from(bytes);

    tracing::info!(
        target: "imges_backend::image",
        "图片生成完成: {}x{}@{}x {} {} 字节, 资源 {}ms, 等待 {}ms, 渲染 {}ms, 总计 {}ms",
        req.spec.width,
        req.spec.height,
        req.spec.scale,
        req.spec.format.as_str(),
        bytes.len(),
        assets_ms,
        wait_ms,
        t_render.elapsed().as_millis(),
        t_total.elapsed().as_millis()
    );

    // 字体降级时不缓存，待字体恢复后能生成正确结果
    if let Some(cache) = cache
        && !font.degraded
    {
        cache.insert(key, bytes.clone()).await;
    }
    track(&req);

    Ok(image_response(&req, bytes))
}

/// 字体目录项
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FontInfo {
    /// `font` 查询参数取值
    pub key: String,
    pub name: String,
    pub category: FontCategory,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FontListResponse {
    /// 默认字体键
    pub default: String,
    pub fonts: Vec<FontInfo>,
}

#[utoipa::path(
    get,
    path = "/fonts",
    summary = "可用字体列表",
    description = "返回 `font` 查询参数可用的字体键。除目录中的在线字体外，sans-serif、serif、monospace 始终可用。",
    responses((status = 200, description = "字体目录", body = FontListResponse)),
    tag = "Image"
)]
pub async fn list_fonts() -> Json<FontListResponse> {
    Json(FontListResponse {
        default: DEFAULT_FAMILY.to_string(),
        fonts: FONT_CATALOG
            .iter()
            .map(|f| FontInfo {
                key: f.key.to_string(),
                name: f.name.to_string(),
                category: f.category,
            })
            .collect(),
    })
}

/// 挂在 API 前缀下的图片相关接口
pub fn create_image_api_router() -> Router<AppState> {
    Router::new().route("/fonts", get(list_fonts))
}
