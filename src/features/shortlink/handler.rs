use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{config::AppConfig, error::AppError, state::AppState};

use super::storage::ShortlinkStorage;

/// 创建短链请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShortenRequest {
    /// 图片路径（如 `/800x600/3b82f6/ffffff?text=Hello`）
    pub url: Option<String>,
    /// 自定义短码：小写字母、数字、连字符，3-50 字符
    pub custom_code: Option<String>,
}

/// 创建短链响应
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShortenResponse {
    pub code: String,
    /// 短链路径（`/s/{code}`）
    pub short_url: String,
    /// 原始图片路径
    pub full_url: String,
    /// 带协议与主机的完整短链
    pub absolute_url: String,
}

/// `/{W}x{H}` 开头的图片路径
fn is_image_path(url: &str) -> bool {
    let Some(rest) = url.strip_prefix('/') else {
        return false;
    };
    let Some((w, h)) = rest.split_once('x') else {
        return false;
    };
    let h_digits = h.chars().take_while(|c| c.is_ascii_digit()).count();
    !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()) && h_digits > 0
}

fn validate_custom_code(code: &str) -> Result<(), AppError> {
    if !code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::BadRequest(
            "Custom code must contain only lowercase letters, numbers, and hyphens".to_string(),
        ));
    }
    if !(3..=50).contains(&code.len()) {
        return Err(AppError::BadRequest(
            "Custom code must be between 3 and 50 characters".to_string(),
        ));
    }
    Ok(())
}

/// 短链的对外地址：优先使用请求的 Host，否则使用配置的站点地址
fn absolute_base(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty());
    match host {
        Some(host) => {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("https");
            format!("{proto}://{host}")
        }
        None => AppConfig::try_global()
            .map(|c| c.server.public_base_url.clone())
            .unwrap_or_else(|| crate::config::ServerConfig::default().public_base_url),
    }
}

fn storage(state: &AppState) -> Result<&ShortlinkStorage, AppError> {
    state
        .shortlinks
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Short URLs are disabled".to_string()))
}

#[utoipa::path(
    post,
    path = "/shorten",
    summary = "创建短链",
    description = "为图片路径生成易记的短码（adjective-noun），或使用自定义短码。同一路径重复提交返回已有短码。",
    request_body = ShortenRequest,
    responses(
        (status = 201, description = "创建成功", body = ShortenResponse),
        (status = 400, description = "请求体不合法", body = crate::error::ErrorDocument),
        (status = 409, description = "短码已被占用", body = crate::error::ErrorDocument)
    ),
    tag = "ShortLink"
)]
pub async fn create_short_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let url = req
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing or invalid 'url' field".to_string()))?;
    if !url.starts_with('/') {
        return Err(AppError::BadRequest(
            "URL must be a valid path starting with '/'".to_string(),
        ));
    }
    if !is_image_path(&url) {
        return Err(AppError::BadRequest(
            "URL must be a valid image generation path (e.g., /800x600/...)".to_string(),
        ));
    }
    if let Some(code) = req.custom_code.as_deref() {
        validate_custom_code(code)?;
    }

    let link = storage(&state)?
        .create(&url, req.custom_code.as_deref())
        .await?;
    let short_url = format!("/s/{}", link.code);
    let body = ShortenResponse {
        absolute_url: format!("{}{}", absolute_base(&headers), short_url),
        code: link.code,
        short_url,
        full_url: link.url,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

#[utoipa::path(
    get,
    path = "/s/{code}",
    summary = "短链跳转",
    params(("code" = String, Path, description = "短码")),
    responses(
        (status = 302, description = "跳转到图片地址"),
        (status = 404, description = "短码不存在", body = crate::error::ErrorDocument)
    ),
    tag = "ShortLink"
)]
pub async fn redirect_short_url(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let url = storage(&state)?
        .resolve(&code)
        .await?
        .ok_or_else(|| AppError::NotFound("Short URL not found".to_string()))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]))
}

/// `POST /shorten`（挂在 API 前缀下）
pub fn create_shortlink_api_router() -> Router<AppState> {
    Router::new().route("/shorten", post(create_short_url))
}

/// `GET /s/:code`
pub fn create_redirect_router() -> Router<AppState> {
    Router::new().route("/s/:code", get(redirect_short_url))
}
