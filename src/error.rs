use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 图片请求参数校验错误（路径或查询参数）
    #[error("参数校验错误: {0}")]
    Validation(#[from] ValidationError),

    /// 一般请求错误（如短链请求体不合法）
    #[error("请求错误: {0}")]
    BadRequest(String),

    /// 资源不存在
    #[error("未找到: {0}")]
    NotFound(String),

    /// 资源冲突（如短码占用）
    #[error("资源冲突: {0}")]
    Conflict(String),

    /// 图像渲染错误（对外不透出细节）
    #[error("图像渲染错误: {0}")]
    ImageRendererError(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 校验失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub enum ValidationKind {
    /// 不符合语法（如 `abc` 作为尺寸、非整数的数值参数）
    MalformedInput,
    /// 数值越界
    OutOfRange,
    /// 语法正确但取值不在支持集合内（如 `.gif`）
    UnsupportedValue,
}

impl ValidationKind {
    fn title(self) -> &'static str {
        match self {
            ValidationKind::MalformedInput => "Malformed Input",
            ValidationKind::OutOfRange => "Out Of Range",
            ValidationKind::UnsupportedValue => "Unsupported Value",
        }
    }
}

/// 单条校验错误。解析器遇到第一处错误即返回（fail-fast）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    /// 出错的字段名（如 `dimensions`、`background-color`、`blur`）
    pub field: String,
    pub message: String,
    /// 原始输入
    pub received: String,
    /// 期望的语法/取值范围
    pub expected: String,
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(
        kind: ValidationKind,
        field: impl Into<String>,
        message: impl Into<String>,
        received: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            message: message.into(),
            received: received.into(),
            expected: expected.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// 错误响应文档。
///
/// 校验错误会填满全部字段；其他错误只携带 `error` 与 `message`。
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorDocument {
    /// 简短标题
    #[schema(example = "Out Of Range")]
    pub error: String,
    /// 出错字段
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "dimensions")]
    pub field: Option<String>,
    /// 人类可读的详细信息
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// 文档地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
    /// 可直接使用的示例路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
}

/// 针对出错字段给出几条可用的示例路径
fn examples_for(field: &str) -> Vec<String> {
    let list: &[&str] = match field {
        "dimensions" => &["/800x600", "/300", "/1200x630@2x.webp"],
        "format" => &["/800x600.png", "/800x600.jpg", "/800x600.webp"],
        "background-color" | "gradient-color-2" | "foreground-color" => &[
            "/800x600/3b82f6/ffffff",
            "/800x600/f0f/000",
            "/800x600/ff6b6b-4ecdc4",
            "/800x600/random",
        ],
        _ => &[
            "/800x600?text=Hello",
            "/800x600/3b82f6/ffffff?border=4&radius=24",
            "/800x600?pattern=dots&noise=10",
        ],
    };
    list.iter().map(|s| (*s).to_string()).collect()
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ImageRendererError(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 错误到响应文档的唯一映射
    pub fn to_document(&self) -> ErrorDocument {
        match self {
            AppError::Validation(v) => ErrorDocument {
                error: v.kind.title().to_string(),
                field: Some(v.field.clone()),
                message: v.message.clone(),
                received: Some(v.received.clone()),
                expected: Some(v.expected.clone()),
                suggestion: v.suggestion.clone(),
                docs: Some(crate::config::docs_url()),
                examples: Some(examples_for(&v.field)),
            },
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => {
                ErrorDocument::plain(self.title(), msg.clone())
            }
            // 内部错误只返回固定文案，细节进日志
            AppError::ImageRendererError(_) => {
                ErrorDocument::plain(self.title(), "Error generating image".to_string())
            }
            AppError::Database(_) | AppError::Internal(_) => {
                ErrorDocument::plain(self.title(), "Internal server error".to_string())
            }
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl ErrorDocument {
    fn plain(error: &str, message: String) -> Self {
        Self {
            error: error.to_string(),
            field: None,
            message,
            received: None,
            expected: None,
            suggestion: None,
            docs: None,
            examples: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let mut res = Json(self.to_document()).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        res
    }
}

// =============== Error conversions for common external errors ===============

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("后台任务失败: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_document_carries_every_field() {
        let err = AppError::from(
            ValidationError::new(
                ValidationKind::OutOfRange,
                "dimensions",
                "Width and height must be between 1 and 4000",
                "5000x5000",
                "WIDTHxHEIGHT with 1 <= value <= 4000",
            )
            .with_suggestion("/4000x4000"),
        );
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let doc = serde_json::to_value(err.to_document()).expect("serialize");
        assert_eq!(doc["error"], "Out Of Range");
        assert_eq!(doc["field"], "dimensions");
        assert_eq!(doc["received"], "5000x5000");
        assert_eq!(doc["suggestion"], "/4000x4000");
        assert!(doc["docs"].as_str().is_some_and(|d| d.ends_with("/docs")));
        assert!(doc["examples"].as_array().is_some_and(|a| !a.is_empty()));
    }

    #[test]
    fn render_failure_is_opaque() {
        let err = AppError::ImageRendererError("pixmap 分配失败".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let doc = serde_json::to_value(err.to_document()).expect("serialize");
        assert_eq!(doc["message"], "Error generating image");
        assert!(doc.get("field").is_none());
    }
}
