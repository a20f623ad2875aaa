/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 功能聚合模块
pub mod features;

/// 应用状态聚合模块
pub mod state;

/// 路由装配
pub mod app;

/// OpenAPI 文档
pub mod openapi;

/// 图片路径限流
pub mod rate_limit;

/// SQLite 连接
pub mod db;

/// 优雅退出管理模块
pub mod shutdown;

/// HTTP Client 复用工具
pub mod http;

// 导出常用类型供外部使用
pub use app::build_router;
pub use config::AppConfig;
pub use error::AppError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::AppState;
