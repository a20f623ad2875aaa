/// 健康检查
pub mod health;

/// 占位图生成
pub mod image;

/// 短链
pub mod shortlink;

/// 图片生成统计
pub mod stats;
