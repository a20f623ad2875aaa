use std::path::Path;

use sqlx::{ConnectOptions, SqlitePool, sqlite::SqliteConnectOptions};

use crate::error::AppError;

/// 打开（必要时创建）SQLite 数据库，父目录不存在时一并创建
pub async fn connect_sqlite(path: &str, wal: bool) -> Result<SqlitePool, AppError> {
    if let Some(dir) = Path::new(path).parent()
        && !dir.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(dir).await.ok();
    }

    let opt = SqliteConnectOptions::new()
        .filename(Path::new(path))
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Off);
    let pool = SqlitePool::connect_with(opt)
        .await
        .map_err(|e| AppError::Database(format!("sqlite connect: {e}")))?;
    if wal {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .ok();
    }
    sqlx::query("PRAGMA synchronous=NORMAL;")
        .execute(&pool)
        .await
        .ok();
    Ok(pool)
}
