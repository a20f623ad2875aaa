use sqlx::{QueryBuilder, SqlitePool};

use crate::error::AppError;

use super::models::ImageEvent;

#[derive(Clone)]
pub struct StatsStorage {
    pub pool: SqlitePool,
}

impl StatsStorage {
    pub async fn connect_sqlite(path: &str, wal: bool) -> Result<Self, AppError> {
        let pool = crate::db::connect_sqlite(path, wal).await?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS image_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_utc TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            bg_color TEXT,
            fg_color TEXT,
            format TEXT NOT NULL,
            has_text INTEGER NOT NULL DEFAULT 0,
            has_border INTEGER NOT NULL DEFAULT 0,
            has_blur INTEGER NOT NULL DEFAULT 0,
            has_pattern INTEGER NOT NULL DEFAULT 0,
            has_gradient INTEGER NOT NULL DEFAULT 0,
            has_custom_font INTEGER NOT NULL DEFAULT 0,
            query_json TEXT,
            user_agent TEXT,
            referrer TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_image_events_ts ON image_events(ts_utc);
        CREATE INDEX IF NOT EXISTS idx_image_events_dims ON image_events(width, height);
        CREATE INDEX IF NOT EXISTS idx_image_events_format ON image_events(format);
        "#;
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("init schema: {e}")))?;
        Ok(())
    }

    pub async fn insert_events(&self, events: &[ImageEvent]) -> Result<(), AppError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("begin tx: {e}")))?;

        // SQLite 默认 `SQLITE_MAX_VARIABLE_NUMBER=999`，每行 15 列绑定参数
        const COLS: usize = 15;
        const SQLITE_MAX_VARS: usize = 999;
        const MAX_ROWS_PER_INSERT: usize = SQLITE_MAX_VARS / COLS;

        for chunk in events.chunks(MAX_ROWS_PER_INSERT) {
            let mut qb = QueryBuilder::new(
                "INSERT INTO image_events(ts_utc, width, height, bg_color, fg_color, format, has_text, has_border, has_blur, has_pattern, has_gradient, has_custom_font, query_json, user_agent, referrer) ",
            );
            qb.push_values(chunk, |mut b, e| {
                let query = e
                    .query_json
                    .as_ref()
                    .map(|v| serde_json::to_string(v).unwrap_or_default());
                b.push_bind(e.ts_utc.to_rfc3339())
                    .push_bind(i64::from(e.width))
                    .push_bind(i64::from(e.height))
                    .push_bind(&e.bg_color)
                    .push_bind(&e.fg_color)
                    .push_bind(&e.format)
                    .push_bind(e.has_text)
                    .push_bind(e.has_border)
                    .push_bind(e.has_blur)
                    .push_bind(e.has_pattern)
                    .push_bind(e.has_gradient)
                    .push_bind(e.has_custom_font)
                    .push_bind(query)
                    .push_bind(&e.user_agent)
                    .push_bind(&e.referrer);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::Database(format!("insert event: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("commit: {e}")))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn count_events(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::Row;

    fn event(width: u32, height: u32) -> ImageEvent {
        ImageEvent {
            ts_utc: Utc::now(),
            width,
            height,
            bg_color: "cccccc".into(),
            fg_color: "333333".into(),
            format: "png".into(),
            has_text: false,
            has_border: false,
            has_blur: false,
            has_pattern: false,
            has_gradient: false,
            has_custom_font: false,
            query_json: None,
            user_agent: None,
            referrer: None,
        }
    }

    #[tokio::test]
    async fn batches_larger_than_one_statement_are_inserted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/analytics.db");
        let storage = StatsStorage::connect_sqlite(path.to_str().expect("utf8"), false)
            .await
            .expect("connect");
        storage.init_schema().await.expect("schema");

        let mut events: Vec<ImageEvent> = (0..150).map(|_| event(800, 600)).collect();
        events.extend((0..10).map(|_| event(300, 300)));
        storage.insert_events(&events).await.expect("insert");

        assert_eq!(storage.count_events().await.expect("count"), 160);
        let rows = sqlx::query(
            "SELECT width, height, COUNT(*) AS n FROM image_events GROUP BY width, height ORDER BY n DESC",
        )
        .fetch_all(&storage.pool)
        .await
        .expect("group");
        let top: Vec<(i64, i64, i64)> = rows
            .iter()
            .map(|r| {
                (
                    r.try_get("width").expect("width"),
                    r.try_get("height").expect("height"),
                    r.try_get("n").expect("n"),
                )
            })
            .collect();
        assert_eq!(top, vec![(800, 600, 150), (300, 300, 10)]);
    }
}
