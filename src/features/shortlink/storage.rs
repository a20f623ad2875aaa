use rand::Rng;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;

use crate::error::AppError;

const ADJECTIVES: &[&str] = &[
    "blue", "red", "green", "pink", "purple", "orange", "yellow", "cyan", "bright", "dark",
    "light", "soft", "bold", "vivid", "pale", "neon", "warm", "cool", "fresh", "clean", "sharp",
    "smooth", "rough", "sleek", "modern", "classic", "vintage", "retro", "minimal", "simple",
    "fancy", "elegant", "quick", "fast", "slow", "calm", "wild", "quiet", "loud", "subtle",
    "happy", "sunny", "cloudy", "misty", "clear", "hazy", "crisp", "fuzzy",
];

const NOUNS: &[&str] = &[
    "cat", "dog", "fox", "bear", "wolf", "lion", "tiger", "panda", "star", "moon", "sun", "cloud",
    "wave", "ocean", "river", "lake", "mountain", "valley", "forest", "desert", "island", "garden",
    "meadow", "field", "fire", "water", "earth", "wind", "thunder", "storm", "rain", "snow",
    "hero", "card", "badge", "banner", "button", "icon", "logo", "mark", "grid", "dots", "lines",
    "waves", "circles", "squares", "stripes", "pattern", "photo", "image", "picture", "canvas",
    "frame", "poster", "print", "sketch",
];

/// 随机生成的短码最多尝试次数，之后追加两位数字后缀
const MAX_ATTEMPTS: usize = 100;

/// 一条短链映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortLink {
    pub code: String,
    pub url: String,
}

fn memorable_code() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("blue");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("cat");
    format!("{adjective}-{noun}")
}

#[derive(Clone)]
pub struct ShortlinkStorage {
    pub pool: SqlitePool,
}

impl ShortlinkStorage {
    pub async fn connect_sqlite(path: &str) -> Result<Self, AppError> {
        let pool = crate::db::connect_sqlite(path, false).await?;
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS short_urls (
            code TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            hits INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_short_urls_url ON short_urls(url);
        "#;
        sqlx::query(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("init schema: {e}")))?;
        Ok(())
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<String>, AppError> {
        let code = sqlx::query_scalar::<_, String>(
            "SELECT code FROM short_urls WHERE url = ? ORDER BY created_at ASC LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code)
    }

    pub async fn exists(&self, code: &str) -> Result<bool, AppError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM short_urls WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// 插入映射；短码已被占用时返回 false
    async fn insert(&self, code: &str, url: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO short_urls(code, url, created_at, hits) VALUES (?, ?, ?, 0)",
        )
        .bind(code)
        .bind(url)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn generate_code(&self) -> Result<String, AppError> {
        for _ in 0..MAX_ATTEMPTS {
            let code = memorable_code();
            if !self.exists(&code).await? {
                return Ok(code);
            }
        }
        let suffix: u32 = rand::thread_rng().gen_range(0..100);
        Ok(format!("{}-{suffix}", memorable_code()))
    }

    /// 创建短链。同一地址已有映射时直接返回已有短码。
    pub async fn create(
        &self,
        url: &str,
        custom_code: Option<&str>,
    ) -> Result<ShortLink, AppError> {
        if let Some(code) = self.find_by_url(url).await? {
            return Ok(ShortLink {
                code,
                url: url.to_string(),
            });
        }

        let code = match custom_code {
            Some(code) => code.to_string(),
            None => self.generate_code().await?,
        };
        if !self.insert(&code, url).await? {
            return Err(AppError::Conflict(
                "This custom code is already taken".to_string(),
            ));
        }
        tracing::info!("新建短链 {} -> {}", code, url);
        Ok(ShortLink {
            code,
            url: url.to_string(),
        })
    }

    /// 解析短码并累计访问次数
    pub async fn resolve(&self, code: &str) -> Result<Option<String>, AppError> {
        let url = sqlx::query_scalar::<_, String>(
            "UPDATE short_urls SET hits = hits + 1 WHERE code = ? RETURNING url",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(url)
    }

    pub async fn hits(&self, code: &str) -> Result<Option<i64>, AppError> {
        let hits = sqlx::query_scalar::<_, i64>("SELECT hits FROM short_urls WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hits)
    }
}
