use axum::body::Bytes;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::features::image::{FontRegistry, GlyphFetcher};
use crate::features::shortlink::ShortlinkStorage;
use crate::features::stats::StatsHandle;
use crate::rate_limit::RateLimiter;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub fonts: Arc<FontRegistry>,
    pub glyphs: GlyphFetcher,
    pub stats: Option<StatsHandle>,
    pub shortlinks: Option<Arc<ShortlinkStorage>>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// 控制并发渲染的信号量（限制 CPU 密集型任务数量）
    pub render_semaphore: Arc<Semaphore>,
    /// 已编码图片缓存（按图片字节大小加权）；禁用时为 None
    pub image_cache: Option<Cache<String, Bytes>>,
}

impl AppState {
    /// 按配置构建状态；统计与短链存储由调用方按需初始化后填入
    pub fn new(config: &AppConfig, fonts: Arc<FontRegistry>) -> Self {
        let img = &config.image;
        let image_cache = img.cache_enabled.then(|| {
            Cache::builder()
                .weigher(|_k, v: &Bytes| v.len().try_into().unwrap_or(u32::MAX))
                .max_capacity(img.cache_max_bytes)
                .time_to_live(Duration::from_secs(img.cache_ttl_secs))
                .time_to_idle(Duration::from_secs(img.cache_tti_secs))
                .build()
        });
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(&config.rate_limit)));

        Self {
            fonts,
            glyphs: GlyphFetcher::new(&config.pictographs),
            stats: None,
            shortlinks: None,
            rate_limiter,
            render_semaphore: Arc::new(Semaphore::new(img.effective_parallelism())),
            image_cache,
        }
    }
}
