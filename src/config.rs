use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 对外访问的站点地址（用于短链绝对地址与错误文档链接）
    #[serde(default = "ServerConfig::default_public_base_url")]
    pub public_base_url: String,
}

impl ServerConfig {
    fn default_public_base_url() -> String {
        "https://imges.dev".to_string()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_base_url: Self::default_public_base_url(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 未设置时生效）
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "imges_backend=info,tower_http=info".to_string(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// JSON 接口路由前缀（图片路由始终挂在根路径）
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: "/api".to_string(),
        }
    }
}

/// 图片渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRenderConfig {
    /// 是否启用成品图片缓存
    #[serde(default = "ImageRenderConfig::default_cache_enabled")]
    pub cache_enabled: bool,
    /// 缓存最大容量（字节），按图片字节大小加权
    #[serde(default = "ImageRenderConfig::default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    /// 缓存 TTL（秒）
    #[serde(default = "ImageRenderConfig::default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// 缓存 TTI（秒）
    #[serde(default = "ImageRenderConfig::default_cache_tti")]
    pub cache_tti_secs: u64,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// PNG 编码优先速度（Fast 压缩 + 无滤波），体积略大
    #[serde(default)]
    pub optimize_speed: bool,
}

impl ImageRenderConfig {
    fn default_cache_enabled() -> bool {
        true
    }
    fn default_cache_max_bytes() -> u64 {
        64 * 1024 * 1024
    }
    fn default_cache_ttl() -> u64 {
        3600
    }
    fn default_cache_tti() -> u64 {
        600
    }

    /// 实际生效的并发渲染许可数
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get()
        } else {
            self.max_parallel as usize
        }
    }
}

impl Default for ImageRenderConfig {
    fn default() -> Self {
        Self {
            cache_enabled: Self::default_cache_enabled(),
            cache_max_bytes: Self::default_cache_max_bytes(),
            cache_ttl_secs: Self::default_cache_ttl(),
            cache_tti_secs: Self::default_cache_tti(),
            max_parallel: 0,
            optimize_speed: false,
        }
    }
}

/// 在线字体配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontsConfig {
    /// 字体文件磁盘缓存目录
    #[serde(default = "FontsConfig::default_cache_dir")]
    pub cache_dir: String,
    /// 字体样式表服务地址（按 family 查询 @font-face）
    #[serde(default = "FontsConfig::default_css_endpoint")]
    pub css_endpoint: String,
    /// 请求样式表时使用的 User-Agent（旧版 UA 才会返回 TrueType 链接）
    #[serde(default = "FontsConfig::default_user_agent")]
    pub user_agent: String,
    /// 单次字体加载（样式表 + 字体文件）的总超时（毫秒）
    #[serde(default = "FontsConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl FontsConfig {
    fn default_cache_dir() -> String {
        "./resources/fonts".to_string()
    }
    fn default_css_endpoint() -> String {
        "https://fonts.googleapis.com/css".to_string()
    }
    fn default_user_agent() -> String {
        "Mozilla/5.0 (Linux; Android 4.4.2; Nexus 4 Build/KOT49H) AppleWebKit/537.36".to_string()
    }
    fn default_timeout_ms() -> u64 {
        5000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_path(&self) -> PathBuf {
        PathBuf::from(&self.cache_dir)
    }
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            css_endpoint: Self::default_css_endpoint(),
            user_agent: Self::default_user_agent(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// 表情图元（pictograph）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PictographConfig {
    /// 图元 PNG 的基地址，最终地址为 `{base_url}/{codepoints}.png`
    #[serde(default = "PictographConfig::default_base_url")]
    pub base_url: String,
    /// 单个图元下载超时（毫秒）
    #[serde(default = "PictographConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    /// 内存中保留的图元数量上限
    #[serde(default = "PictographConfig::default_cache_entries")]
    pub cache_entries: u64,
}

impl PictographConfig {
    fn default_base_url() -> String {
        "https://cdn.jsdelivr.net/gh/twitter/twemoji@latest/assets/72x72".to_string()
    }
    fn default_timeout_ms() -> u64 {
        3000
    }
    fn default_cache_entries() -> u64 {
        2048
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PictographConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_ms: Self::default_timeout_ms(),
            cache_entries: Self::default_cache_entries(),
        }
    }
}

/// 限流配置（固定窗口，按客户端标识计数）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_enabled")]
    pub enabled: bool,
    /// 窗口长度（秒）
    #[serde(default = "RateLimitConfig::default_window_secs")]
    pub window_secs: u64,
    /// 每个窗口允许的图片请求数
    #[serde(default = "RateLimitConfig::default_max_requests")]
    pub max_requests: u32,
}

impl RateLimitConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_window_secs() -> u64 {
        60
    }
    fn default_max_requests() -> u32 {
        100
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            window_secs: Self::default_window_secs(),
            max_requests: Self::default_max_requests(),
        }
    }
}

/// 统计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// 是否启用统计
    #[serde(default = "StatsConfig::default_enabled")]
    pub enabled: bool,
    /// SQLite 文件路径
    #[serde(default = "StatsConfig::default_sqlite_path")]
    pub sqlite_path: String,
    /// 是否启用 WAL
    #[serde(default = "StatsConfig::default_sqlite_wal")]
    pub sqlite_wal: bool,
    /// 批量大小
    #[serde(default = "StatsConfig::default_batch_size")]
    pub batch_size: usize,
    /// 刷新间隔（毫秒）
    #[serde(default = "StatsConfig::default_flush_ms")]
    pub flush_interval_ms: u64,
    /// 站内来源域名：来自这些站点的请求（示例页/构建器）不计入统计
    #[serde(default = "StatsConfig::default_own_hosts")]
    pub own_hosts: Vec<String>,
}

impl StatsConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_sqlite_path() -> String {
        "./resources/analytics.db".to_string()
    }
    fn default_sqlite_wal() -> bool {
        true
    }
    fn default_batch_size() -> usize {
        100
    }
    fn default_flush_ms() -> u64 {
        1000
    }
    fn default_own_hosts() -> Vec<String> {
        vec!["imges.dev".to_string(), "www.imges.dev".to_string()]
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            sqlite_path: Self::default_sqlite_path(),
            sqlite_wal: Self::default_sqlite_wal(),
            batch_size: Self::default_batch_size(),
            flush_interval_ms: Self::default_flush_ms(),
            own_hosts: Self::default_own_hosts(),
        }
    }
}

/// 短链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlinkConfig {
    #[serde(default = "ShortlinkConfig::default_enabled")]
    pub enabled: bool,
    /// SQLite 文件路径
    #[serde(default = "ShortlinkConfig::default_sqlite_path")]
    pub sqlite_path: String,
}

impl ShortlinkConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_sqlite_path() -> String {
        "./resources/short_urls.db".to_string()
    }
}

impl Default for ShortlinkConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            sqlite_path: Self::default_sqlite_path(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// 图片渲染配置
    #[serde(default)]
    pub image: ImageRenderConfig,
    /// 在线字体配置
    #[serde(default)]
    pub fonts: FontsConfig,
    /// 表情图元配置
    #[serde(default)]
    pub pictographs: PictographConfig,
    /// 限流配置
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// 统计配置
    #[serde(default)]
    pub stats: StatsConfig,
    /// 短链配置
    #[serde(default)]
    pub shortlinks: ShortlinkConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖；配置文件缺失时全部使用默认值
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP_SERVER__PORT
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 获取全局配置（未初始化时返回 None，供测试与错误响应等无需强依赖的路径使用）
    pub fn try_global() -> Option<&'static AppConfig> {
        CONFIG.get()
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径（可用 APP_CONFIG 指定）
    fn get_config_path() -> PathBuf {
        std::env::var("APP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 错误文档地址
    pub fn docs_url(&self) -> String {
        format!("{}/docs", self.server.public_base_url.trim_end_matches('/'))
    }
}

/// 当前生效的文档地址：全局配置已初始化时取配置值，否则使用默认站点
pub fn docs_url() -> String {
    AppConfig::try_global()
        .map(AppConfig::docs_url)
        .unwrap_or_else(|| AppConfig::default().docs_url())
}

#[cfg(test)]
mod tests {
    use super::AppConfig;

    #[test]
    fn empty_document_deserializes_to_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .expect("build empty config")
            .try_deserialize()
            .expect("deserialize defaults");
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.rate_limit.window_secs, 60);
        assert_eq!(cfg.api.prefix, "/api");
        assert!(cfg.image.cache_enabled);
        assert_eq!(cfg.docs_url(), "https://imges.dev/docs");
    }

    #[test]
    fn zero_parallelism_means_cpu_count() {
        let cfg = AppConfig::default();
        assert!(cfg.image.effective_parallelism() >= 1);
    }
}
