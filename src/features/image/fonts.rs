//! 字体解析与注册。
//!
//! 目录内的在线字体在首次使用时下载一次：优先复用磁盘缓存文件，否则经样式表查到
//! TrueType 地址后下载，临时文件写入后原子改名落盘，再载入共享字体数据库。
//! 任意一步失败都回退到默认无衬线字体，调用方只会看到 `degraded = true`。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use moka::future::Cache;
use resvg::usvg::{self, fontdb};
use thiserror::Error;

use crate::config::FontsConfig;

/// 默认字体族
pub const DEFAULT_FAMILY: &str = "sans-serif";

/// 系统通用字体族，无需下载
const SYSTEM_FAMILIES: [&str; 3] = ["sans-serif", "serif", "monospace"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FontCategory {
    SansSerif,
    Serif,
    Monospace,
    Display,
}

/// 在线字体目录项
#[derive(Debug, Clone, Copy)]
pub struct FontEntry {
    /// URL 中使用的字体键
    pub key: &'static str,
    /// 字体服务上的显示名
    pub name: &'static str,
    pub category: FontCategory,
}

macro_rules! font {
    ($key:literal, $name:literal, $cat:ident) => {
        FontEntry {
            key: $key,
            name: $name,
            category: FontCategory::$cat,
        }
    };
}

/// 支持的在线字体
pub const FONT_CATALOG: &[FontEntry] = &[
    font!("inter", "Inter", SansSerif),
    font!("roboto", "Roboto", SansSerif),
    font!("open-sans", "Open Sans", SansSerif),
    font!("lato", "Lato", SansSerif),
    font!("montserrat", "Montserrat", SansSerif),
    font!("poppins", "Poppins", SansSerif),
    font!("raleway", "Raleway", SansSerif),
    font!("nunito", "Nunito", SansSerif),
    font!("playfair-display", "Playfair Display", Serif),
    font!("merriweather", "Merriweather", Serif),
    font!("lora", "Lora", Serif),
    font!("roboto-slab", "Roboto Slab", Serif),
    font!("roboto-mono", "Roboto Mono", Monospace),
    font!("source-code-pro", "Source Code Pro", Monospace),
    font!("fira-code", "Fira Code", Monospace),
    font!("jetbrains-mono", "JetBrains Mono", Monospace),
    font!("bebas-neue", "Bebas Neue", Display),
    font!("lobster", "Lobster", Display),
    font!("pacifico", "Pacifico", Display),
    font!("dancing-script", "Dancing Script", Display),
];

pub fn catalog_entry(key: &str) -> Option<&'static FontEntry> {
    FONT_CATALOG.iter().find(|f| f.key == key)
}

/// 规范化字体键（去空白、转小写）；未知字体回退为 `sans-serif`，从不报错
pub fn validate_font(raw: &str) -> String {
    let key = raw.trim().to_ascii_lowercase();
    if SYSTEM_FAMILIES.contains(&key.as_str()) || catalog_entry(&key).is_some() {
        key
    } else {
        DEFAULT_FAMILY.to_string()
    }
}

/// 字体加载失败原因（仅用于日志）
#[derive(Debug, Error)]
pub enum FontError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("字体加载超时")]
    Timeout,
    #[error("样式表中未找到字体地址")]
    MissingFontUrl,
    #[error("字体文件无法解析")]
    InvalidFont,
}

/// 字体解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFont {
    /// 渲染时使用的 font-family
    pub family: String,
    /// 请求的在线字体未能加载，已回退到默认字体
    pub degraded: bool,
}

impl ResolvedFont {
    fn ready(family: &str) -> Self {
        Self {
            family: family.to_string(),
            degraded: false,
        }
    }
}

/// 进程级字体注册表
pub struct FontRegistry {
    /// 写时复制：渲染线程持有旧快照不受新字体注册影响
    database: RwLock<Arc<fontdb::Database>>,
    /// 已注册字体：字体键 → 实际 family 名。`try_get_with` 合并同一键的并发首次加载
    registered: Cache<String, String>,
    /// 启动时从磁盘缓存载入的字体：字体键 → family 名
    preloaded: HashMap<String, String>,
    cache_dir: PathBuf,
    css_endpoint: String,
    user_agent: String,
    timeout: Duration,
}

impl FontRegistry {
    /// 载入系统字体并创建注册表
    pub fn new(config: &FontsConfig) -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();

        // 预载磁盘缓存中的字体文件（如有），首个请求即可直接使用
        let mut preloaded = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(config.cache_path()) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(key) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|_| path.extension() == Some("ttf".as_ref()))
                    .and_then(catalog_entry)
                    .map(|e| e.key)
                else {
                    continue;
                };
                let before = db.len();
                if db.load_font_file(&path).is_err() {
                    continue;
                }
                if let Some(family) = newest_family(&db, before) {
                    preloaded.insert(key.to_string(), family);
                }
            }
        }
        if !preloaded.is_empty() {
            tracing::info!("已从磁盘缓存预载 {} 个字体", preloaded.len());
        }

        Self {
            preloaded,
            ..Self::with_database(db, config)
        }
    }

    /// 使用给定字体数据库创建注册表
    pub fn with_database(mut db: fontdb::Database, config: &FontsConfig) -> Self {
        configure_generic_families(&mut db);
        Self {
            database: RwLock::new(Arc::new(db)),
            registered: Cache::builder().max_capacity(FONT_CATALOG.len() as u64).build(),
            preloaded: HashMap::new(),
            cache_dir: config.cache_path(),
            css_endpoint: config.css_endpoint.clone(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
        }
    }

    /// 当前字体数据库快照
    pub fn database(&self) -> Arc<fontdb::Database> {
        match self.database.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 解析字体键为可用的 font-family。失败时回退默认字体并记录告警。
    pub async fn load_font(&self, key: &str) -> ResolvedFont {
        if SYSTEM_FAMILIES.contains(&key) {
            return ResolvedFont::ready(key);
        }
        let Some(entry) = catalog_entry(key) else {
            return ResolvedFont::ready(DEFAULT_FAMILY);
        };
        if let Some(family) = self.preloaded.get(key) {
            return ResolvedFont::ready(family);
        }

        let init = async {
            match tokio::time::timeout(self.timeout, self.fetch_and_register(entry)).await {
                Ok(result) => result,
                Err(_) => Err(FontError::Timeout),
            }
        };
        match self.registered.try_get_with(key.to_string(), init).await {
            Ok(family) => ResolvedFont {
                family,
                degraded: false,
            },
            Err(e) => {
                tracing::warn!("字体 '{}' 加载失败，回退为 {}: {}", key, DEFAULT_FAMILY, e);
                ResolvedFont {
                    family: DEFAULT_FAMILY.to_string(),
                    degraded: true,
                }
            }
        }
    }

    fn cache_file(&self, entry: &FontEntry) -> PathBuf {
        self.cache_dir.join(format!("{}.ttf", entry.key))
    }

    async fn fetch_and_register(&self, entry: &FontEntry) -> Result<String, FontError> {
        let path = self.cache_file(entry);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!("复用字体缓存文件 {}", path.display());
                bytes
            }
            Err(_) => {
                let bytes = self.download(entry).await?;
                persist_atomically(&path, &bytes).await?;
                tracing::info!("字体 '{}' 已下载并缓存到 {}", entry.key, path.display());
                bytes
            }
        };

        match self.register(bytes) {
            Some(family) => Ok(family),
            None => {
                // 缓存文件损坏：删除后下次重新下载
                let _ = tokio::fs::remove_file(&path).await;
                Err(FontError::InvalidFont)
            }
        }
    }

    /// 载入字体数据，返回新增字形的 family 名
    fn register(&self, bytes: Vec<u8>) -> Option<String> {
        let mut guard = match self.database.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        let db = Arc::make_mut(&mut guard);
        db.load_font_data(bytes);
        newest_family(db, before)
    }

    async fn download(&self, entry: &FontEntry) -> Result<Vec<u8>, FontError> {
        let client = crate::http::client_assets()?;
        let family_param = format!("{}:400", entry.name.replace(' ', "+"));
        let css = client
            .get(format!("{}?family={}", self.css_endpoint, family_param))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let font_url = extract_font_url(&css).ok_or(FontError::MissingFontUrl)?;
        let bytes = client
            .get(font_url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// 第 `before` 个之后新载入字形的 family 名
fn newest_family(db: &fontdb::Database, before: usize) -> Option<String> {
    db.faces()
        .skip(before)
        .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
}

/// 各通用字体族的候选系统字体，按顺序取第一个已安装的
const GENERIC_CANDIDATES: [(&str, &[&str]); 3] = [
    (
        "sans-serif",
        &["DejaVu Sans", "Liberation Sans", "Noto Sans", "Arial", "Helvetica"],
    ),
    (
        "serif",
        &["DejaVu Serif", "Liberation Serif", "Noto Serif", "Times New Roman"],
    ),
    (
        "monospace",
        &["DejaVu Sans Mono", "Liberation Mono", "Noto Sans Mono", "Courier New"],
    ),
];

/// fontdb 默认把 sans-serif 映射到 Arial，Linux 容器里通常不存在，这里改成实际安装的字体
fn configure_generic_families(db: &mut fontdb::Database) {
    let installed = |name: &str| {
        db.faces()
            .any(|face| face.families.iter().any(|(family, _)| family == name))
    };
    let mut chosen = [None; 3];
    for (slot, (_, candidates)) in chosen.iter_mut().zip(GENERIC_CANDIDATES.iter()) {
        *slot = candidates.iter().copied().find(|name| installed(name));
    }
    let [sans, serif, mono] = chosen;
    if let Some(name) = sans {
        db.set_sans_serif_family(name);
    }
    if let Some(name) = serif {
        db.set_serif_family(name);
    }
    if let Some(name) = mono {
        db.set_monospace_family(name);
    }
}

/// 文本渲染用的字体选择器：按声明顺序查询，最后依次尝试通用字体族与任意可用字体，
/// 保证只要数据库里有字体，文字就不会整段消失
pub fn font_resolver() -> usvg::FontResolver<'static> {
    usvg::FontResolver {
        select_font: Box::new(|font, db| {
            let mut families: Vec<fontdb::Family<'_>> = font
                .families()
                .iter()
                .map(|family| match family {
                    usvg::FontFamily::Serif => fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => fontdb::Family::Monospace,
                    usvg::FontFamily::Named(name) => fontdb::Family::Name(name),
                })
                .collect();
            families.push(fontdb::Family::SansSerif);

            let style = match font.style() {
                usvg::FontStyle::Normal => fontdb::Style::Normal,
                usvg::FontStyle::Italic => fontdb::Style::Italic,
                usvg::FontStyle::Oblique => fontdb::Style::Oblique,
            };
            let query = fontdb::Query {
                families: &families,
                weight: fontdb::Weight(font.weight()),
                stretch: fontdb::Stretch::Normal,
                style,
            };
            db.query(&query).or_else(|| db.faces().next().map(|face| face.id))
        }),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}

/// 样式表中第一个 `url(...)` 的地址
fn extract_font_url(css: &str) -> Option<&str> {
    let start = css.find("url(")? + "url(".len();
    let rest = &css[start..];
    let end = rest.find(')')?;
    let url = rest[..end].trim().trim_matches(|c| c == '\'' || c == '"');
    (!url.is_empty()).then_some(url)
}

/// 先写临时文件再改名，保证缓存文件要么不存在要么完整
async fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension(format!("ttf.{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config(dir: &Path) -> FontsConfig {
        FontsConfig {
            cache_dir: dir.to_string_lossy().into_owned(),
            // 本地丢弃端口，连接立即失败
            css_endpoint: "http://127.0.0.1:9/css".to_string(),
            timeout_ms: 500,
            ..FontsConfig::default()
        }
    }

    #[test]
    fn catalog_has_twenty_unique_keys() {
        assert_eq!(FONT_CATALOG.len(), 20);
        let mut keys: Vec<_> = FONT_CATALOG.iter().map(|f| f.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 20);
    }

    #[test]
    fn validate_font_normalizes_and_falls_back() {
        assert_eq!(validate_font("  Roboto-Mono "), "roboto-mono");
        assert_eq!(validate_font("SERIF"), "serif");
        assert_eq!(validate_font("comic-sans"), "sans-serif");
        assert_eq!(validate_font(""), "sans-serif");
    }

    #[test]
    fn font_url_is_extracted_from_stylesheet() {
        let css = "@font-face {\n  font-family: 'Lato';\n  src: url(https://fonts.gstatic.com/s/lato/v24/x.ttf) format('truetype');\n}";
        assert_eq!(
            extract_font_url(css),
            Some("https://fonts.gstatic.com/s/lato/v24/x.ttf")
        );
        assert_eq!(extract_font_url("src: url('a.ttf')"), Some("a.ttf"));
        assert_eq!(extract_font_url("no font here"), None);
    }

    #[tokio::test]
    async fn system_families_resolve_without_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = offline_config(dir.path());
        let registry = FontRegistry::with_database(fontdb::Database::new(), &config);
        let resolved = registry.load_font("monospace").await;
        assert_eq!(resolved, ResolvedFont::ready("monospace"));
    }

    #[tokio::test]
    async fn unreachable_font_service_degrades_to_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = offline_config(dir.path());
        let registry = FontRegistry::with_database(fontdb::Database::new(), &config);

        let resolved = registry.load_font("lobster").await;
        assert_eq!(resolved.family, DEFAULT_FAMILY);
        assert!(resolved.degraded);
        // 失败不落盘，也不留下临时文件
        let leftovers = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn corrupt_cache_file_is_discarded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cached = dir.path().join("pacifico.ttf");
        std::fs::write(&cached, b"not a font").expect("write stub");
        let config = offline_config(dir.path());
        let registry = FontRegistry::with_database(fontdb::Database::new(), &config);

        let resolved = registry.load_font("pacifico").await;
        assert!(resolved.degraded);
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn atomic_persist_leaves_only_final_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("inter.ttf");
        persist_atomically(&target, b"abc").await.expect("persist");
        assert_eq!(std::fs::read(&target).expect("read back"), b"abc");
        let names: Vec<_> = std::fs::read_dir(target.parent().expect("parent"))
            .expect("read dir")
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
