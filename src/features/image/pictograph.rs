//! 表情图元：按码点区间切分文本，并拉取对应的 PNG 图元。

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use moka::future::Cache;
use thiserror::Error;

use super::types::TextSegment;
use crate::config::PictographConfig;

const ZWJ: char = '\u{200D}';
const VS16: char = '\u{FE0F}';

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

/// 单个码点是否开启一个图元簇
pub fn is_pictograph(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F000..=0x1F2FF)
}

/// 附着在前一个码点上的修饰符（变体选择符、肤色、键帽、标签序列）
fn is_modifier(c: char) -> bool {
    matches!(c as u32, 0xFE0F | 0x20E3 | 0x1F3FB..=0x1F3FF | 0xE0020..=0xE007F)
}

/// 将一行文本切分为普通文字片段与图元片段
pub fn segment_line(line: &str, base_url: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if !is_pictograph(c) {
            literal.push(c);
            continue;
        }

        let mut cluster = String::from(c);
        // 两个区域指示符组成一面旗帜
        if is_regional_indicator(c)
            && let Some(&next) = chars.peek()
            && is_regional_indicator(next)
        {
            cluster.push(next);
            chars.next();
        }
        while let Some(&next) = chars.peek() {
            if is_modifier(next) {
                cluster.push(next);
                chars.next();
            } else if next == ZWJ {
                cluster.push(next);
                chars.next();
                if let Some(joined) = chars.next() {
                    cluster.push(joined);
                }
            } else {
                break;
            }
        }

        if !literal.is_empty() {
            segments.push(TextSegment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(TextSegment::Pictograph {
            url: glyph_url(base_url, &cluster),
            content: cluster,
        });
    }
    if !literal.is_empty() {
        segments.push(TextSegment::Literal(literal));
    }
    segments
}

/// 图元标识：码点小写十六进制以 `-` 连接；不含 ZWJ 时去掉 FE0F
pub fn pictograph_id(cluster: &str) -> String {
    let keep_vs16 = cluster.contains(ZWJ);
    cluster
        .chars()
        .filter(|&c| keep_vs16 || c != VS16)
        .map(|c| format!("{:x}", c as u32))
        .collect::<Vec<_>>()
        .join("-")
}

fn glyph_url(base_url: &str, cluster: &str) -> String {
    format!("{}/{}.png", base_url.trim_end_matches('/'), pictograph_id(cluster))
}

#[derive(Debug, Error)]
pub enum GlyphError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),
    #[error("图元下载超时")]
    Timeout,
    #[error("图元不是有效的 PNG: {0}")]
    Decode(#[from] image::ImageError),
}

/// 图元下载器，结果按 URL 缓存
#[derive(Clone)]
pub struct GlyphFetcher {
    cache: Cache<String, Bytes>,
    base_url: Arc<str>,
    timeout: Duration,
}

impl GlyphFetcher {
    pub fn new(config: &PictographConfig) -> Self {
        Self {
            cache: Cache::builder().max_capacity(config.cache_entries).build(),
            base_url: config.base_url.trim_end_matches('/').into(),
            timeout: config.timeout(),
        }
    }

    /// 图元 PNG 的基地址
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 获取图元 PNG；失败返回 None，由调用方回退为文字
    pub async fn fetch(&self, url: &str) -> Option<Bytes> {
        let timeout = self.timeout;
        let init = async move {
            match tokio::time::timeout(timeout, download(url, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(GlyphError::Timeout),
            }
        };
        match self.cache.try_get_with(url.to_string(), init).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!("图元 {} 加载失败，回退为文字: {}", url, e);
                None
            }
        }
    }

    /// 预置图元（测试或本地资源）
    pub async fn insert(&self, url: impl Into<String>, png: Bytes) {
        self.cache.insert(url.into(), png).await;
    }
}

async fn download(url: &str, timeout: Duration) -> Result<Bytes, GlyphError> {
    let client = crate::http::client_assets()?;
    let bytes = client
        .get(url)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)?;
    Ok(bytes)
}
