use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::image::{DEFAULT_FAMILY, ImageRequest};

/// User-Agent / Referer 入库前截断长度（字符）
const MAX_HEADER_CHARS: usize = 500;

/// 一次成功的图片生成
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEvent {
    pub ts_utc: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub bg_color: String,
    pub fg_color: String,
    pub format: String,
    pub has_text: bool,
    pub has_border: bool,
    pub has_blur: bool,
    pub has_pattern: bool,
    pub has_gradient: bool,
    pub has_custom_font: bool,
    pub query_json: Option<serde_json::Value>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

fn truncate(value: Option<&str>) -> Option<String> {
    value.map(|v| v.chars().take(MAX_HEADER_CHARS).collect())
}

impl ImageEvent {
    pub fn from_request(
        req: &ImageRequest,
        query: &HashMap<String, String>,
        user_agent: Option<&str>,
        referrer: Option<&str>,
    ) -> Self {
        let spec = &req.spec;
        let opts = &req.options;
        Self {
            ts_utc: Utc::now(),
            width: spec.width,
            height: spec.height,
            bg_color: spec.background.clone(),
            fg_color: spec.foreground.clone(),
            format: spec.format.as_str().to_string(),
            has_text: query.get("text").is_some_and(|t| !t.is_empty()),
            has_border: opts.border > 0,
            has_blur: opts.blur > 0,
            has_pattern: opts.pattern.is_some(),
            has_gradient: spec.background_end.is_some(),
            has_custom_font: opts.font != DEFAULT_FAMILY,
            query_json: (!query.is_empty())
                .then(|| serde_json::to_value(query).ok())
                .flatten(),
            user_agent: truncate(user_agent),
            referrer: truncate(referrer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::image::parse_image_request;

    #[test]
    fn flags_follow_request_options() {
        let query: HashMap<String, String> = [
            ("text", "Hi"),
            ("border", "2"),
            ("pattern", "dots"),
            ("font", "roboto"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let req = parse_image_request("/800x600.webp/f00-00f", &query).expect("valid");
        let evt = ImageEvent::from_request(&req, &query, None, None);

        assert_eq!((evt.width, evt.height), (800, 600));
        assert_eq!(evt.format, "webp");
        assert!(evt.has_text && evt.has_border && evt.has_pattern);
        assert!(evt.has_gradient && evt.has_custom_font);
        assert!(!evt.has_blur);
        let text = evt.query_json.as_ref().and_then(|q| q.get("text"));
        assert_eq!(text, Some(&serde_json::json!("Hi")));
    }

    #[test]
    fn long_headers_are_truncated() {
        let query = HashMap::new();
        let req = parse_image_request("/300", &query).expect("valid");
        let ua = "a".repeat(800);
        let evt = ImageEvent::from_request(&req, &query, Some(&ua), Some("https://x.test/"));
        assert_eq!(evt.user_agent.map(|u| u.chars().count()), Some(500));
        assert_eq!(evt.referrer.as_deref(), Some("https://x.test/"));
        assert!(evt.query_json.is_none());
        assert!(!evt.has_text);
    }
}
