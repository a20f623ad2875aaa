//! 图片路径的固定窗口限流
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use moka::future::Cache;
use serde::Serialize;

use crate::config::RateLimitConfig;

/// 同时跟踪的客户端上限
const MAX_CLIENTS: u64 = 100_000;

/// 单个客户端的窗口
#[derive(Debug)]
struct Window {
    started: Instant,
    count: AtomicU32,
}

/// 限流判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// 已超限，`retry_after` 为距窗口重置的秒数（向上取整）
    Limited { retry_after: u64 },
}

/// 窗口存放在 moka 缓存中，TTL 等于窗口长度，过期记录由缓存自行淘汰
pub struct RateLimiter {
    windows: Cache<String, Arc<Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_secs.max(1));
        Self {
            windows: Cache::builder()
                .max_capacity(MAX_CLIENTS)
                .time_to_live(window)
                .build(),
            max_requests: config.max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, client: &str) -> Decision {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: &str, now: Instant) -> Decision {
        let fresh = || {
            Arc::new(Window {
                started: now,
                count: AtomicU32::new(0),
            })
        };
        let mut entry = self
            .windows
            .get_with(client.to_string(), async { fresh() })
            .await;
        // 缓存尚未淘汰但窗口已结束
        if now >= entry.started + self.window {
            entry = fresh();
            self.windows
                .insert(client.to_string(), Arc::clone(&entry))
                .await;
        }

        let max = self.max_requests;
        let admitted = entry
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok();
        if admitted {
            return Decision::Allowed;
        }
        let remaining = (entry.started + self.window).saturating_duration_since(now);
        let retry_after = (remaining.as_millis().div_ceil(1000) as u64).max(1);
        Decision::Limited { retry_after }
    }
}

/// 客户端标识：X-Real-IP，其次 X-Forwarded-For 的第一项，否则 "unknown"
pub fn client_id(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("x-real-ip")
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}

/// 图片生成路径：`/` 后紧跟数字
pub fn is_image_path(path: &str) -> bool {
    path.strip_prefix('/')
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    error: &'static str,
    message: &'static str,
    retry_after: u64,
    limit: u32,
    window: String,
    docs: String,
}

fn limited_response(limiter: &RateLimiter, retry_after: u64) -> Response {
    let body = RateLimitBody {
        error: "Rate Limit Exceeded",
        message: "Too many requests. Please slow down.",
        retry_after,
        limit: limiter.max_requests,
        window: format!("{} seconds", limiter.window.as_secs()),
        docs: crate::config::docs_url(),
    };
    let reset = chrono::Utc::now().timestamp() + retry_after as i64;

    let mut res = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = res.headers_mut();
    headers.insert("retry-after", HeaderValue::from(retry_after));
    headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.max_requests));
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
    res
}

/// 限流中间件：只作用于图片路径
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !is_image_path(req.uri().path()) {
        return next.run(req).await;
    }
    let client = client_id(req.headers());
    match limiter.check(&client).await {
        Decision::Allowed => next.run(req).await,
        Decision::Limited { retry_after } => {
            tracing::info!("客户端 {} 触发限流，{}s 后重试", client, retry_after);
            limited_response(&limiter, retry_after)
        }
    }
}
