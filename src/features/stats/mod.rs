pub mod models;
pub mod storage;

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};

use crate::{config::StatsConfig, error::AppError};
use models::ImageEvent;
use storage::StatsStorage;

/// 统计服务句柄：对外只暴露异步上报通道与优雅关闭
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<ImageEvent>,
    own_hosts: Arc<[String]>,
    shutdown_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl StatsHandle {
    /// 上报一次图片生成。来自本站页面的请求不计入；队列已满则丢弃，不阻塞主流程
    pub fn track(&self, evt: ImageEvent) {
        if evt
            .referrer
            .as_deref()
            .is_some_and(|r| is_own_site(r, &self.own_hosts))
        {
            tracing::debug!("跳过本站来源的统计事件");
            return;
        }
        if self.tx.try_send(evt).is_err() {
            tracing::debug!("统计队列已满或已关闭，事件被丢弃");
        }
    }

    /// 优雅关闭统计服务，等待缓冲中的事件写入完成
    pub async fn graceful_shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        tracing::info!("开始关闭统计服务，超时时间: {:?}", timeout);
        let _ = self.shutdown_tx.send(true);

        let mut rx = self.done_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(_) => {
                tracing::info!("统计服务已关闭");
                Ok(())
            }
            Err(_) => Err(AppError::Internal("统计服务关闭超时".into())),
        }
    }
}

/// Referer 的主机是否属于本站。以 `.` 开头的条目按后缀匹配（如 `.railway.app`）
pub fn is_own_site(referrer: &str, own_hosts: &[String]) -> bool {
    let Ok(url) = reqwest::Url::parse(referrer) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    own_hosts.iter().any(|own| {
        if own.starts_with('.') {
            host.ends_with(own.as_str())
        } else {
            host.eq_ignore_ascii_case(own)
        }
    })
}

async fn flush(storage: &StatsStorage, buf: &mut Vec<ImageEvent>, stage: &str) {
    if buf.is_empty() {
        return;
    }
    if let Err(e) = storage.insert_events(buf).await {
        tracing::warn!("stats {} failed: {}", stage, e);
    }
    buf.clear();
}

/// 初始化统计服务：创建 SQLite 并 spawn 批量写入任务
pub async fn init_stats(
    config: &StatsConfig,
) -> Result<(StatsHandle, Arc<StatsStorage>), AppError> {
    let storage =
        Arc::new(StatsStorage::connect_sqlite(&config.sqlite_path, config.sqlite_wal).await?);
    storage.init_schema().await?;

    let batch_size = config.batch_size.max(1);
    let (tx, mut rx) = mpsc::channel::<ImageEvent>(batch_size * 10);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);
    let writer_storage = storage.clone();
    let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));

    tokio::spawn(async move {
        let mut buf: Vec<ImageEvent> = Vec::with_capacity(batch_size);
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // 收到关闭信号：取完通道中剩余事件后刷新并退出
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        while let Ok(evt) = rx.try_recv() {
                            buf.push(evt);
                            if buf.len() >= batch_size {
                                flush(&writer_storage, &mut buf, "final batch insert").await;
                            }
                        }
                        flush(&writer_storage, &mut buf, "final flush").await;
                        break;
                    }
                }
                result = rx.recv() => {
                    match result {
                        Some(evt) => {
                            buf.push(evt);
                            if buf.len() >= batch_size {
                                flush(&writer_storage, &mut buf, "insert batch").await;
                            }
                        }
                        None => {
                            tracing::info!("统计事件通道关闭，处理剩余事件...");
                            flush(&writer_storage, &mut buf, "final flush").await;
                            break;
                        }
                    }
                }
                // 定时刷新
                _ = ticker.tick() => {
                    flush(&writer_storage, &mut buf, "periodic flush").await;
                }
            }
        }
        tracing::info!("统计事件处理完成");
        let _ = done_tx.send(true);
    });

    let handle = StatsHandle {
        tx,
        own_hosts: config.own_hosts.clone().into(),
        shutdown_tx,
        done_rx,
    };
    Ok((handle, storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(referrer: Option<&str>) -> ImageEvent {
        ImageEvent {
            ts_utc: Utc::now(),
            width: 800,
            height: 600,
            bg_color: "cccccc".into(),
            fg_color: "333333".into(),
            format: "png".into(),
            has_text: true,
            has_border: false,
            has_blur: false,
            has_pattern: false,
            has_gradient: false,
            has_custom_font: false,
            query_json: None,
            user_agent: Some("test".into()),
            referrer: referrer.map(str::to_string),
        }
    }

    #[test]
    fn own_site_matching() {
        let hosts = vec!["imges.dev".to_string(), ".railway.app".to_string()];
        assert!(is_own_site("https://imges.dev/examples", &hosts));
        assert!(is_own_site("https://staging.railway.app/", &hosts));
        assert!(!is_own_site("https://blog.example.com/post", &hosts));
        assert!(!is_own_site("not a url", &hosts));
    }

    #[tokio::test]
    async fn shutdown_flushes_buffered_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StatsConfig {
            enabled: true,
            sqlite_path: dir.path().join("a.db").to_string_lossy().into_owned(),
            sqlite_wal: false,
            batch_size: 100,
            flush_interval_ms: 60_000,
            own_hosts: vec!["imges.dev".to_string()],
        };
        let (handle, storage) = init_stats(&config).await.expect("init");

        handle.track(event(None));
        handle.track(event(Some("https://other.example/")));
        handle.track(event(Some("https://imges.dev/builder")));
        handle
            .graceful_shutdown(Duration::from_secs(5))
            .await
            .expect("shutdown");

        assert_eq!(storage.count_events().await.expect("count"), 2);
    }
}
