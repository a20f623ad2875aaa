use std::sync::Arc;

use imges_backend::features::image::FontRegistry;
use imges_backend::features::shortlink::ShortlinkStorage;
use imges_backend::features::stats;
use imges_backend::{AppConfig, AppState, ShutdownManager, build_router};

#[tokio::main]
async fn main() {
    // 先加载配置，日志级别取自配置（RUST_LOG 优先）
    if let Err(e) = AppConfig::init_global() {
        eprintln!("Config init failed: {e}");
        std::process::exit(1);
    }
    let config = AppConfig::global();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .init();

    let shutdown_manager = ShutdownManager::new();

    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // 系统字体扫描较慢，放到阻塞线程
    let fonts_config = config.fonts.clone();
    let fonts = match tokio::task::spawn_blocking(move || FontRegistry::new(&fonts_config)).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            tracing::error!("字体初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    let face_count = fonts.database().len();
    if face_count == 0 {
        tracing::warn!("未找到任何系统字体，文字将无法绘制");
    } else {
        tracing::info!("已载入 {} 个字体", face_count);
    }

    let mut app_state = AppState::new(config, fonts);

    let (stats_handle_opt, _stats_storage_opt) = if config.stats.enabled {
        match stats::init_stats(&config.stats).await {
            Ok((h, storage)) => (Some(h), Some(storage)),
            Err(e) => {
                tracing::warn!("统计初始化失败：{}（将继续运行）", e);
                (None, None)
            }
        }
    } else {
        tracing::info!("统计功能已禁用（config.stats.enabled=false）");
        (None, None)
    };
    app_state.stats = stats_handle_opt.clone();

    if config.shortlinks.enabled {
        let storage = match ShortlinkStorage::connect_sqlite(&config.shortlinks.sqlite_path).await {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!("短链存储初始化失败: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = storage.init_schema().await {
            tracing::error!("短链表初始化失败: {}", e);
            std::process::exit(1);
        }
        app_state.shortlinks = Some(Arc::new(storage));
    }

    let app = build_router(app_state, config);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Example: http://{}/800x600/3b82f6/ffffff?text=Hello", addr);
    tracing::info!("Shorten API: http://{}{}/shorten", addr, config.api.prefix);

    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = shutdown_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    // 在途请求处理完毕后再刷新统计缓冲
    if let Some(stats_handle) = stats_handle_opt {
        let timeout = config.shutdown.timeout_duration();
        if let Err(e) = stats_handle.graceful_shutdown(timeout).await {
            tracing::warn!("统计服务关闭失败: {}", e);
        }
    }

    tracing::info!("服务器已优雅关闭");
}
