use once_cell::sync::OnceCell;
use reqwest::Client;
use std::time::Duration;

/// 全局复用的 HTTP Client（统一连接池/Keep-Alive），避免每次请求重复创建。
///
/// 说明：
/// - 字体与表情图元回源共用同一个连接池，各调用点再用 `RequestBuilder::timeout` 收紧单次超时。
/// - `Client` 本身是线程安全的，适合全局复用。
static CLIENT_ASSETS: OnceCell<Client> = OnceCell::new();

/// 外部静态资源（字体样式表/字体文件/图元 PNG）使用的 HTTP Client，上限 10s。
pub fn client_assets() -> Result<&'static Client, reqwest::Error> {
    CLIENT_ASSETS.get_or_try_init(|| {
        Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("imges-backend/", env!("CARGO_PKG_VERSION")))
            .build()
    })
}
