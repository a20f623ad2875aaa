pub mod handler;
pub mod storage;

pub use handler::{create_redirect_router, create_shortlink_api_router};
pub use storage::{ShortLink, ShortlinkStorage};
