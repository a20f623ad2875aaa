mod color;
mod effects;
mod encoder;
mod fonts;
pub mod handler;
mod layout;
mod parser;
mod pictograph;
mod renderer;
mod types;

pub use encoder::encode;
pub use fonts::{DEFAULT_FAMILY, FONT_CATALOG, FontCategory, FontEntry, FontRegistry, ResolvedFont};
pub use handler::{create_image_api_router, render_image};
pub use parser::parse_image_request;
pub use pictograph::GlyphFetcher;
pub use renderer::{RenderContext, render_canvas};
pub use types::{
    FontStyle, FontWeight, ImageFormat, ImageRequest, ImageSpec, MAX_DIMENSION, PatternKind,
    RenderOptions, TextAlign,
};
