use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use resvg::usvg::{self, fontdb};
use sha2::{Digest, Sha256};
use tiny_skia::{
    Color, FillRule, GradientStop, LinearGradient, Paint, Pixmap, PixmapPaint, Point, SpreadMode,
    Stroke, Transform,
};

use super::color::hex_to_rgb;
use super::effects::{apply_noise, blur_rgba8_premul, draw_pattern, rect_path};
use super::layout::{
    TextMeasurer, TextStyle, first_baseline, layout_lines, overlay_svg, resolve_font_size,
    split_lines, usvg_options,
};
use super::types::ImageRequest;
use crate::error::AppError;

/// 单次渲染所需的外部资源（均已在异步阶段准备好，渲染本身不再等待网络）
pub struct RenderContext {
    /// 字体数据库快照
    pub fontdb: Arc<fontdb::Database>,
    /// 已解析的 font-family
    pub font_family: String,
    /// 图元地址 → PNG 字节；缺失的图元按文字绘制
    pub glyphs: HashMap<String, Bytes>,
    pub pictograph_base_url: String,
}

fn color(hex: &str) -> Color {
    let (r, g, b) = hex_to_rgb(hex);
    Color::from_rgba8(r, g, b, 255)
}

fn solid_paint(hex: &str) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color(hex));
    paint.anti_alias = true;
    paint
}

/// 噪点种子：由规范化请求派生，同一请求总是得到同样的噪点
fn noise_seed(req: &ImageRequest) -> u64 {
    let digest = Sha256::digest(req.cache_key().as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

/// 按固定顺序合成画布：阴影 → 背景填充 → 模糊 → 纹理 → 噪点 → 边框 → 文字
pub fn render_canvas(req: &ImageRequest, ctx: &RenderContext) -> Result<Pixmap, AppError> {
    let t0 = std::time::Instant::now();
    let spec = &req.spec;
    let opts = &req.options;
    let scale = spec.scale;
    let (w, h) = (spec.pixel_width(), spec.pixel_height());
    let (wf, hf) = (w as f32, h as f32);

    let mut pixmap = Pixmap::new(w, h)
        .ok_or_else(|| AppError::ImageRendererError("Failed to create pixmap".to_string()))?;

    let radius = (opts.radius * scale) as f32;
    let fill_path = rect_path(0.0, 0.0, wf, hf, radius)
        .ok_or_else(|| AppError::ImageRendererError("Failed to build fill path".to_string()))?;

    // 背景：纯色或 (0,0)→(W,H) 的两端线性渐变
    let mut fill_paint = solid_paint(&spec.background);
    if let Some(end) = &spec.background_end {
        fill_paint.shader = LinearGradient::new(
            Point::from_xy(0.0, 0.0),
            Point::from_xy(wf, hf),
            vec![
                GradientStop::new(0.0, color(&spec.background)),
                GradientStop::new(1.0, color(end)),
            ],
            SpreadMode::Pad,
            Transform::identity(),
        )
        .ok_or_else(|| AppError::ImageRendererError("Failed to build gradient".to_string()))?;
    }

    // 阴影只作用于背景填充：单独图层绘制、偏移、模糊后垫在填充下面
    if opts.shadow > 0 {
        let size = (opts.shadow * scale) as f32;
        let mut layer = Pixmap::new(w, h).ok_or_else(|| {
            AppError::ImageRendererError("Failed to create shadow layer".to_string())
        })?;
        layer.fill_path(
            &fill_path,
            &solid_paint(&opts.shadow_color),
            FillRule::Winding,
            Transform::from_translate(size / 2.0, size / 2.0),
            None,
        );
        blur_rgba8_premul(layer.data_mut(), w, h, size / 2.0);
        pixmap.draw_pixmap(
            0,
            0,
            layer.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }
    pixmap.fill_path(
        &fill_path,
        &fill_paint,
        FillRule::Winding,
        Transform::identity(),
        None,
    );
    let t_fill = t0.elapsed();

    if opts.blur > 0 {
        blur_rgba8_premul(pixmap.data_mut(), w, h, (opts.blur * scale) as f32);
    }

    if let Some(kind) = opts.pattern {
        draw_pattern(&mut pixmap, kind, &solid_paint(&opts.pattern_color));
    }

    apply_noise(&mut pixmap, opts.noise, noise_seed(req));

    if opts.border > 0 {
        let border = (opts.border * scale) as f32;
        let paint = solid_paint(&opts.border_color);
        let (inner_w, inner_h) = (wf - border, hf - border);
        match rect_path(border / 2.0, border / 2.0, inner_w, inner_h, radius) {
            Some(path) => {
                let stroke = Stroke {
                    width: border,
                    ..Stroke::default()
                };
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
            // 边框宽度不小于画布边长时整幅都是边框
            None => {
                let t = Transform::identity();
                pixmap.fill_path(&fill_path, &paint, FillRule::Winding, t, None);
            }
        }
    }
    let t_effects = t0.elapsed();

    draw_text(&mut pixmap, req, ctx)?;
    let t_text = t0.elapsed();

    tracing::debug!(
        target: "imges_backend::render",
        "画布合成分段: 填充={:?}, 效果={:?}, 文字={:?}, 总计={:?}",
        t_fill,
        t_effects - t_fill,
        t_text - t_effects,
        t_text
    );

    Ok(pixmap)
}

/// 文字层：排版后生成 SVG，交给 resvg 叠加到画布上
fn draw_text(pixmap: &mut Pixmap, req: &ImageRequest, ctx: &RenderContext) -> Result<(), AppError> {
    let spec = &req.spec;
    let opts = &req.options;
    let (w, h) = (spec.pixel_width(), spec.pixel_height());

    let lines = split_lines(&opts.text);
    let font_size = resolve_font_size(opts.size, spec.scale, w, h);
    let baseline = first_baseline(
        opts.align,
        opts.custom_y,
        spec.scale,
        h as f32,
        font_size,
        lines.len(),
    );
    let style = TextStyle {
        family: ctx.font_family.clone(),
        size: font_size,
        weight: opts.weight,
        style: opts.style,
        fill: spec.foreground.clone(),
    };

    let options = usvg_options(ctx.fontdb.clone());
    let measurer = TextMeasurer::new(&options, &style);
    let placements = layout_lines(
        &lines,
        w as f32,
        baseline,
        font_size,
        &ctx.pictograph_base_url,
        &ctx.glyphs,
        |run| measurer.measure(run),
    );
    if placements.is_empty() {
        return Ok(());
    }

    let svg = overlay_svg(w, h, &placements, &style)?;
    let tree = usvg::Tree::from_data(svg.as_bytes(), &options)
        .map_err(|e| AppError::ImageRendererError(format!("Failed to parse SVG: {e}")))?;
    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::image::parser::parse_image_request;

    fn ctx() -> RenderContext {
        RenderContext {
            fontdb: Arc::new(fontdb::Database::new()),
            font_family: "sans-serif".to_string(),
            glyphs: HashMap::new(),
            pictograph_base_url: "https://cdn.example/72x72".to_string(),
        }
    }

    fn request(path: &str, query: &[(&str, &str)]) -> ImageRequest {
        let query = query
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        parse_image_request(path, &query).expect("valid request")
    }

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> (u8, u8, u8, u8) {
        let c = pixmap.pixel(x, y).expect("in bounds").demultiply();
        (c.red(), c.green(), c.blue(), c.alpha())
    }

    #[test]
    fn raster_dimensions_follow_scale() {
        for (path, dims) in [("/40x30", (40, 30)), ("/40x30@2x", (80, 60)), ("/25@3x", (75, 75))] {
            let pixmap = render_canvas(&request(path, &[]), &ctx()).expect("render");
            assert_eq!((pixmap.width(), pixmap.height()), dims, "{path}");
        }
    }

    #[test]
    fn solid_background_fills_canvas() {
        let req = request("/20x20/3b82f6", &[("text", " ")]);
        let pixmap = render_canvas(&req, &ctx()).expect("render");
        assert_eq!(pixel(&pixmap, 0, 0), (0x3b, 0x82, 0xf6, 255));
        assert_eq!(pixel(&pixmap, 19, 19), (0x3b, 0x82, 0xf6, 255));
    }

    #[test]
    fn gradient_runs_corner_to_corner() {
        let req = request("/50x50/000-fff", &[("text", " ")]);
        let pixmap = render_canvas(&req, &ctx()).expect("render");
        let (r0, ..) = pixel(&pixmap, 0, 0);
        let (r1, ..) = pixel(&pixmap, 49, 49);
        assert!(r0 < 16 && r1 > 240, "{r0} -> {r1}");
    }

    #[test]
    fn radius_leaves_corners_transparent() {
        let req = request("/40x40", &[("radius", "10"), ("text", " ")]);
        let pixmap = render_canvas(&req, &ctx()).expect("render");
        assert_eq!(pixel(&pixmap, 0, 0).3, 0);
        assert_eq!(pixel(&pixmap, 20, 20).3, 255);
    }

    #[test]
    fn border_is_drawn_inside_edges() {
        let pixmap = render_canvas(
            &request("/40x40/ffffff", &[("border", "4"), ("borderColor", "ff0000"), ("text", " ")]),
            &ctx(),
        )
        .expect("render");
        assert_eq!(pixel(&pixmap, 1, 20), (255, 0, 0, 255));
        assert_eq!(pixel(&pixmap, 20, 20), (255, 255, 255, 255));
    }

    #[test]
    fn identical_requests_render_identically() {
        let req = request("/64x48/fff/000", &[("noise", "25"), ("pattern", "grid"), ("blur", "2")]);
        let a = render_canvas(&req, &ctx()).expect("render a");
        let b = render_canvas(&req, &ctx()).expect("render b");
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn shadow_shows_outside_rounded_fill_on_offset_side() {
        let req = request(
            "/40x40/ffffff",
            &[("radius", "10"), ("shadow", "8"), ("shadowColor", "ff0000"), ("text", " ")],
        );
        let pixmap = render_canvas(&req, &ctx()).expect("render");

        // 右下角在圆角填充之外，只剩偏移后的阴影
        let (r, g, b, a) = pixel(&pixmap, 39, 39);
        assert!(a > 0, "shadow alpha {a}");
        assert!(r > g && r > b, "({r},{g},{b})");
        // 左上角远离阴影
        assert!(pixel(&pixmap, 0, 0).3 < a);
        // 填充本身不受阴影影响
        assert_eq!(pixel(&pixmap, 20, 20), (255, 255, 255, 255));
    }

    #[test]
    fn oversized_border_covers_whole_canvas() {
        let req = request(
            "/50x50/ffffff",
            &[("border", "100"), ("borderColor", "00ff00"), ("text", " ")],
        );
        let pixmap = render_canvas(&req, &ctx()).expect("render");
        assert_eq!(pixel(&pixmap, 25, 25), (0, 255, 0, 255));
        assert_eq!(pixel(&pixmap, 0, 49), (0, 255, 0, 255));
    }

    #[test]
    fn control_characters_in_text_still_render() {
        let req = request("/100x50", &[("text", "a\u{1}b\u{1F}c")]);
        let pixmap = render_canvas(&req, &ctx()).expect("render");
        assert_eq!((pixmap.width(), pixmap.height()), (100, 50));
    }

    #[test]
    fn text_with_installed_face_is_centered() {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        let Some(family) = db
            .faces()
            .find_map(|f| f.families.first().map(|(name, _)| name.clone()))
        else {
            eprintln!("no system font available, skipping");
            return;
        };
        let ctx = RenderContext {
            fontdb: Arc::new(db),
            font_family: family,
            ..ctx()
        };
        let req = request("/240x60/ffffff/000000", &[("text", "HHHH"), ("size", "24")]);
        let pixmap = render_canvas(&req, &ctx).expect("render");

        let dark: Vec<u32> = (0..240u32)
            .filter(|&x| (0..60u32).any(|y| pixel(&pixmap, x, y).0 < 128))
            .collect();
        let (Some(&left), Some(&right)) = (dark.first(), dark.last()) else {
            eprintln!("face drew no ink, skipping");
            return;
        };
        let center = (left + right) as f32 / 2.0;
        assert!((center - 120.0).abs() <= 4.0, "ink spans {left}..{right}");
    }
}
