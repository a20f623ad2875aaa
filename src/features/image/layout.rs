//! 文本排版：拆行、基线计算、文字/图元混排定位，以及生成交给 resvg 渲染的文字层 SVG。

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use axum::body::Bytes;
use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use resvg::usvg::{self, Options as UsvgOptions, fontdb};

use super::pictograph::segment_line;
use super::types::{FontStyle, FontWeight, TextAlign, TextSegment};
use crate::config::AppConfig;
use crate::error::AppError;

/// 行距系数
pub const LINE_HEIGHT: f32 = 1.2;
/// 图元边长相对字号的比例
pub const PICTOGRAPH_RATIO: f32 = 1.1;

/// 按字面量 `\n` 或真实换行拆行
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split("\\n").flat_map(|part| part.split('\n')).collect()
}

/// 字号：显式 `size` 乘以缩放倍数，否则取缩放后短边的 1/10
pub fn resolve_font_size(size: Option<u32>, scale: u32, width_px: u32, height_px: u32) -> f32 {
    match size {
        Some(size) => (size * scale) as f32,
        None => width_px.min(height_px) as f32 / 10.0,
    }
}

/// 第一行的基线 Y
pub fn first_baseline(
    align: TextAlign,
    custom_y: Option<u32>,
    scale: u32,
    height_px: f32,
    font_size: f32,
    line_count: usize,
) -> f32 {
    let lines = line_count as f32;
    match (align, custom_y) {
        (TextAlign::Custom, Some(y)) => (y * scale) as f32,
        (TextAlign::Top, _) => font_size * 1.5,
        (TextAlign::Bottom, _) => height_px - font_size * (lines + 0.5),
        // center，以及未给出 y 的 custom
        _ => height_px / 2.0 - (lines - 1.0) * font_size * LINE_HEIGHT / 2.0,
    }
}

/// 文字层中的一个可绘制元素
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// 左对齐文字，`y` 为中线
    Text { x: f32, y: f32, content: String },
    /// 图元 PNG，(x, y) 为左上角
    Glyph { x: f32, y: f32, size: f32, png: Bytes },
}

/// 文本中所有图元的地址（去重、保持出现顺序），用于渲染前预取
pub fn pictograph_urls(text: &str, base_url: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for line in split_lines(text) {
        for segment in segment_line(line, base_url) {
            if let TextSegment::Pictograph { url, .. } = segment
                && !urls.contains(&url)
            {
                urls.push(url);
            }
        }
    }
    urls
}

/// 逐行排版。
///
/// 行宽 = 文字片段实测宽度之和 + 图元数 × 图元边长，整行水平居中。
/// 图元未能获取时改画原字符，并按其实测宽度前进。
pub fn layout_lines(
    lines: &[&str],
    width_px: f32,
    baseline: f32,
    font_size: f32,
    base_url: &str,
    glyphs: &HashMap<String, Bytes>,
    measure: impl Fn(&str) -> f32,
) -> Vec<Placement> {
    let glyph_size = font_size * PICTOGRAPH_RATIO;
    let mut placements = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let y = baseline + index as f32 * font_size * LINE_HEIGHT;
        let segments = segment_line(line, base_url);

        let total: f32 = segments
            .iter()
            .map(|segment| match segment {
                TextSegment::Literal(text) => measure(text),
                TextSegment::Pictograph { .. } => glyph_size,
            })
            .sum();
        let mut x = width_px / 2.0 - total / 2.0;

        for segment in segments {
            match segment {
                TextSegment::Literal(content) => {
                    let advance = measure(&content);
                    placements.push(Placement::Text { x, y, content });
                    x += advance;
                }
                TextSegment::Pictograph { content, url } => match glyphs.get(&url) {
                    Some(png) => {
                        placements.push(Placement::Glyph {
                            x,
                            y: y - glyph_size / 2.0,
                            size: glyph_size,
                            png: png.clone(),
                        });
                        x += glyph_size;
                    }
                    None => {
                        let advance = measure(&content);
                        placements.push(Placement::Text { x, y, content });
                        x += advance;
                    }
                },
            }
        }
    }
    placements
}

/// 文字样式
#[derive(Debug, Clone)]
pub struct TextStyle {
    /// 已解析的 font-family（具体字体名或通用族）
    pub family: String,
    pub size: f32,
    pub weight: FontWeight,
    pub style: FontStyle,
    /// 6 位十六进制，不带 `#`
    pub fill: String,
}

impl TextStyle {
    /// font-family 属性值：具体字体后追加 sans-serif 兜底
    fn family_attr(&self) -> String {
        match self.family.as_str() {
            "sans-serif" | "serif" | "monospace" => self.family.clone(),
            name => format!("'{}', sans-serif", name.replace('\'', "")),
        }
    }

    fn text_attrs(&self) -> String {
        format!(
            r#"font-family="{}" font-size="{:.2}" font-weight="{}" font-style="{}""#,
            escape_xml(&self.family_attr()),
            self.size,
            self.weight.as_str(),
            self.style.as_str(),
        )
    }
}

/// 生成文字层 SVG（透明背景，尺寸与画布一致）
pub fn overlay_svg(
    width: u32,
    height: u32,
    placements: &[Placement],
    style: &TextStyle,
) -> Result<String, AppError> {
    let fmt_err =
        |e: std::fmt::Error| AppError::ImageRendererError(format!("SVG formatting error: {e}"));
    let attrs = style.text_attrs();

    let mut svg = String::with_capacity(1024);
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    )
    .map_err(fmt_err)?;

    for placement in placements {
        match placement {
            Placement::Text { x, y, content } => {
                if content.is_empty() {
                    continue;
                }
                writeln!(
                    svg,
                    r##"<text x="{x:.2}" y="{y:.2}" {attrs} fill="#{}" dominant-baseline="middle" xml:space="preserve">{}</text>"##,
                    style.fill,
                    escape_xml(content),
                )
                .map_err(fmt_err)?;
            }
            Placement::Glyph { x, y, size, png } => {
                writeln!(
                    svg,
                    r#"<image x="{x:.2}" y="{y:.2}" width="{size:.2}" height="{size:.2}" preserveAspectRatio="none" xlink:href="data:image/png;base64,{}"/>"#,
                    base64_engine.encode(png),
                )
                .map_err(fmt_err)?;
            }
        }
    }

    svg.push_str("</svg>\n");
    Ok(svg)
}

/// 渲染文字层用的 usvg 选项
pub fn usvg_options(fontdb: Arc<fontdb::Database>) -> UsvgOptions<'static> {
    let speed = AppConfig::try_global()
        .map(|c| c.image.optimize_speed)
        .unwrap_or(false);
    UsvgOptions {
        fontdb,
        font_resolver: super::fonts::font_resolver(),
        font_family: super::fonts::DEFAULT_FAMILY.to_string(),
        text_rendering: if speed {
            usvg::TextRendering::OptimizeSpeed
        } else {
            usvg::TextRendering::OptimizeLegibility
        },
        image_rendering: if speed {
            usvg::ImageRendering::OptimizeSpeed
        } else {
            usvg::ImageRendering::OptimizeQuality
        },
        ..Default::default()
    }
}

/// 用 usvg 实际排版来测量文字宽度
pub struct TextMeasurer<'a> {
    options: &'a UsvgOptions<'static>,
    attrs: String,
    size: f32,
    /// "xx" 的墨迹宽度，作为减除基准
    pair_width: Option<f32>,
}

impl<'a> TextMeasurer<'a> {
    pub fn new(options: &'a UsvgOptions<'static>, style: &TextStyle) -> Self {
        let mut measurer = Self {
            options,
            attrs: style.text_attrs(),
            size: style.size,
            pair_width: None,
        };
        measurer.pair_width = measurer.ink_width("xx");
        measurer
    }

    /// 文字前进宽度：bbox("x" + run + "x") − bbox("xx")，首尾空白也计入
    pub fn measure(&self, run: &str) -> f32 {
        if run.is_empty() {
            return 0.0;
        }
        let padded = format!("x{run}x");
        match (self.ink_width(&padded), self.pair_width) {
            (Some(total), Some(pair)) => (total - pair).max(0.0),
            _ => estimate_width(run, self.size),
        }
    }

    fn ink_width(&self, text: &str) -> Option<f32> {
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"><text x="0" y="0" {} xml:space="preserve">{}</text></svg>"#,
            self.attrs,
            escape_xml(text),
        );
        let tree = usvg::Tree::from_data(svg.as_bytes(), self.options).ok()?;
        let width = tree.root().abs_bounding_box().width();
        (width.is_finite() && width > 0.0).then_some(width)
    }
}

/// 没有可用字体时的估算：全角字符按一个字号，其余按 0.55 个字号
pub fn estimate_width(text: &str, size: f32) -> f32 {
    fn is_full_width(ch: char) -> bool {
        ('\u{4E00}'..='\u{9FFF}').contains(&ch)
            || ('\u{3040}'..='\u{30FF}').contains(&ch)
            || ('\u{FF00}'..='\u{FFEF}').contains(&ch)
    }
    text.chars()
        .map(|ch| if is_full_width(ch) { size } else { size * 0.55 })
        .sum()
}

/// XML 1.0 不允许出现的字符（保留制表符与换行）
fn is_xml_char(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r')
        || ('\u{20}'..='\u{D7FF}').contains(&ch)
        || ('\u{E000}'..='\u{FFFD}').contains(&ch)
        || ch >= '\u{10000}'
}

/// 转义并丢弃非法字符，保证生成的 SVG 总能被解析
fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars().filter(|c| is_xml_char(*c)) {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
