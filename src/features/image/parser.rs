//! 请求解析与校验：路径段 + 查询参数 → `ImageRequest`，或第一处 `ValidationError`。

use std::collections::HashMap;

use super::color::{generate_random_color, is_valid_hex, normalize_color, split_gradient};
use super::fonts::validate_font;
use super::types::{
    DEFAULT_BACKGROUND, DEFAULT_FOREGROUND, DEFAULT_QUALITY, DEFAULT_SHADOW_COLOR, FontStyle,
    FontWeight, ImageFormat, ImageRequest, ImageSpec, MAX_DIMENSION, PatternKind, RenderOptions,
    TextAlign,
};
use crate::error::{ValidationError, ValidationKind};

const DIMENSIONS_GRAMMAR: &str = "WIDTHxHEIGHT or SIZE, optionally followed by @2x/@3x and .png/.jpg/.jpeg/.webp";
const HEX_GRAMMAR: &str = "3 or 6 hex digits (e.g. fff or 3b82f6), or 'random'";

/// 解析后的尺寸 token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DimensionToken {
    width: u32,
    height: u32,
    scale: u32,
    format: Option<ImageFormat>,
}

/// 解析完整图片请求。`path` 为请求路径（可带前导 `/`），`query` 为已解码的查询参数。
pub fn parse_image_request(
    path: &str,
    query: &HashMap<String, String>,
) -> Result<ImageRequest, ValidationError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let dims = parse_dimension_token(segments.first().copied().unwrap_or(""))?;
    let mut uses_random = false;

    // 背景色（可为渐变）
    let bg_raw = segments.get(1).copied().unwrap_or(DEFAULT_BACKGROUND);
    let (background, background_end) = if bg_raw == "random" {
        uses_random = true;
        (generate_random_color(), None)
    } else if let Some((first, second)) = split_gradient(bg_raw) {
        let start = resolve_color(first, "background-color", &mut uses_random)?;
        let end = resolve_color(second, "gradient-color-2", &mut uses_random)?;
        (start, Some(end))
    } else {
        (resolve_color(bg_raw, "background-color", &mut uses_random)?, None)
    };

    let fg_raw = segments.get(2).copied().unwrap_or(DEFAULT_FOREGROUND);
    let foreground = resolve_color(fg_raw, "foreground-color", &mut uses_random)?;

    let (options, format_override) = parse_query(query, &dims, &foreground)?;
    // 显式的 format 参数优先于扩展名
    let format = format_override.or(dims.format).unwrap_or_default();

    Ok(ImageRequest {
        spec: ImageSpec {
            width: dims.width,
            height: dims.height,
            scale: dims.scale,
            background,
            background_end,
            foreground,
            format,
        },
        options,
        uses_random,
    })
}

/// 尺寸 token：`WxH` 或 `S`，可选 `@Nx` 与 `.ext`
fn parse_dimension_token(token: &str) -> Result<DimensionToken, ValidationError> {
    let malformed = || {
        ValidationError::new(
            ValidationKind::MalformedInput,
            "dimensions",
            format!("Invalid dimensions '{token}'"),
            token,
            DIMENSIONS_GRAMMAR,
        )
        .with_suggestion("/800x600")
    };

    let (base, ext) = match token.rsplit_once('.') {
        Some((base, ext)) => (base, Some(ext)),
        None => (token, None),
    };

    let (dims, scale) = match base.rsplit_once('@') {
        Some((dims, scale_part)) => {
            let digits = scale_part.strip_suffix('x').ok_or_else(malformed)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            // 只支持 1~3 倍，其余数字静默回退为 1
            let scale = match digits.parse::<u32>() {
                Ok(n @ 1..=3) => n,
                _ => 1,
            };
            (dims, scale)
        }
        None => (base, 1),
    };

    let (w_raw, h_raw) = match dims.split_once('x') {
        Some((w, h)) => (w, h),
        None => (dims, dims),
    };
    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_number(w_raw) || !is_number(h_raw) {
        return Err(malformed());
    }

    // 尺寸合法后才检查扩展名
    let format = match ext {
        Some(ext) => Some(ImageFormat::from_token(ext).ok_or_else(|| {
            ValidationError::new(
                ValidationKind::UnsupportedValue,
                "format",
                format!("Unsupported image format '.{ext}'"),
                ext,
                "png, jpeg, jpg or webp",
            )
            .with_suggestion(format!("/{dims}.png"))
        })?),
        None => None,
    };

    // 超长数字饱和为 u32::MAX，随后按越界处理
    let width = w_raw.parse::<u32>().unwrap_or(u32::MAX);
    let height = h_raw.parse::<u32>().unwrap_or(u32::MAX);
    let in_range = |v: u32| (1..=MAX_DIMENSION).contains(&v);
    if !in_range(width) || !in_range(height) {
        let clamp = |v: u32| v.clamp(1, MAX_DIMENSION);
        return Err(ValidationError::new(
            ValidationKind::OutOfRange,
            "dimensions",
            format!("Width and height must be between 1 and {MAX_DIMENSION}"),
            dims,
            format!("1 <= WIDTH, HEIGHT <= {MAX_DIMENSION}"),
        )
        .with_suggestion(format!("/{}x{}", clamp(width), clamp(height))));
    }

    Ok(DimensionToken {
        width,
        height,
        scale,
        format,
    })
}

/// 校验并规范化单个颜色；`random` 生成随机色
fn resolve_color(
    raw: &str,
    field: &str,
    uses_random: &mut bool,
) -> Result<String, ValidationError> {
    if raw == "random" {
        *uses_random = true;
        return Ok(generate_random_color());
    }
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if !is_valid_hex(hex) {
        return Err(ValidationError::new(
            ValidationKind::MalformedInput,
            field,
            format!("Invalid color '{raw}'"),
            raw,
            HEX_GRAMMAR,
        )
        .with_suggestion("3b82f6"));
    }
    Ok(normalize_color(hex))
}

/// 空字符串等同于未提供
fn query_value<'a>(query: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    query
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// 整数参数，范围 [min, max]
fn int_param(
    query: &HashMap<String, String>,
    name: &str,
    min: u32,
    max: u32,
) -> Result<Option<u32>, ValidationError> {
    let Some(raw) = query_value(query, name) else {
        return Ok(None);
    };
    let expected = format!("integer between {min} and {max}");

    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(
            ValidationKind::MalformedInput,
            name,
            format!("'{name}' must be an integer"),
            raw,
            expected,
        )
        .with_suggestion(format!("{name}={min}")));
    }

    let value: i64 = raw.parse().unwrap_or(if raw.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    });
    if value < i64::from(min) || value > i64::from(max) {
        let clamped = value.clamp(i64::from(min), i64::from(max));
        return Err(ValidationError::new(
            ValidationKind::OutOfRange,
            name,
            format!("'{name}' must be between {min} and {max}"),
            raw,
            expected,
        )
        .with_suggestion(format!("{name}={clamped}")));
    }
    Ok(Some(value as u32))
}

/// 枚举参数（大小写不敏感）
fn enum_param<T>(
    query: &HashMap<String, String>,
    name: &str,
    allowed: &[&str],
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ValidationError> {
    let Some(raw) = query_value(query, name) else {
        return Ok(None);
    };
    parse(&raw.to_ascii_lowercase()).map(Some).ok_or_else(|| {
        ValidationError::new(
            ValidationKind::UnsupportedValue,
            name,
            format!("Unsupported value for '{name}'"),
            raw,
            format!("one of {}", allowed.join(", ")),
        )
        .with_suggestion(format!("{name}={}", allowed[0]))
    })
}

/// 颜色参数（可带 `#`）
fn color_param(
    query: &HashMap<String, String>,
    name: &str,
) -> Result<Option<String>, ValidationError> {
    let Some(raw) = query_value(query, name) else {
        return Ok(None);
    };
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if !is_valid_hex(hex) {
        return Err(ValidationError::new(
            ValidationKind::MalformedInput,
            name,
            format!("Invalid color '{raw}' for '{name}'"),
            raw,
            "3 or 6 hex digits (e.g. fff or 3b82f6)",
        )
        .with_suggestion(format!("{name}=000000")));
    }
    Ok(Some(normalize_color(hex)))
}

/// 按固定顺序解析查询参数，第一处错误即返回
fn parse_query(
    query: &HashMap<String, String>,
    dims: &DimensionToken,
    foreground: &str,
) -> Result<(RenderOptions, Option<ImageFormat>), ValidationError> {
    let text = query_value(query, "text")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} × {}", dims.width, dims.height));
    let font = validate_font(query_value(query, "font").unwrap_or("sans-serif"));
    let weight = enum_param(query, "weight", &["normal", "bold"], |v| match v {
        "normal" => Some(FontWeight::Normal),
        "bold" => Some(FontWeight::Bold),
        _ => None,
    })?
    .unwrap_or_default();
    let style = enum_param(query, "style", &["normal", "italic"], |v| match v {
        "normal" => Some(FontStyle::Normal),
        "italic" => Some(FontStyle::Italic),
        _ => None,
    })?
    .unwrap_or_default();
    let align = enum_param(
        query,
        "align",
        &["center", "top", "bottom", "custom"],
        TextAlign::from_token,
    )?
    .unwrap_or_default();
    let custom_y = int_param(query, "y", 0, MAX_DIMENSION)?;
    let border = int_param(query, "border", 0, 100)?.unwrap_or(0);
    let border_color = color_param(query, "borderColor")?.unwrap_or_else(|| foreground.to_string());
    let blur = int_param(query, "blur", 0, 50)?.unwrap_or(0);
    let radius = int_param(query, "radius", 0, 500)?.unwrap_or(0);
    let shadow = int_param(query, "shadow", 0, 100)?.unwrap_or(0);
    let shadow_color =
        color_param(query, "shadowColor")?.unwrap_or_else(|| DEFAULT_SHADOW_COLOR.to_string());
    let noise = int_param(query, "noise", 0, 100)?.unwrap_or(0);
    let pattern = enum_param(
        query,
        "pattern",
        &["dots", "stripes", "checkerboard", "grid"],
        PatternKind::from_token,
    )?;
    let pattern_color =
        color_param(query, "patternColor")?.unwrap_or_else(|| foreground.to_string());
    let quality = int_param(query, "quality", 1, 100)?
        .map(|q| q as u8)
        .unwrap_or(DEFAULT_QUALITY);
    let format = enum_param(
        query,
        "format",
        &["png", "jpeg", "jpg", "webp"],
        ImageFormat::from_token,
    )?;
    let size = int_param(query, "size", 1, 500)?;

    let options = RenderOptions {
        text,
        font,
        weight,
        style,
        align,
        custom_y,
        border,
        border_color,
        blur,
        radius,
        shadow,
        shadow_color,
        noise,
        pattern,
        pattern_color,
        quality,
        size,
    };
    Ok((options, format))
}
