use serde::{Deserialize, Serialize};

/// 画布边长上限（缩放前）
pub const MAX_DIMENSION: u32 = 4000;
/// 默认背景色
pub const DEFAULT_BACKGROUND: &str = "cccccc";
/// 默认前景色
pub const DEFAULT_FOREGROUND: &str = "333333";
/// 默认阴影颜色
pub const DEFAULT_SHADOW_COLOR: &str = "000000";
/// 有损编码默认质量
pub const DEFAULT_QUALITY: u8 = 90;

/// 输出图片格式
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, utoipa::ToSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG（默认，无损）
    #[default]
    Png,
    /// JPEG（有损，无透明通道）
    Jpeg,
    /// WebP（有损）
    Webp,
}

impl ImageFormat {
    /// 解析扩展名或 `format` 参数（大小写不敏感，`jpg` 视为 `jpeg`）
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }
}

/// 文本纵向对齐方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextAlign {
    Top,
    #[default]
    Center,
    Bottom,
    /// 使用 `y` 参数指定基线；未给出 `y` 时按居中处理
    Custom,
}

impl TextAlign {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "top" => Some(Self::Top),
            "center" => Some(Self::Center),
            "bottom" => Some(Self::Bottom),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

impl FontWeight {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Bold => "bold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

impl FontStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Italic => "italic",
        }
    }
}

/// 背景纹理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Dots,
    Stripes,
    Checkerboard,
    Grid,
}

impl PatternKind {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "dots" => Some(Self::Dots),
            "stripes" => Some(Self::Stripes),
            "checkerboard" => Some(Self::Checkerboard),
            "grid" => Some(Self::Grid),
            _ => None,
        }
    }
}

/// 画布规格：尺寸、缩放、颜色与输出格式。
///
/// 颜色一律保存为 6 位小写十六进制、不带 `#`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    /// 1、2 或 3
    pub scale: u32,
    pub background: String,
    /// 存在时背景为 (0,0)→(W,H) 的线性渐变
    pub background_end: Option<String>,
    pub foreground: String,
    pub format: ImageFormat,
}

impl ImageSpec {
    /// 实际栅格宽度
    pub fn pixel_width(&self) -> u32 {
        self.width * self.scale
    }

    /// 实际栅格高度
    pub fn pixel_height(&self) -> u32 {
        self.height * self.scale
    }
}

/// 可选渲染参数，默认值见各字段说明
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderOptions {
    /// 文本，字面量 `\n` 或真实换行都会拆行；默认 "{W} × {H}"
    pub text: String,
    /// 规范化后的字体键；默认 `sans-serif`
    pub font: String,
    pub weight: FontWeight,
    pub style: FontStyle,
    pub align: TextAlign,
    /// 自定义基线（缩放前像素）
    pub custom_y: Option<u32>,
    /// 边框宽度，0 表示无边框
    pub border: u32,
    /// 默认前景色
    pub border_color: String,
    pub blur: u32,
    /// 圆角半径
    pub radius: u32,
    pub shadow: u32,
    pub shadow_color: String,
    pub noise: u32,
    pub pattern: Option<PatternKind>,
    /// 默认前景色
    pub pattern_color: String,
    /// 1..=100，PNG 忽略
    pub quality: u8,
    /// 字号（缩放前）；缺省时按 min(W,H)/10 自动计算
    pub size: Option<u32>,
}

/// 解析完成的完整图片请求
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    pub spec: ImageSpec,
    pub options: RenderOptions,
    /// 任一颜色来自 `random`；此类请求不进入成品缓存
    pub uses_random: bool,
}

impl ImageRequest {
    /// 规范化缓存键：同一键必然渲染出逐字节相同的结果
    pub fn cache_key(&self) -> String {
        let s = &self.spec;
        let o = &self.options;
        format!(
            "{}x{}@{}|{}|{}|{}|{}|{:?}|{}|{}|{:?}|{:?}|{}|{}|{}|{}|{}|{}|{}|{:?}|{}|{}|{:?}",
            s.width,
            s.height,
            s.scale,
            s.background,
            s.background_end.as_deref().unwrap_or("-"),
            s.foreground,
            s.format.as_str(),
            o.text,
            o.font,
            o.weight.as_str(),
            o.style,
            o.align,
            o.custom_y.map(|y| y.to_string()).unwrap_or_default(),
            o.border,
            o.border_color,
            o.blur,
            o.radius,
            o.shadow,
            o.shadow_color,
            o.pattern,
            o.pattern_color,
            o.noise,
            (o.quality, o.size),
        )
    }
}

/// 文本片段：普通文字或表情图元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSegment {
    Literal(String),
    Pictograph {
        /// 原始字符簇
        content: String,
        /// 图元 PNG 地址
        url: String,
    },
}
