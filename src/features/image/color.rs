//! 颜色解析：十六进制校验与规范化、渐变拆分、随机色生成。

use rand::Rng;

/// 恰好 3 或 6 位十六进制数字（大小写不敏感）
pub fn is_valid_hex(color: &str) -> bool {
    matches!(color.len(), 3 | 6) && color.bytes().all(|b| b.is_ascii_hexdigit())
}

/// 去掉前导 `#`，3 位展开为 6 位，并转为小写
pub fn normalize_color(color: &str) -> String {
    let c = color.strip_prefix('#').unwrap_or(color);
    if c.len() == 3 {
        c.chars()
            .flat_map(|ch| [ch, ch])
            .collect::<String>()
            .to_ascii_lowercase()
    } else {
        c.to_ascii_lowercase()
    }
}

/// 按第一个 `-` 拆分渐变写法 `COLOR1-COLOR2`；两侧都不能为空
pub fn split_gradient(segment: &str) -> Option<(&str, &str)> {
    let (first, second) = segment.split_once('-')?;
    if first.is_empty() || second.is_empty() {
        return None;
    }
    Some((first, second))
}

/// HSL（h: 度，s/l: 百分比）转 6 位十六进制
pub fn hsl_to_hex(h: f64, s: f64, l: f64) -> String {
    let l = l / 100.0;
    let a = s * l.min(1.0 - l) / 100.0;
    let channel = |n: f64| -> u8 {
        let k = (n + h / 30.0) % 12.0;
        let color = l - a * (k - 3.0).min(9.0 - k).min(1.0).max(-1.0);
        (255.0 * color).round().clamp(0.0, 255.0) as u8
    };
    format!("{:02x}{:02x}{:02x}", channel(0.0), channel(8.0), channel(4.0))
}

/// 生成饱和度适中、偏亮的随机颜色
pub fn generate_random_color() -> String {
    let mut rng = rand::thread_rng();
    let hue = rng.gen_range(0..360);
    let saturation = rng.gen_range(60..80);
    let lightness = rng.gen_range(50..70);
    hsl_to_hex(hue as f64, saturation as f64, lightness as f64)
}

/// 将规范化后的 6 位色值转为 RGB 分量
pub fn hex_to_rgb(color: &str) -> (u8, u8, u8) {
    let c = normalize_color(color);
    let channel = |i: usize| {
        c.get(i..i + 2)
            .and_then(|v| u8::from_str_radix(v, 16).ok())
            .unwrap_or(0)
    };
    (channel(0), channel(2), channel(4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_validator_accepts_only_three_or_six_digits() {
        for ok in ["fff", "FFF", "3b82f6", "3B82F6", "a1B"] {
            assert!(is_valid_hex(ok), "{ok} 应该合法");
        }
        for bad in ["", "ff", "ffff", "fffff", "fffffff", "ggg", "#fff", "12345g"] {
            assert!(!is_valid_hex(bad), "{bad} 应该非法");
        }
    }

    #[test]
    fn normalize_expands_and_lowercases() {
        assert_eq!(normalize_color("ABC"), "aabbcc");
        assert_eq!(normalize_color("#3B82F6"), "3b82f6");
        assert_eq!(normalize_color("#f0f"), "ff00ff");
    }

    #[test]
    fn gradient_splits_on_first_dash() {
        assert_eq!(split_gradient("aaa-bbb"), Some(("aaa", "bbb")));
        assert_eq!(split_gradient("aaa-random"), Some(("aaa", "random")));
        assert_eq!(split_gradient("aaa-bbb-ccc"), Some(("aaa", "bbb-ccc")));
        assert_eq!(split_gradient("aaa"), None);
        assert_eq!(split_gradient("-bbb"), None);
    }

    #[test]
    fn hsl_conversion_matches_reference_points() {
        assert_eq!(hsl_to_hex(0.0, 100.0, 50.0), "ff0000");
        assert_eq!(hsl_to_hex(120.0, 100.0, 50.0), "00ff00");
        assert_eq!(hsl_to_hex(240.0, 100.0, 50.0), "0000ff");
        assert_eq!(hsl_to_hex(0.0, 0.0, 100.0), "ffffff");
        assert_eq!(hsl_to_hex(0.0, 0.0, 0.0), "000000");
    }

    #[test]
    fn random_colors_are_valid_hex() {
        for _ in 0..64 {
            let c = generate_random_color();
            assert!(is_valid_hex(&c));
            assert_eq!(c.len(), 6);
        }
    }

    #[test]
    fn rgb_components() {
        assert_eq!(hex_to_rgb("3b82f6"), (0x3b, 0x82, 0xf6));
        assert_eq!(hex_to_rgb("fff"), (255, 255, 255));
    }
}
