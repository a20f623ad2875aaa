//! 像素级效果：高斯模糊（三次盒式模糊近似）、噪点、纹理与圆角矩形路径。

use rand::{Rng, SeedableRng, rngs::StdRng};
use tiny_skia::{ColorU8, FillRule, Paint, Path, PathBuilder, Pixmap, Rect, Stroke, Transform};

use super::types::PatternKind;

/// 三次盒式模糊近似高斯模糊（作用于预乘 RGBA8）。
///
/// 每次盒式模糊用滑动和实现，耗时与半径无关；边界按最近像素延伸。
pub fn blur_rgba8_premul(data: &mut [u8], width: u32, height: u32, sigma: f32) {
    if !sigma.is_finite() || sigma <= 0.0 || width == 0 || height == 0 {
        return;
    }
    let (w, h) = (width as usize, height as usize);
    if data.len() != w * h * 4 {
        return;
    }

    let mut tmp = vec![0u8; data.len()];
    for size in box_sizes_for_gauss(sigma, 3) {
        let radius = (size - 1) / 2;
        if radius == 0 {
            continue;
        }
        horizontal_pass(data, &mut tmp, w, h, radius);
        vertical_pass(&tmp, data, w, h, radius);
    }
}

/// 给定 sigma，求 n 次盒式模糊的窗口宽度（均为奇数）
fn box_sizes_for_gauss(sigma: f32, n: usize) -> Vec<usize> {
    let sigma = f64::from(sigma);
    let nf = n as f64;
    let w_ideal = (12.0 * sigma * sigma / nf + 1.0).sqrt();
    let mut wl = w_ideal.floor() as i64;
    if wl % 2 == 0 {
        wl -= 1;
    }
    let wl = wl.max(1);
    let wu = wl + 2;
    let wlf = wl as f64;
    let m_ideal = (12.0 * sigma * sigma - nf * wlf * wlf - 4.0 * nf * wlf - 3.0 * nf)
        / (-4.0 * wlf - 4.0);
    let m = m_ideal.round().max(0.0) as usize;
    (0..n)
        .map(|i| if i < m { wl as usize } else { wu as usize })
        .collect()
}

fn horizontal_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize) {
    let window = (2 * r + 1) as u32;
    let last = w as isize - 1;
    for y in 0..h {
        let row = y * w;
        let at = |x: isize, c: usize| u32::from(src[(row + x.clamp(0, last) as usize) * 4 + c]);
        for c in 0..4 {
            let mut acc: u32 = (-(r as isize)..=r as isize).map(|x| at(x, c)).sum();
            for x in 0..w {
                dst[(row + x) * 4 + c] = ((acc + window / 2) / window) as u8;
                let xi = x as isize;
                acc = acc + at(xi + r as isize + 1, c) - at(xi - r as isize, c);
            }
        }
    }
}

fn vertical_pass(src: &[u8], dst: &mut [u8], w: usize, h: usize, r: usize) {
    let window = (2 * r + 1) as u32;
    let last = h as isize - 1;
    for x in 0..w {
        let at = |y: isize, c: usize| u32::from(src[(y.clamp(0, last) as usize * w + x) * 4 + c]);
        for c in 0..4 {
            let mut acc: u32 = (-(r as isize)..=r as isize).map(|y| at(y, c)).sum();
            for y in 0..h {
                dst[(y * w + x) * 4 + c] = ((acc + window / 2) / window) as u8;
                let yi = y as isize;
                acc = acc + at(yi + r as isize + 1, c) - at(yi - r as isize, c);
            }
        }
    }
}

/// 每个像素的 RGB 分别叠加 [-amount, amount] 的均匀随机整数（不改 alpha）
pub fn apply_noise(pixmap: &mut Pixmap, amount: u32, seed: u64) {
    if amount == 0 {
        return;
    }
    let amount = amount as i32;
    let mut rng = StdRng::seed_from_u64(seed);
    for px in pixmap.pixels_mut() {
        let c = px.demultiply();
        let mut jitter =
            |v: u8| (i32::from(v) + rng.gen_range(-amount..=amount)).clamp(0, 255) as u8;
        let (r, g, b) = (jitter(c.red()), jitter(c.green()), jitter(c.blue()));
        *px = ColorU8::from_rgba(r, g, b, c.alpha()).premultiply();
    }
}

/// 纹理间距：短边的 1/20，至少 1px
pub fn pattern_spacing(width: u32, height: u32) -> f32 {
    (width.min(height) as f32 / 20.0).max(1.0)
}

/// 按间距铺满整幅画布绘制纹理
pub fn draw_pattern(pixmap: &mut Pixmap, kind: PatternKind, paint: &Paint<'_>) {
    let (w, h) = (pixmap.width() as f32, pixmap.height() as f32);
    let spacing = pattern_spacing(pixmap.width(), pixmap.height());
    let mut pb = PathBuilder::new();

    match kind {
        PatternKind::Dots => {
            let r = spacing / 8.0;
            let mut y = spacing / 2.0;
            while y < h {
                let mut x = spacing / 2.0;
                while x < w {
                    pb.push_circle(x, y, r);
                    x += spacing;
                }
                y += spacing;
            }
            fill(pixmap, pb, paint);
        }
        PatternKind::Stripes => {
            // 45° 斜线，从左侧画布外开始，保证左下角也被覆盖
            let mut x = -h;
            while x < w {
                pb.move_to(x, 0.0);
                pb.line_to(x + h, h);
                x += spacing;
            }
            stroke(pixmap, pb, paint, spacing / 4.0);
        }
        PatternKind::Checkerboard => {
            let cols = (w / spacing).ceil() as u32;
            let rows = (h / spacing).ceil() as u32;
            for row in 0..rows {
                for col in 0..cols {
                    if (col + row) % 2 == 0
                        && let Some(rect) = Rect::from_xywh(
                            col as f32 * spacing,
                            row as f32 * spacing,
                            spacing,
                            spacing,
                        )
                    {
                        pb.push_rect(rect);
                    }
                }
            }
            fill(pixmap, pb, paint);
        }
        PatternKind::Grid => {
            let mut x = 0.0;
            while x <= w {
                pb.move_to(x, 0.0);
                pb.line_to(x, h);
                x += spacing;
            }
            let mut y = 0.0;
            while y <= h {
                pb.move_to(0.0, y);
                pb.line_to(w, y);
                y += spacing;
            }
            stroke(pixmap, pb, paint, spacing / 20.0);
        }
    }
}

fn fill(pixmap: &mut Pixmap, pb: PathBuilder, paint: &Paint<'_>) {
    if let Some(path) = pb.finish() {
        pixmap.fill_path(&path, paint, FillRule::Winding, Transform::identity(), None);
    }
}

fn stroke(pixmap: &mut Pixmap, pb: PathBuilder, paint: &Paint<'_>, width: f32) {
    if let Some(path) = pb.finish() {
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, paint, &stroke, Transform::identity(), None);
    }
}

/// 矩形或圆角矩形路径；半径不超过短边的一半
pub fn rect_path(x: f32, y: f32, w: f32, h: f32, radius: f32) -> Option<Path> {
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    let rect = Rect::from_xywh(x, y, w, h)?;
    let r = radius.min(w / 2.0).min(h / 2.0).max(0.0);
    if r <= 0.0 {
        return Some(PathBuilder::from_rect(rect));
    }

    // 四分之一圆弧的三次贝塞尔控制点系数
    const K: f32 = 0.552_284_8;
    let (l, t, rt, b) = (x, y, x + w, y + h);
    let c = r * K;
    let mut pb = PathBuilder::new();
    pb.move_to(l + r, t);
    pb.line_to(rt - r, t);
    pb.cubic_to(rt - r + c, t, rt, t + r - c, rt, t + r);
    pb.line_to(rt, b - r);
    pb.cubic_to(rt, b - r + c, rt - r + c, b, rt - r, b);
    pb.line_to(l + r, b);
    pb.cubic_to(l + r - c, b, l, b - r + c, l, b - r);
    pb.line_to(l, t + r);
    pb.cubic_to(l, t + r - c, l + r - c, t, l + r, t);
    pb.close();
    pb.finish()
}
