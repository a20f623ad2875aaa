use image::ColorType;
use image::codecs::jpeg::JpegEncoder;
use tiny_skia::Pixmap;

use super::types::ImageFormat;
use crate::config::AppConfig;
use crate::error::AppError;

/// 预乘像素还原为直通 RGBA8
fn straight_rgba(pixmap: &Pixmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }
    out
}

/// 统一的图片编码入口：根据 `format` 选择编码器。`quality` 对 PNG 无效。
pub fn encode(pixmap: &Pixmap, format: ImageFormat, quality: u8) -> Result<Vec<u8>, AppError> {
    let rgba = straight_rgba(pixmap);
    let (w, h) = (pixmap.width(), pixmap.height());
    match format {
        ImageFormat::Png => encode_png(&rgba, w, h),
        ImageFormat::Jpeg => encode_jpeg(&rgba, w, h, quality),
        ImageFormat::Webp => encode_webp(&rgba, w, h, quality),
    }
}

fn encode_png(rgba: &[u8], w: u32, h: u32) -> Result<Vec<u8>, AppError> {
    let speed = AppConfig::try_global()
        .map(|c| c.image.optimize_speed)
        .unwrap_or(false);

    let mut out = Vec::with_capacity(rgba.len() / 2);
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        if speed {
            encoder.set_compression(png::Compression::Fast);
            encoder.set_filter(png::FilterType::NoFilter);
        } else {
            encoder.set_compression(png::Compression::Default);
            encoder.set_filter(png::FilterType::Paeth);
        }
        let mut writer = encoder
            .write_header()
            .map_err(|e| AppError::ImageRendererError(format!("PNG write_header error: {e}")))?;
        writer.write_image_data(rgba).map_err(|e| {
            AppError::ImageRendererError(format!("PNG write_image_data error: {e}"))
        })?;
        writer
            .finish()
            .map_err(|e| AppError::ImageRendererError(format!("PNG finish error: {e}")))?;
    }
    Ok(out)
}

fn encode_jpeg(rgba: &[u8], w: u32, h: u32, quality: u8) -> Result<Vec<u8>, AppError> {
    // 将 RGBA 像素扁平化到黑色背景（JPEG 无透明通道）
    let mut rgb: Vec<u8> = Vec::with_capacity((w as usize) * (h as usize) * 3);
    for px in rgba.chunks_exact(4) {
        let a = u16::from(px[3]);
        // 过黑底合成：c' = c * a/255
        rgb.extend(px[..3].iter().map(|&c| ((u16::from(c) * a) / 255) as u8));
    }

    let mut out = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    enc.encode(&rgb, w, h, ColorType::Rgb8.into())
        .map_err(|e| AppError::ImageRendererError(format!("JPEG encode error: {e}")))?;
    Ok(out)
}

fn encode_webp(rgba: &[u8], w: u32, h: u32, quality: u8) -> Result<Vec<u8>, AppError> {
    let encoder = webp::Encoder::from_rgba(rgba, w, h);
    let memory = encoder
        .encode_simple(false, f32::from(quality.clamp(1, 100)))
        .map_err(|e| AppError::ImageRendererError(format!("WebP encode error: {e:?}")))?;
    Ok(memory.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_skia::Color;

    fn canvas(w: u32, h: u32, color: Color) -> Pixmap {
        let mut pixmap = Pixmap::new(w, h).expect("pixmap");
        pixmap.fill(color);
        pixmap
    }

    #[test]
    fn png_round_trips_dimensions_and_pixels() {
        let pixmap = canvas(12, 7, Color::from_rgba8(0x3b, 0x82, 0xf6, 255));
        let bytes = encode(&pixmap, ImageFormat::Png, 90).expect("png");
        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
        let decoded = image::load_from_memory(&bytes).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (12, 7));
        assert_eq!(decoded.get_pixel(3, 3).0, [0x3b, 0x82, 0xf6, 255]);
    }

    #[test]
    fn jpeg_flattens_transparency_over_black() {
        let pixmap = canvas(8, 8, Color::from_rgba8(255, 255, 255, 0));
        let bytes = encode(&pixmap, ImageFormat::Jpeg, 90).expect("jpeg");
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
        let decoded = image::load_from_memory(&bytes).expect("decode").to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c < 8)));
    }

    #[test]
    fn webp_has_riff_header() {
        let pixmap = canvas(16, 16, Color::from_rgba8(10, 200, 30, 255));
        let bytes = encode(&pixmap, ImageFormat::Webp, 80).expect("webp");
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn quality_changes_lossy_output_only() {
        let mut pixmap = canvas(32, 32, Color::from_rgba8(120, 40, 200, 255));
        crate::features::image::effects::apply_noise(&mut pixmap, 60, 1);
        let low = encode(&pixmap, ImageFormat::Jpeg, 10).expect("low");
        let high = encode(&pixmap, ImageFormat::Jpeg, 100).expect("high");
        assert!(low.len() < high.len());
        assert_eq!(
            encode(&pixmap, ImageFormat::Png, 10).expect("png 10"),
            encode(&pixmap, ImageFormat::Png, 100).expect("png 100")
        );
    }
}
