use image::imageops::FilterType;
use image::{GenericImageView, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DecodeError;

/// 最长边上限（像素）
pub const DEFAULT_MAX_SIZE: u32 = 1024;

/// 预处理元数据：原始尺寸、处理后尺寸、通道数、是否缩放
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// (width, height)
    pub original_size: (u32, u32),
    /// (width, height)
    pub processed_size: (u32, u32),
    pub channels: u8,
    pub resized: bool,
}

/// 解码原始字节 → RGB 栅格 + 元数据
///
/// 最长边超过 `max_size` 时按比例缩放（Lanczos3），使最长边恰好等于 `max_size`。
/// 无法解码时返回 `DecodeError`，绝不返回残缺的栅格。
pub fn preprocess(bytes: &[u8], max_size: u32) -> Result<(RgbImage, ImageMeta), DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded = image::load_from_memory(bytes)?;
    let (orig_w, orig_h) = decoded.dimensions();
    let rgb = decoded.to_rgb8();

    let (raster, resized) = fit_within(rgb, max_size);
    let meta = ImageMeta {
        original_size: (orig_w, orig_h),
        processed_size: raster.dimensions(),
        channels: 3,
        resized,
    };
    debug!(?meta, "image preprocessed");
    Ok((raster, meta))
}

/// 等比缩放到最长边不超过 `max_size`；返回是否发生了缩放
pub fn fit_within(raster: RgbImage, max_size: u32) -> (RgbImage, bool) {
    let (w, h) = raster.dimensions();
    let longest = w.max(h);
    if longest <= max_size || max_size == 0 {
        return (raster, false);
    }
    let (new_w, new_h) = scaled_dimensions(w, h, max_size);
    (
        image::imageops::resize(&raster, new_w, new_h, FilterType::Lanczos3),
        true,
    )
}

/// ratio = bound / max(w, h)，四舍五入，至少 1 像素
pub fn scaled_dimensions(w: u32, h: u32, bound: u32) -> (u32, u32) {
    let ratio = bound as f64 / w.max(h) as f64;
    let scale = |v: u32| ((v as f64 * ratio).round() as u32).max(1);
    (scale(w), scale(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([128, 128, 128]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn small_image_is_untouched() {
        let (raster, meta) = preprocess(&png_bytes(200, 150), DEFAULT_MAX_SIZE).unwrap();
        assert_eq!(raster.dimensions(), (200, 150));
        assert_eq!(meta.channels, 3);
        assert_eq!(meta.original_size, (200, 150));
        assert!(!meta.resized);
    }

    #[test]
    fn large_image_is_downscaled_preserving_aspect() {
        let (raster, meta) = preprocess(&png_bytes(2000, 1500), 500).unwrap();
        assert_eq!(raster.dimensions(), (500, 375));
        assert!(raster.width().max(raster.height()) <= 500);
        assert!(meta.resized);
        assert_eq!(meta.processed_size, (500, 375));
    }

    #[test]
    fn scaled_dimensions_round_to_nearest() {
        assert_eq!(scaled_dimensions(1000, 333, 500), (500, 167));
        assert_eq!(scaled_dimensions(3000, 1, 100), (100, 1));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = preprocess(b"definitely not an image", DEFAULT_MAX_SIZE).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)));
        assert!(matches!(preprocess(&[], 64), Err(DecodeError::Empty)));
    }
}
