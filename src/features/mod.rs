//! 特征提取器：RGB 栅格 → 31 维指纹
//!
//! 纯函数，无隐藏状态、无随机性。四组特征按固定顺序拼接：
//! 边缘 (4) · 颜色 (13) · 压缩 (6) · 噪声/纹理 (8)。

pub mod color;
pub mod compression;
pub mod edge;
pub mod noise;
pub mod schema;
pub mod signal;

use image::RgbImage;
use tracing::warn;

use crate::error::FeatureError;
use crate::fingerprint::Fingerprint;
use schema::{COLOR_LEN, COMPRESSION_LEN, EDGE_LEN, FEATURE_COUNT};

/// 提取结果：完整向量，或降级为全零哨兵（附带原因）
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Complete(Fingerprint),
    Degraded {
        fingerprint: Fingerprint,
        reason: FeatureError,
    },
}

impl Extraction {
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            Extraction::Complete(fp) => *fp,
            Extraction::Degraded { fingerprint, .. } => *fingerprint,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Extraction::Degraded { .. })
    }
}

/// 带标签的提取：任何子提取器失败都会得到 `Degraded`，调用方可以自行记录/告警
pub fn try_extract(raster: &RgbImage) -> Extraction {
    match extract_all(raster) {
        Ok(values) => Extraction::Complete(Fingerprint::new(values)),
        Err(reason) => Extraction::Degraded {
            fingerprint: Fingerprint::zeroed(),
            reason,
        },
    }
}

/// 永不失败的提取；失败时返回全零向量并记录一条警告
pub fn extract_features(raster: &RgbImage) -> Fingerprint {
    let extraction = try_extract(raster);
    if let Extraction::Degraded { reason, .. } = &extraction {
        warn!(%reason, "feature extraction degraded to zero fingerprint");
    }
    extraction.fingerprint()
}

fn extract_all(raster: &RgbImage) -> Result<[f32; FEATURE_COUNT], FeatureError> {
    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return Err(FeatureError::EmptyRaster { width, height });
    }

    let gray = signal::grayscale(raster);
    let edge = edge::extract(&gray)?;
    let color = color::extract(raster)?;
    let compression = compression::extract(&gray)?;
    let noise = noise::extract(&gray)?;

    let mut out = [0.0f32; FEATURE_COUNT];
    out[..EDGE_LEN].copy_from_slice(&edge);
    out[EDGE_LEN..EDGE_LEN + COLOR_LEN].copy_from_slice(&color);
    out[EDGE_LEN + COLOR_LEN..EDGE_LEN + COLOR_LEN + COMPRESSION_LEN].copy_from_slice(&compression);
    out[EDGE_LEN + COLOR_LEN + COMPRESSION_LEN..].copy_from_slice(&noise);
    Ok(out)
}
