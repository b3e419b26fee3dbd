use image::RgbImage;

use super::schema::COLOR_LEN;
use super::signal;
use crate::error::FeatureError;

const ENTROPY_EPS: f64 = 1e-10;

/// [r_mean, r_std, r_skew, g_*, b_*, sat_mean, sat_std, val_mean, color_entropy]
pub fn extract(raster: &RgbImage) -> Result<[f32; COLOR_LEN], FeatureError> {
    let n = (raster.width() * raster.height()) as usize;
    if n == 0 {
        return Err(FeatureError::NoSamples("color"));
    }

    let mut out = [0.0f32; COLOR_LEN];
    let mut histogram = [0u64; 256];
    let mut channels: [Vec<f64>; 3] = Default::default();
    for c in &mut channels {
        c.reserve(n);
    }
    for p in raster.pixels() {
        for (c, &v) in p.0.iter().enumerate() {
            channels[c].push(v as f64);
            histogram[v as usize] += 1;
        }
    }

    for (c, values) in channels.iter().enumerate() {
        out[c * 3] = signal::mean(values) as f32;
        out[c * 3 + 1] = signal::std_dev(values) as f32;
        out[c * 3 + 2] = signal::skewness(values) as f32;
    }

    let (sat, val) = signal::saturation_value(raster);
    out[9] = signal::mean(&sat) as f32;
    out[10] = signal::std_dev(&sat) as f32;
    out[11] = signal::mean(&val) as f32;
    out[12] = entropy(&histogram) as f32;

    Ok(out)
}

/// 256-bin 直方图的香农熵（以 2 为底）
fn entropy(histogram: &[u64; 256]) -> f64 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }
    -histogram
        .iter()
        .map(|&count| {
            let p = count as f64 / total as f64;
            p * (p + ENTROPY_EPS).log2()
        })
        .sum::<f64>()
}
