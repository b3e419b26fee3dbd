use super::schema::COMPRESSION_LEN;
use super::signal::{self, Plane};
use crate::error::FeatureError;

const BLOCK: usize = 8;
const HIGH_FREQ_START: usize = 4;
const RATIO_EPS: f64 = 1e-10;

/// [dct_mean, dct_std, dct_max, var_mean, var_std, var_ratio]
///
/// 图像小于一个 8×8 块时全部为 0。
pub fn extract(gray: &Plane) -> Result<[f32; COMPRESSION_LEN], FeatureError> {
    if gray.is_empty() {
        return Err(FeatureError::NoSamples("compression"));
    }

    let energies = high_frequency_energies(gray);
    let (dct_mean, dct_std, dct_max) = if energies.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            signal::mean(&energies),
            signal::std_dev(&energies),
            energies.iter().copied().fold(f64::MIN, f64::max),
        )
    };

    let variances = window_variances(gray, BLOCK / 2);
    let (var_mean, var_std, var_ratio) = if variances.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let m = signal::mean(&variances);
        let s = signal::std_dev(&variances);
        (m, s, s / (m + RATIO_EPS))
    };

    Ok([
        dct_mean as f32,
        dct_std as f32,
        dct_max as f32,
        var_mean as f32,
        var_std as f32,
        var_ratio as f32,
    ])
}

/// 不重叠 8×8 块，DCT 后右下 4×4 系数的平方和
fn high_frequency_energies(gray: &Plane) -> Vec<f64> {
    let mut out = Vec::new();
    for by in block_origins(gray.height, BLOCK) {
        for bx in block_origins(gray.width, BLOCK) {
            let mut block = [[0.0; BLOCK]; BLOCK];
            for (r, row) in block.iter_mut().enumerate() {
                for (c, v) in row.iter_mut().enumerate() {
                    *v = gray.at(bx + c, by + r);
                }
            }
            let coeffs = signal::dct8x8(&block);
            let energy = coeffs[HIGH_FREQ_START..]
                .iter()
                .flat_map(|row| row[HIGH_FREQ_START..].iter())
                .map(|c| c * c)
                .sum();
            out.push(energy);
        }
    }
    out
}

/// 8×8 窗口、步长 `stride` 的局部方差
fn window_variances(gray: &Plane, stride: usize) -> Vec<f64> {
    let mut out = Vec::new();
    let mut window = Vec::with_capacity(BLOCK * BLOCK);
    for y in block_origins(gray.height, stride) {
        for x in block_origins(gray.width, stride) {
            window.clear();
            for r in 0..BLOCK {
                for c in 0..BLOCK {
                    window.push(gray.at(x + c, y + r));
                }
            }
            out.push(signal::variance(&window));
        }
    }
    out
}

/// 0, step, 2·step, ... 只保留能放下完整 8×8 块的起点
fn block_origins(extent: usize, step: usize) -> impl Iterator<Item = usize> {
    let last = extent.checked_sub(BLOCK);
    (0..)
        .map(move |i| i * step)
        .take_while(move |&o| last.map_or(false, |l| o <= l))
}
