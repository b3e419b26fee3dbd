use super::schema::NOISE_LEN;
use super::signal::{self, Plane};
use crate::error::FeatureError;

const BILATERAL_DIAMETER: usize = 9;
const BILATERAL_SIGMA: f64 = 75.0;
const PERIODICITY_EPS: f64 = 1e-10;

/// 频谱环带 [内半径, 外半径)
const RINGS: [(f64, f64); 3] = [(10.0, 20.0), (20.0, 40.0), (40.0, 80.0)];

/// [noise_energy, noise_mean, texture_mean, texture_std, ring1, ring2, ring3, periodicity]
pub fn extract(gray: &Plane) -> Result<[f32; NOISE_LEN], FeatureError> {
    if gray.is_empty() {
        return Err(FeatureError::NoSamples("noise"));
    }

    // 噪声残差 = 原图 - 双边滤波
    let smoothed = signal::bilateral(gray, BILATERAL_DIAMETER, BILATERAL_SIGMA, BILATERAL_SIGMA);
    let residual = gray.zip_map(&smoothed, |a, b| a - b);
    let noise_energy = signal::variance(&residual.data);
    let noise_mean = signal::mean(&residual.map(f64::abs).data);

    // 3×3 局部方差：E[x²] - E[x]²
    let local_mean = signal::box3(gray);
    let local_sq = signal::box3(&gray.map(|v| v * v));
    let local_var = local_sq.zip_map(&local_mean, |sq, m| sq - m * m);

    let spectrum = signal::centered_magnitude(gray);
    let [ring1, ring2, ring3] = ring_means(&spectrum);
    let periodicity = ring2 / (ring1 + ring3 + PERIODICITY_EPS);

    Ok([
        noise_energy as f32,
        noise_mean as f32,
        signal::mean(&local_var.data) as f32,
        signal::std_dev(&local_var.data) as f32,
        ring1 as f32,
        ring2 as f32,
        ring3 as f32,
        periodicity as f32,
    ])
}

/// 各环带内的平均幅值；小图上环带可能为空，此时为 NaN（随后由指纹清洗为 0）
fn ring_means(spectrum: &Plane) -> [f64; 3] {
    let (cx, cy) = ((spectrum.width / 2) as f64, (spectrum.height / 2) as f64);
    let mut sums = [0.0; 3];
    let mut counts = [0usize; 3];
    for y in 0..spectrum.height {
        for x in 0..spectrum.width {
            let r = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
            for (k, &(inner, outer)) in RINGS.iter().enumerate() {
                if r >= inner && r < outer {
                    sums[k] += spectrum.at(x, y);
                    counts[k] += 1;
                }
            }
        }
    }
    let mut out = [f64::NAN; 3];
    for k in 0..3 {
        if counts[k] > 0 {
            out[k] = sums[k] / counts[k] as f64;
        }
    }
    out
}
