//! 特征提取共用的信号处理原语：灰度平面、卷积、Canny、双边滤波、DCT、FFT
//!
//! 全部串行、固定求和顺序，保证相同输入得到逐位相同的输出。

use image::RgbImage;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// 单通道浮点平面，行优先
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// gfedcb|abcdefgh|gfedcba
    Reflect101,
    /// aaaaaa|abcdefgh|hhhhhhh
    Replicate,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    /// 越界坐标按边界模式折回
    #[inline]
    pub fn at_border(&self, x: isize, y: isize, border: Border) -> f64 {
        let xi = fold_index(x, self.width, border);
        let yi = fold_index(y, self.height, border);
        self.data[yi * self.width + xi]
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Plane {
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn zip_map(&self, other: &Plane, f: impl Fn(f64, f64) -> f64) -> Plane {
        debug_assert_eq!(self.data.len(), other.data.len());
        Plane {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }
}

fn fold_index(i: isize, n: usize, border: Border) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    match border {
        Border::Replicate => i.clamp(0, n - 1) as usize,
        Border::Reflect101 => {
            let mut i = i;
            // 对于很小的平面，一次折回可能仍越界
            while i < 0 || i >= n {
                if i < 0 {
                    i = -i;
                }
                if i >= n {
                    i = 2 * n - 2 - i;
                }
            }
            i as usize
        }
    }
}

// ==========================================
// 颜色空间
// ==========================================

/// RGB → 灰度，BT.601 定点系数 (4899, 9617, 1868) >> 14，结果为 0..=255 的整数
pub fn grayscale(raster: &RgbImage) -> Plane {
    let (w, h) = raster.dimensions();
    let data = raster
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14) as f64
        })
        .collect();
    Plane {
        width: w as usize,
        height: h as usize,
        data,
    }
}

/// 8-bit HSV 的 S 与 V 分量（0..=255）
pub fn saturation_value(raster: &RgbImage) -> (Vec<f64>, Vec<f64>) {
    raster
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            let v = r.max(g).max(b) as f64;
            let min = r.min(g).min(b) as f64;
            let s = if v > 0.0 {
                (255.0 * (v - min) / v).round()
            } else {
                0.0
            };
            (s, v)
        })
        .unzip()
}

// ==========================================
// 卷积与梯度
// ==========================================

pub fn convolve3x3(src: &Plane, kernel: &[[f64; 3]; 3], border: Border) -> Plane {
    let mut out = Plane::new(src.width, src.height);
    for y in 0..src.height {
        for x in 0..src.width {
            let mut acc = 0.0;
            for (ky, row) in kernel.iter().enumerate() {
                for (kx, &k) in row.iter().enumerate() {
                    if k != 0.0 {
                        acc += k * src.at_border(
                            x as isize + kx as isize - 1,
                            y as isize + ky as isize - 1,
                            border,
                        );
                    }
                }
            }
            out.data[y * src.width + x] = acc;
        }
    }
    out
}

const SOBEL_X: [[f64; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_Y: [[f64; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];
const LAPLACIAN: [[f64; 3]; 3] = [[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]];
const BOX3: [[f64; 3]; 3] = [[1.0 / 9.0; 3]; 3];

pub fn sobel(src: &Plane, border: Border) -> (Plane, Plane) {
    (
        convolve3x3(src, &SOBEL_X, border),
        convolve3x3(src, &SOBEL_Y, border),
    )
}

pub fn laplacian(src: &Plane) -> Plane {
    convolve3x3(src, &LAPLACIAN, Border::Reflect101)
}

pub fn box3(src: &Plane) -> Plane {
    convolve3x3(src, &BOX3, Border::Reflect101)
}

// ==========================================
// Canny
// ==========================================

/// Canny 边缘检测：3×3 Sobel（复制边界）、L1 幅值、四方向非极大抑制、8 邻域滞后连接
///
/// 返回每个像素是否为边缘。
pub fn canny(gray: &Plane, low: f64, high: f64) -> Vec<bool> {
    let (w, h) = (gray.width, gray.height);
    let (dx, dy) = sobel(gray, Border::Replicate);
    let mag: Vec<f64> = dx
        .data
        .iter()
        .zip(&dy.data)
        .map(|(a, b)| a.abs() + b.abs())
        .collect();
    // 平面外幅值视为 0
    let m = |x: isize, y: isize| -> f64 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            mag[y as usize * w + x as usize]
        }
    };

    const TG22: f64 = 0.414_213_562_373_095_1;
    const TG67: f64 = 2.414_213_562_373_095;

    // 0 = 非候选, 1 = 弱候选, 2 = 强边缘
    let mut state = vec![0u8; w * h];
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let v = mag[i];
            if v <= low {
                continue;
            }
            let ax = dx.data[i].abs();
            let ay = dy.data[i].abs();
            let (xi, yi) = (x as isize, y as isize);
            let is_max = if ay <= ax * TG22 {
                v > m(xi - 1, yi) && v >= m(xi + 1, yi)
            } else if ay > ax * TG67 {
                v > m(xi, yi - 1) && v >= m(xi, yi + 1)
            } else {
                let s: isize = if (dx.data[i] < 0.0) != (dy.data[i] < 0.0) { -1 } else { 1 };
                v > m(xi - s, yi - 1) && v > m(xi + s, yi + 1)
            };
            if !is_max {
                continue;
            }
            if v > high {
                state[i] = 2;
                stack.push(i);
            } else {
                state[i] = 1;
            }
        }
    }

    while let Some(i) = stack.pop() {
        let (x, y) = ((i % w) as isize, (i / w) as isize);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if state[j] == 1 {
                    state[j] = 2;
                    stack.push(j);
                }
            }
        }
    }

    state.into_iter().map(|s| s == 2).collect()
}

// ==========================================
// 双边滤波
// ==========================================

/// 8-bit 双边滤波：直径 `diameter`，圆形空间窗口，反射边界，输出四舍五入到整数
pub fn bilateral(gray: &Plane, diameter: usize, sigma_color: f64, sigma_space: f64) -> Plane {
    let radius = (diameter / 2) as isize;
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let color_weight: Vec<f64> = (0..256)
        .map(|i| ((i * i) as f64 * color_coeff).exp())
        .collect();
    let mut taps = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r = ((dx * dx + dy * dy) as f64).sqrt();
            if r > radius as f64 {
                continue;
            }
            taps.push((dx, dy, (r * r * space_coeff).exp()));
        }
    }

    let mut out = Plane::new(gray.width, gray.height);
    for y in 0..gray.height {
        for x in 0..gray.width {
            let center = gray.at(x, y);
            let (mut sum, mut wsum) = (0.0, 0.0);
            for &(dx, dy, ws) in &taps {
                let v = gray.at_border(x as isize + dx, y as isize + dy, Border::Reflect101);
                let diff = (v - center).abs() as usize;
                let wgt = ws * color_weight[diff.min(255)];
                sum += v * wgt;
                wsum += wgt;
            }
            out.data[y * gray.width + x] = (sum / wsum).round();
        }
    }
    out
}

// ==========================================
// DCT / FFT
// ==========================================

/// 正交 8×8 DCT-II
pub fn dct8x8(block: &[[f64; 8]; 8]) -> [[f64; 8]; 8] {
    let basis = dct_basis();
    let mut tmp = [[0.0; 8]; 8];
    // tmp = C · B
    for k in 0..8 {
        for col in 0..8 {
            tmp[k][col] = (0..8).map(|n| basis[k][n] * block[n][col]).sum();
        }
    }
    // out = tmp · Cᵀ
    let mut out = [[0.0; 8]; 8];
    for row in 0..8 {
        for k in 0..8 {
            out[row][k] = (0..8).map(|n| tmp[row][n] * basis[k][n]).sum();
        }
    }
    out
}

fn dct_basis() -> [[f64; 8]; 8] {
    let mut c = [[0.0; 8]; 8];
    for (k, row) in c.iter_mut().enumerate() {
        let alpha = if k == 0 { (1.0f64 / 8.0).sqrt() } else { (2.0f64 / 8.0).sqrt() };
        for (n, v) in row.iter_mut().enumerate() {
            *v = alpha
                * (std::f64::consts::PI * (2 * n + 1) as f64 * k as f64 / 16.0).cos();
        }
    }
    c
}

/// 二维 FFT 幅值谱，零频移到 (h/2, w/2)
pub fn centered_magnitude(gray: &Plane) -> Plane {
    let (w, h) = (gray.width, gray.height);
    let mut buf: Vec<Complex<f64>> = gray.data.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut planner = FftPlanner::<f64>::new();

    let row_fft = planner.plan_fft_forward(w);
    for row in buf.chunks_exact_mut(w) {
        row_fft.process(row);
    }

    let col_fft = planner.plan_fft_forward(h);
    let mut column = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for y in 0..h {
            column[y] = buf[y * w + x];
        }
        col_fft.process(&mut column);
        for y in 0..h {
            buf[y * w + x] = column[y];
        }
    }

    let mut out = Plane::new(w, h);
    for y in 0..h {
        let sy = (y + h / 2) % h;
        for x in 0..w {
            let sx = (x + w / 2) % w;
            out.data[sy * w + sx] = buf[y * w + x].norm();
        }
    }
    out
}

// ==========================================
// 统计量（总体统计，ddof = 0）
// ==========================================

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// 有偏偏度 m3 / m2^1.5；常数序列记为 0
pub fn skewness(values: &[f64]) -> f64 {
    let m = mean(values);
    let n = values.len() as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    if m2 <= f64::EPSILON * m.abs().max(1.0) {
        return 0.0;
    }
    m3 / m2.powf(1.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn plane(w: usize, h: usize, f: impl Fn(usize, usize) -> f64) -> Plane {
        let mut p = Plane::new(w, h);
        for y in 0..h {
            for x in 0..w {
                p.data[y * w + x] = f(x, y);
            }
        }
        p
    }

    #[test]
    fn reflect101_folds_without_repeating_edge() {
        assert_eq!(fold_index(-1, 5, Border::Reflect101), 1);
        assert_eq!(fold_index(5, 5, Border::Reflect101), 3);
        assert_eq!(fold_index(-3, 2, Border::Reflect101), 1);
        assert_eq!(fold_index(-2, 5, Border::Replicate), 0);
        assert_eq!(fold_index(7, 1, Border::Reflect101), 0);
    }

    #[test]
    fn grayscale_matches_bt601() {
        let img = RgbImage::from_pixel(2, 1, Rgb([255, 0, 0]));
        assert_eq!(grayscale(&img).data, vec![76.0, 76.0]);
        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        assert_eq!(grayscale(&white).data, vec![255.0]);
    }

    #[test]
    fn canny_finds_a_vertical_step() {
        let gray = plane(16, 16, |x, _| if x < 8 { 0.0 } else { 200.0 });
        let edges = canny(&gray, 50.0, 150.0);
        let count = edges.iter().filter(|&&e| e).count();
        assert!(count >= 16, "expected a full edge column, got {count}");
        let flat = plane(16, 16, |_, _| 90.0);
        assert!(canny(&flat, 50.0, 150.0).iter().all(|&e| !e));
    }

    #[test]
    fn bilateral_keeps_flat_regions() {
        let flat = plane(12, 12, |_, _| 42.0);
        assert_eq!(bilateral(&flat, 9, 75.0, 75.0), flat);
    }

    #[test]
    fn dct_of_constant_block_is_dc_only() {
        let out = dct8x8(&[[10.0; 8]; 8]);
        assert!((out[0][0] - 80.0).abs() < 1e-9);
        let ac: f64 = (0..8)
            .flat_map(|r| (0..8).map(move |c| (r, c)))
            .filter(|&(r, c)| (r, c) != (0, 0))
            .map(|(r, c)| out[r][c].abs())
            .sum();
        assert!(ac < 1e-9);
    }

    #[test]
    fn spectrum_peak_is_centered() {
        let p = plane(32, 24, |_, _| 1.0);
        let mag = centered_magnitude(&p);
        assert!((mag.at(16, 12) - (32.0 * 24.0)).abs() < 1e-6);
        assert!(mag.at(0, 0).abs() < 1e-6);
    }

    #[test]
    fn skewness_of_symmetric_and_constant() {
        assert!(skewness(&[1.0, 2.0, 3.0]).abs() < 1e-12);
        assert_eq!(skewness(&[5.0; 10]), 0.0);
        assert!(skewness(&[0.0, 0.0, 0.0, 10.0]) > 0.0);
    }
}
