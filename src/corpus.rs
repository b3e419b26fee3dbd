//! 训练图片来源
//!
//! `ImageSource` 是训练器看到的唯一接口：给出 N 张合成风格图片和 N 张真实风格图片。
//! `ProceduralSource` 用固定种子程序化生成两类图片；`DiskCorpus` 从目录里抽样真实照片，
//! 作为真实类的补充。

use std::f64::consts::TAU;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::{imageops, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::CorpusError;
use crate::preprocess::fit_within;

pub const DISK_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
pub const DISK_THUMBNAIL_SIZE: u32 = 768;

/// 可插拔的带标签图片来源
pub trait ImageSource {
    /// 标签 1：过度平滑、规则、均匀光照一类的图片
    fn synthetic(&mut self, count: usize) -> Result<Vec<RgbImage>, CorpusError>;
    /// 标签 0：带自然纹理、阴影和相机噪声的图片
    fn realistic(&mut self, count: usize) -> Result<Vec<RgbImage>, CorpusError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntheticKind {
    Gradient,
    Geometric,
    SmoothBlobs,
    TiledTexture,
    UniformLighting,
}

const SYNTHETIC_KINDS: [SyntheticKind; 5] = [
    SyntheticKind::Gradient,
    SyntheticKind::Geometric,
    SyntheticKind::SmoothBlobs,
    SyntheticKind::TiledTexture,
    SyntheticKind::UniformLighting,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RealisticKind {
    NaturalTexture,
    NaturalScene,
    ProductShot,
}

const REALISTIC_KINDS: [RealisticKind; 3] = [
    RealisticKind::NaturalTexture,
    RealisticKind::NaturalScene,
    RealisticKind::ProductShot,
];

/// 程序化生成器
///
/// 前几张图片轮流使用每一种生成方式，之后随机挑选。所有随机性来自同一个
/// `StdRng`，同一个 seed 产出逐像素相同的语料。
pub struct ProceduralSource {
    rng: StdRng,
    min_side: u32,
    max_side: u32,
}

impl ProceduralSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            min_side: 200,
            max_side: 400,
        }
    }

    /// 边长范围 [min, max]，测试里用小图加速
    pub fn with_size_range(mut self, min_side: u32, max_side: u32) -> Self {
        self.min_side = min_side.max(16);
        self.max_side = max_side.max(self.min_side);
        self
    }

    fn dimensions(&mut self) -> (u32, u32) {
        let w = self.rng.gen_range(self.min_side..=self.max_side);
        let h = self.rng.gen_range(self.min_side..=self.max_side);
        (w, h)
    }

    fn synthetic_one(&mut self, kind: SyntheticKind) -> RgbImage {
        let (w, h) = self.dimensions();
        let rng = &mut self.rng;
        match kind {
            SyntheticKind::Gradient => {
                let top = random_color(rng, 100, 255);
                let bottom = random_color(rng, 100, 255);
                vertical_gradient(w, h, top, bottom)
            }
            SyntheticKind::Geometric => geometric(rng, w, h),
            SyntheticKind::SmoothBlobs => {
                let mut img = RgbImage::from_pixel(w, h, Rgb([200, 200, 200]));
                for _ in 0..rng.gen_range(3..=8) {
                    let cx = span(rng, w / 4, 3 * w / 4) as i64;
                    let cy = span(rng, h / 4, 3 * h / 4) as i64;
                    let r = span(rng, 30, w.min(h) / 3) as i64;
                    fill_circle(&mut img, cx, cy, r, random_color(rng, 150, 255));
                }
                imageops::blur(&img, 8.0)
            }
            SyntheticKind::TiledTexture => {
                let tile: Vec<[i32; 3]> = (0..16 * 16)
                    .map(|_| [rng.gen_range(0..256), rng.gen_range(0..256), rng.gen_range(0..256)])
                    .collect();
                RgbImage::from_fn(w, h, |x, y| {
                    let base = tile[((y % 16) * 16 + x % 16) as usize];
                    let mut px = [0u8; 3];
                    for c in 0..3 {
                        px[c] = clamp_u8(base[c] + rng.gen_range(-10..=10));
                    }
                    Rgb(px)
                })
            }
            SyntheticKind::UniformLighting => {
                let top = random_color(rng, 180, 255);
                let bottom = random_color(rng, 180, 255);
                let mut img = vertical_gradient(w, h, top, bottom);
                for _ in 0..rng.gen_range(2..=5) {
                    let x1 = rng.gen_range(0..=w / 2);
                    let y1 = rng.gen_range(0..=h / 2);
                    let x2 = x1 + span(rng, 50, w / 3);
                    let y2 = y1 + span(rng, 50, h / 3);
                    fill_rect(&mut img, x1, y1, x2, y2, random_color(rng, 100, 255));
                }
                imageops::blur(&img, 2.0)
            }
        }
    }

    fn realistic_one(&mut self, kind: RealisticKind) -> Result<RgbImage, CorpusError> {
        let (w, h) = self.dimensions();
        let rng = &mut self.rng;
        let base = match kind {
            RealisticKind::NaturalTexture => natural_texture(rng, w, h),
            RealisticKind::NaturalScene => natural_scene(rng, w, h),
            RealisticKind::ProductShot => product_shot(rng, w, h),
        };
        let processed = camera_processing(rng, base);
        let intensity = rng.gen_range(0.05..0.15);
        add_camera_noise(rng, processed, intensity)
    }
}

impl ImageSource for ProceduralSource {
    fn synthetic(&mut self, count: usize) -> Result<Vec<RgbImage>, CorpusError> {
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let kind = if i < SYNTHETIC_KINDS.len() {
                SYNTHETIC_KINDS[i]
            } else {
                SYNTHETIC_KINDS[self.rng.gen_range(0..SYNTHETIC_KINDS.len())]
            };
            out.push(self.synthetic_one(kind));
        }
        debug!(count, "synthetic images generated");
        Ok(out)
    }

    fn realistic(&mut self, count: usize) -> Result<Vec<RgbImage>, CorpusError> {
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let kind = if i < REALISTIC_KINDS.len() {
                REALISTIC_KINDS[i]
            } else {
                REALISTIC_KINDS[self.rng.gen_range(0..REALISTIC_KINDS.len())]
            };
            out.push(self.realistic_one(kind)?);
        }
        debug!(count, "realistic images generated");
        Ok(out)
    }
}

/// 磁盘上的真实照片目录
///
/// 递归收集 jpg/jpeg/png/bmp，按路径排序后用 seed 抽样至多 `max_images` 个，
/// 读不了的文件跳过，每张图缩放到最长边不超过 768。
#[derive(Debug, Clone)]
pub struct DiskCorpus {
    root: PathBuf,
    max_images: usize,
    seed: u64,
}

impl DiskCorpus {
    pub fn new(root: impl Into<PathBuf>, max_images: usize, seed: u64) -> Self {
        Self {
            root: root.into(),
            max_images,
            seed,
        }
    }

    /// 逐张解码并交给 `visit`，返回成功加载的张数；目录不存在时为 0
    ///
    /// 同一时刻内存里只有一张缩略图，调用方可以边读边提取特征。
    pub fn for_each(&self, mut visit: impl FnMut(RgbImage)) -> Result<usize, CorpusError> {
        let picked = self.sample_paths()?;
        let mut loaded = 0;
        for path in &picked {
            match image::open(path) {
                Ok(img) => {
                    visit(fit_within(img.to_rgb8(), DISK_THUMBNAIL_SIZE).0);
                    loaded += 1;
                }
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable image"),
            }
        }
        info!(
            root = %self.root.display(),
            sampled = picked.len(),
            loaded,
            "disk corpus loaded"
        );
        Ok(loaded)
    }

    /// 按路径排序后用 seed 抽样，保证同一目录同一 seed 得到同一批文件
    fn sample_paths(&self) -> Result<Vec<PathBuf>, CorpusError> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        debug!(root = %self.root.display(), found = files.len(), "disk corpus scanned");

        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok(files
            .choose_multiple(&mut rng, self.max_images)
            .cloned()
            .collect())
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DISK_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// 绘图小工具

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// [lo, hi] 内均匀取值；hi < lo 时取 lo
fn span(rng: &mut StdRng, lo: u32, hi: u32) -> u32 {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

fn random_color(rng: &mut StdRng, lo: u8, hi: u8) -> [u8; 3] {
    [
        rng.gen_range(lo..=hi),
        rng.gen_range(lo..=hi),
        rng.gen_range(lo..=hi),
    ]
}

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 * (1.0 - t) + b as f64 * t) as u8
}

fn vertical_gradient(w: u32, h: u32, top: [u8; 3], bottom: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(w, h, |_, y| {
        let t = y as f64 / h as f64;
        Rgb([
            lerp(top[0], bottom[0], t),
            lerp(top[1], bottom[1], t),
            lerp(top[2], bottom[2], t),
        ])
    })
}

fn fill_rect(img: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, color: [u8; 3]) {
    let (w, h) = img.dimensions();
    for y in y1.min(h)..=y2.min(h.saturating_sub(1)) {
        for x in x1.min(w)..=x2.min(w.saturating_sub(1)) {
            img.put_pixel(x, y, Rgb(color));
        }
    }
}

fn fill_circle(img: &mut RgbImage, cx: i64, cy: i64, r: i64, color: [u8; 3]) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in (cy - r).max(0)..(cy + r + 1).min(h) {
        for x in (cx - r).max(0)..(cx + r + 1).min(w) {
            if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                img.put_pixel(x as u32, y as u32, Rgb(color));
            }
        }
    }
}

/// 同心圆环、同心方框或网格线，浅灰背景
fn geometric(rng: &mut StdRng, w: u32, h: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, Rgb([240, 240, 240]));
    let (cx, cy) = ((w / 2) as f64, (h / 2) as f64);
    let half = (w.min(h) / 2) as f64;

    match rng.gen_range(0..3) {
        0 | 1 => {
            let circles = rng.gen_bool(0.5);
            let (start, step) = if circles { (5.0, 20.0) } else { (20.0, 30.0) };
            let mut rings = Vec::new();
            let mut r = start;
            while r < half {
                rings.push((r, random_color(rng, 100, 255)));
                r += step;
            }
            for (x, y, px) in img.enumerate_pixels_mut() {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                let d = if circles {
                    (dx * dx + dy * dy).sqrt()
                } else {
                    dx.abs().max(dy.abs())
                };
                if let Some((_, color)) = rings.iter().find(|(r, _)| (d - r).abs() <= 1.0) {
                    *px = Rgb(*color);
                }
            }
        }
        _ => {
            let columns: Vec<[u8; 3]> = (0..w.div_ceil(20)).map(|_| random_color(rng, 100, 255)).collect();
            let rows: Vec<[u8; 3]> = (0..h.div_ceil(20)).map(|_| random_color(rng, 100, 255)).collect();
            for (x, y, px) in img.enumerate_pixels_mut() {
                if x % 20 < 2 {
                    *px = Rgb(columns[(x / 20) as usize]);
                } else if y % 20 < 2 {
                    *px = Rgb(rows[(y / 20) as usize]);
                }
            }
        }
    }
    img
}

fn natural_texture(rng: &mut StdRng, w: u32, h: u32) -> RgbImage {
    let base = [
        rng.gen_range(80..=180),
        rng.gen_range(80..=180),
        rng.gen_range(80..=180),
    ];
    RgbImage::from_fn(w, h, |x, y| {
        let (xf, yf) = (x as f64, y as f64);
        let wave = (xf * 0.1).sin() * (yf * 0.1).cos() * 30.0;
        let grain = rng.gen_range(-40..=40) as f64;
        let drift = (xf * 0.05 + yf * 0.03).sin() * 20.0;
        let v = wave + grain + drift;
        Rgb([
            clamp_u8(base[0] + v as i32),
            clamp_u8(base[1] + (v * 0.8) as i32),
            clamp_u8(base[2] + (v * 0.6) as i32),
        ])
    })
}

/// 上半部分天空渐变，下半部分地面，若干带阴影的不规则物体
fn natural_scene(rng: &mut StdRng, w: u32, h: u32) -> RgbImage {
    let mut img = RgbImage::new(w, h);
    let horizon = (h / 2).max(1);
    let sky_top = [
        rng.gen_range(150..=220),
        rng.gen_range(180..=240),
        rng.gen_range(200..=255),
    ];
    let sky_bottom = [
        rng.gen_range(100..=180),
        rng.gen_range(140..=200),
        rng.gen_range(180..=240),
    ];
    for y in 0..horizon.min(h) {
        let t = y as f64 / horizon as f64;
        let mut px = [0u8; 3];
        for c in 0..3 {
            px[c] = clamp_u8(lerp(sky_top[c], sky_bottom[c], t) as i32 + rng.gen_range(-10..=10));
        }
        for x in 0..w {
            img.put_pixel(x, y, Rgb(px));
        }
    }

    let ground: [i32; 3] = [
        rng.gen_range(60..=120),
        rng.gen_range(80..=140),
        rng.gen_range(40..=100),
    ];
    for y in horizon.min(h)..h {
        for strip in (0..w).step_by(5) {
            let v = rng.gen_range(-30..=30);
            let px = Rgb([
                clamp_u8(ground[0] + v),
                clamp_u8(ground[1] + v),
                clamp_u8(ground[2] + v),
            ]);
            for x in strip..(strip + 5).min(w) {
                img.put_pixel(x, y, px);
            }
        }
    }

    for _ in 0..rng.gen_range(2..=5) {
        let ox = span(rng, w / 4, 3 * w / 4) as i64;
        let oy = span(rng, h / 2, 3 * h / 4) as i64;
        let size = rng.gen_range(20..=60i64);
        let color = [
            rng.gen_range(40..=120u8),
            rng.gen_range(60..=140u8),
            rng.gen_range(30..=100u8),
        ];
        let shadow = color.map(|c| c.saturating_sub(50));
        let jitter = rng.gen_range(-10..=10i64);
        fill_circle(&mut img, ox + 5, oy + 5, size + jitter, shadow);
        fill_circle(&mut img, ox, oy, size + jitter, color);
    }
    img
}

/// 浅色背景上的物体轮廓和高光
fn product_shot(rng: &mut StdRng, w: u32, h: u32) -> RgbImage {
    let mut img = RgbImage::new(w, h);
    for y in 0..h {
        let row = 240 - (y as f64 / h as f64 * 40.0) as i32 + rng.gen_range(-10..=10);
        let row = row.clamp(200, 255);
        for strip in (0..w).step_by(10) {
            let shift = ((strip as f64 / w as f64 - 0.5) * 20.0) as i32;
            let v = clamp_u8((row + shift).clamp(200, 255));
            for x in strip..(strip + 10).min(w) {
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
    }

    let (cx, cy) = ((w / 2) as i64, (h / 2) as i64);
    let size = (w.min(h) / 3) as i64;
    let palette = [
        [rng.gen_range(100..=200), rng.gen_range(50..=150), rng.gen_range(50..=150)],
        [rng.gen_range(50..=150), rng.gen_range(100..=200), rng.gen_range(50..=150)],
        [rng.gen_range(50..=150), rng.gen_range(50..=150), rng.gen_range(100..=200)],
    ];
    let body: [i32; 3] = palette[rng.gen_range(0..palette.len())];
    for step in 0..72 {
        let angle = step as f64 * TAU / 72.0;
        let r = (size + rng.gen_range(-5..=5)) as f64;
        let x = cx + (r * angle.cos()) as i64;
        let y = cy + (r * angle.sin()) as i64;
        let color = body.map(|c| clamp_u8(c + rng.gen_range(-20..=20)));
        fill_circle(&mut img, x, y, 2, color);
    }

    let (hx, hy) = (cx - size / 3, cy - size / 3);
    let highlight = (size / 4).max(1);
    for i in (0..highlight).rev() {
        let v = (255.0 * (1.0 - i as f64 / highlight as f64)) as u8;
        fill_circle(&mut img, hx, hy, i, [v, v, v]);
    }
    img
}

/// 相机式处理：偶尔轻微失焦，随机调整对比度、亮度和饱和度
fn camera_processing(rng: &mut StdRng, img: RgbImage) -> RgbImage {
    let mut img = if rng.gen_bool(0.3) {
        imageops::blur(&img, rng.gen_range(0.5..1.5))
    } else {
        img
    };

    let contrast = rng.gen_range(0.9..1.2);
    let brightness = rng.gen_range(0.9..1.1);
    let saturation = rng.gen_range(0.8..1.2);

    let n = (img.width() * img.height()).max(1) as f64;
    let mean_luma = img.pixels().map(|p| luma(p.0)).sum::<f64>() / n;
    for px in img.pixels_mut() {
        let mut c = px.0.map(|v| v as f64);
        for v in c.iter_mut() {
            *v = mean_luma + (*v - mean_luma) * contrast;
            *v *= brightness;
        }
        let gray = luma([c[0], c[1], c[2]].map(|v| v.clamp(0.0, 255.0) as u8));
        px.0 = c.map(|v| (gray + (v - gray) * saturation).round().clamp(0.0, 255.0) as u8);
    }
    img
}

fn luma(p: [u8; 3]) -> f64 {
    0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64
}

/// 每个通道独立的高斯噪声，σ = intensity · 255
fn add_camera_noise(rng: &mut StdRng, mut img: RgbImage, intensity: f64) -> Result<RgbImage, CorpusError> {
    let normal = Normal::new(0.0, intensity * 255.0)
        .map_err(|e| CorpusError::Generator(format!("camera noise: {e}")))?;
    for px in img.pixels_mut() {
        for v in px.0.iter_mut() {
            *v = (*v as f64 + normal.sample(rng)).round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::extract_features;
    use crate::features::schema::FeatureSlot;
    use image::{DynamicImage, ImageOutputFormat};

    fn small(seed: u64) -> ProceduralSource {
        ProceduralSource::new(seed).with_size_range(48, 80)
    }

    #[test]
    fn generation_is_seeded() {
        let a = small(9).synthetic(6).unwrap();
        let b = small(9).synthetic(6).unwrap();
        assert_eq!(a.len(), 6);
        assert!(a.iter().zip(&b).all(|(x, y)| x == y));

        let c = small(10).synthetic(6).unwrap();
        assert!(a.iter().zip(&c).any(|(x, y)| x != y));
    }

    #[test]
    fn sizes_respect_the_configured_range() {
        let mut src = small(3);
        for img in src.synthetic(7).unwrap().iter().chain(&src.realistic(7).unwrap()) {
            let (w, h) = img.dimensions();
            assert!((48..=80).contains(&w) && (48..=80).contains(&h), "{w}x{h}");
        }
    }

    #[test]
    fn realistic_images_are_noisier() {
        let mut src = small(42);
        let median_noise = |imgs: &[RgbImage]| {
            let mut v: Vec<f32> = imgs
                .iter()
                .map(|img| extract_features(img).get(FeatureSlot::NoiseEnergy))
                .collect();
            v.sort_by(f32::total_cmp);
            v[v.len() / 2]
        };
        let synthetic = median_noise(&src.synthetic(10).unwrap());
        let realistic = median_noise(&src.realistic(10).unwrap());
        assert!(realistic > synthetic, "realistic {realistic} vs synthetic {synthetic}");
    }

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbImage::from_pixel(w, h, Rgb([10, 120, 200]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        fs::write(path, buf).unwrap();
    }

    #[test]
    fn disk_corpus_samples_and_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        write_png(&dir.path().join("one.png"), 20, 10);
        write_png(&nested.join("two.PNG"), 1000, 800);
        write_png(&nested.join("three.png"), 30, 30);
        fs::write(nested.join("broken.jpg"), b"not a jpeg").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut sizes = Vec::new();
        let loaded = DiskCorpus::new(dir.path(), 10, 42)
            .for_each(|img| sizes.push(img.dimensions()))
            .unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(sizes.len(), 3);
        assert!(sizes.iter().all(|&(w, h)| w.max(h) <= DISK_THUMBNAIL_SIZE));
        assert!(sizes.contains(&(768, 614)));

        let capped = DiskCorpus::new(dir.path(), 2, 42).for_each(|_| {}).unwrap();
        assert!(capped <= 2);

        let a = DiskCorpus::new(dir.path(), 2, 7).sample_paths().unwrap();
        let b = DiskCorpus::new(dir.path(), 2, 7).sample_paths().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = DiskCorpus::new(dir.path().join("nope"), 10, 1);
        let mut seen = 0;
        assert_eq!(corpus.for_each(|_| seen += 1).unwrap(), 0);
        assert_eq!(seen, 0);
    }
}
