//! 指纹布局：31 个有名字的槽位，按固定顺序排列
//!
//! 改动顺序或增删槽位都会使已训练的模型失效，需要重新训练。

use serde::Serialize;

pub const EDGE_LEN: usize = 4;
pub const COLOR_LEN: usize = 13;
pub const COMPRESSION_LEN: usize = 6;
pub const NOISE_LEN: usize = 8;

pub const FEATURE_COUNT: usize = 31;

const _: () = assert!(EDGE_LEN + COLOR_LEN + COMPRESSION_LEN + NOISE_LEN == FEATURE_COUNT);
const _: () = assert!(FeatureSlot::ALL.len() == FEATURE_COUNT);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Edge,
    Color,
    Compression,
    NoiseTexture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSlot {
    // === 边缘 (0-3) ===
    EdgeDensity,
    LaplacianVar,
    GradMean,
    GradStd,
    // === 颜色 (4-16) ===
    RMean,
    RStd,
    RSkew,
    GMean,
    GStd,
    GSkew,
    BMean,
    BStd,
    BSkew,
    SatMean,
    SatStd,
    ValMean,
    ColorEntropy,
    // === 压缩 (17-22) ===
    DctMean,
    DctStd,
    DctMax,
    VarMean,
    VarStd,
    VarRatio,
    // === 噪声 / 纹理 (23-30) ===
    NoiseEnergy,
    NoiseMean,
    TextureMean,
    TextureStd,
    FreqRing1,
    FreqRing2,
    FreqRing3,
    Periodicity,
}

impl FeatureSlot {
    /// 与向量下标一一对应
    pub const ALL: [FeatureSlot; 31] = [
        Self::EdgeDensity,
        Self::LaplacianVar,
        Self::GradMean,
        Self::GradStd,
        Self::RMean,
        Self::RStd,
        Self::RSkew,
        Self::GMean,
        Self::GStd,
        Self::GSkew,
        Self::BMean,
        Self::BStd,
        Self::BSkew,
        Self::SatMean,
        Self::SatStd,
        Self::ValMean,
        Self::ColorEntropy,
        Self::DctMean,
        Self::DctStd,
        Self::DctMax,
        Self::VarMean,
        Self::VarStd,
        Self::VarRatio,
        Self::NoiseEnergy,
        Self::NoiseMean,
        Self::TextureMean,
        Self::TextureStd,
        Self::FreqRing1,
        Self::FreqRing2,
        Self::FreqRing3,
        Self::Periodicity,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::EdgeDensity => "edge_density",
            Self::LaplacianVar => "laplacian_var",
            Self::GradMean => "grad_mean",
            Self::GradStd => "grad_std",
            Self::RMean => "r_mean",
            Self::RStd => "r_std",
            Self::RSkew => "r_skew",
            Self::GMean => "g_mean",
            Self::GStd => "g_std",
            Self::GSkew => "g_skew",
            Self::BMean => "b_mean",
            Self::BStd => "b_std",
            Self::BSkew => "b_skew",
            Self::SatMean => "sat_mean",
            Self::SatStd => "sat_std",
            Self::ValMean => "val_mean",
            Self::ColorEntropy => "color_entropy",
            Self::DctMean => "dct_mean",
            Self::DctStd => "dct_std",
            Self::DctMax => "dct_max",
            Self::VarMean => "var_mean",
            Self::VarStd => "var_std",
            Self::VarRatio => "var_ratio",
            Self::NoiseEnergy => "noise_energy",
            Self::NoiseMean => "noise_mean",
            Self::TextureMean => "texture_mean",
            Self::TextureStd => "texture_std",
            Self::FreqRing1 => "freq_ring1",
            Self::FreqRing2 => "freq_ring2",
            Self::FreqRing3 => "freq_ring3",
            Self::Periodicity => "periodicity",
        }
    }

    pub fn group(self) -> FeatureGroup {
        match self.index() {
            i if i < EDGE_LEN => FeatureGroup::Edge,
            i if i < EDGE_LEN + COLOR_LEN => FeatureGroup::Color,
            i if i < EDGE_LEN + COLOR_LEN + COMPRESSION_LEN => FeatureGroup::Compression,
            _ => FeatureGroup::NoiseTexture,
        }
    }

    /// 经验正常区间；落在区间外即视为异常。没有声明区间的槽位返回 None
    pub fn band(self) -> Option<Band> {
        let band = match self {
            Self::EdgeDensity => Band::new(0.02, 0.15),
            Self::LaplacianVar => Band::new(50.0, 500.0),
            Self::ColorEntropy => Band::new(6.0, 8.0),
            Self::NoiseEnergy => Band::new(10.0, 100.0),
            Self::TextureMean => Band::new(20.0, 200.0),
            Self::Periodicity => Band::new(0.8, 1.5),
            Self::DctMean => Band::new(100.0, 1000.0),
            Self::VarRatio => Band::new(0.3, 2.0),
            _ => return None,
        };
        Some(band)
    }
}

/// 闭区间 [low, high]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Band {
    pub low: f32,
    pub high: f32,
}

impl Band {
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    pub fn is_below(&self, value: f32) -> bool {
        value < self.low
    }

    pub fn is_above(&self, value: f32) -> bool {
        value > self.high
    }
}
