//! 解释引擎：指纹 + 概率 + 标签 → 不超过 8 条可读理由
//!
//! 顺序固定：特征异常 → 按标签给出的建议 → 缩放提示 → 置信度总结 → 免责声明。
//! 拼好之后截断到前 8 条，免责声明可能被截掉。

use crate::features::schema::FeatureSlot;
use crate::fingerprint::Fingerprint;
use crate::predictor::Label;
use crate::preprocess::ImageMeta;

pub const MAX_REASONS: usize = 8;
pub const DISCLAIMER: &str = "This tool suggests, doesn't punish. Human review recommended.";

/// 三个通道标准差的总体标准差低于此值视为颜色分布过于均匀
const COLOR_UNIFORMITY_LIMIT: f32 = 5.0;
const SATURATION_HIGH: f32 = 200.0;
const SATURATION_FLAT: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    SmoothEdges,
    SharpEdges,
    UniformSharpness,
    ExcessiveSharpening,
    LimitedPalette,
    LowNoise,
    SmoothTexture,
    RepetitivePatterns,
    UnusualCompression,
    UniformBlocks,
    UniformColorDistribution,
    UniformSaturation,
}

impl Anomaly {
    pub fn description(self) -> &'static str {
        match self {
            Anomaly::SmoothEdges => "unusually smooth edges",
            Anomaly::SharpEdges => "overly sharp artificial edges",
            Anomaly::UniformSharpness => "unnaturally uniform sharpness",
            Anomaly::ExcessiveSharpening => "excessive artificial sharpening",
            Anomaly::LimitedPalette => "limited color palette typical of generated images",
            Anomaly::LowNoise => "suspiciously low noise levels",
            Anomaly::SmoothTexture => "overly smooth textures",
            Anomaly::RepetitivePatterns => "repetitive artificial patterns detected",
            Anomaly::UnusualCompression => "unusual compression characteristics",
            Anomaly::UniformBlocks => "uniform block patterns suggest artificial generation",
            Anomaly::UniformColorDistribution => "unnaturally uniform color distribution",
            Anomaly::UniformSaturation => "artificially high and uniform saturation",
        }
    }
}

/// 生成理由所需的上下文
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReasonContext {
    pub probability: f32,
    pub label: Label,
    pub meta: Option<ImageMeta>,
}

/// 按固定顺序检查每条异常：边缘、锐度、颜色、噪声、纹理、周期、压缩、块、颜色分布、饱和度
pub fn analyze_anomalies(fp: &Fingerprint) -> Vec<Anomaly> {
    let mut out = Vec::new();
    let below = |slot: FeatureSlot| slot.band().is_some_and(|b| b.is_below(fp.get(slot)));
    let above = |slot: FeatureSlot| slot.band().is_some_and(|b| b.is_above(fp.get(slot)));

    if below(FeatureSlot::EdgeDensity) {
        out.push(Anomaly::SmoothEdges);
    } else if above(FeatureSlot::EdgeDensity) {
        out.push(Anomaly::SharpEdges);
    }

    if below(FeatureSlot::LaplacianVar) {
        out.push(Anomaly::UniformSharpness);
    } else if above(FeatureSlot::LaplacianVar) {
        out.push(Anomaly::ExcessiveSharpening);
    }

    if below(FeatureSlot::ColorEntropy) {
        out.push(Anomaly::LimitedPalette);
    }
    if below(FeatureSlot::NoiseEnergy) {
        out.push(Anomaly::LowNoise);
    }
    if below(FeatureSlot::TextureMean) {
        out.push(Anomaly::SmoothTexture);
    }
    if above(FeatureSlot::Periodicity) {
        out.push(Anomaly::RepetitivePatterns);
    }
    if below(FeatureSlot::DctMean) {
        out.push(Anomaly::UnusualCompression);
    }
    if below(FeatureSlot::VarRatio) {
        out.push(Anomaly::UniformBlocks);
    }

    let stds = [
        fp.get(FeatureSlot::RStd),
        fp.get(FeatureSlot::GStd),
        fp.get(FeatureSlot::BStd),
    ];
    if population_std(&stds) < COLOR_UNIFORMITY_LIMIT {
        out.push(Anomaly::UniformColorDistribution);
    }

    if fp.get(FeatureSlot::SatMean) > SATURATION_HIGH && fp.get(FeatureSlot::SatStd) < SATURATION_FLAT {
        out.push(Anomaly::UniformSaturation);
    }
    out
}

fn population_std(values: &[f32; 3]) -> f32 {
    let mean = values.iter().sum::<f32>() / 3.0;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 3.0).sqrt()
}

fn guidance(label: Label, p: f32) -> Vec<&'static str> {
    let mut out = Vec::with_capacity(4);
    match label {
        Label::Synthetic => {
            out.extend([
                "Needs Real Proof — Consider uploading real-world photos (multiple angles, material close-ups, scale references).",
                "Avoid oversmoothing and uniform lighting.",
                "Include natural imperfections and realistic shadows.",
            ]);
            if p > 0.9 {
                out.push("Very high confidence this is AI-generated content.");
            }
        }
        Label::Suspicious => {
            out.extend([
                "Looks Suspicious — Lighting/texture patterns are atypical.",
                "Add more real photos to increase confidence.",
                "Consider including photos with natural backgrounds and varied lighting.",
            ]);
            if p > 0.6 {
                out.push("Several indicators suggest possible AI generation.");
            } else {
                out.push("Some unusual patterns detected, but may be due to heavy processing.");
            }
        }
        Label::Authentic => {
            out.extend([
                "Verified — Signals look consistent with real photography.",
                "Good natural variation in lighting and texture detected.",
            ]);
            if p < 0.05 {
                out.push("Strong indicators of authentic photography.");
            }
        }
    }
    out
}

fn confidence_summary(p: f32) -> &'static str {
    if p > 0.8 {
        "Multiple strong indicators of artificial generation"
    } else if p > 0.6 {
        "Several suspicious patterns detected"
    } else if p > 0.4 {
        "Mixed signals - some artificial characteristics present"
    } else if p > 0.2 {
        "Mostly natural characteristics with minor anomalies"
    } else {
        "Strong natural photography indicators"
    }
}

pub fn reasons_from_features(fp: &Fingerprint, ctx: &ReasonContext) -> Vec<String> {
    let mut reasons: Vec<String> = analyze_anomalies(fp)
        .into_iter()
        .map(|a| format!("Detected {}", a.description()))
        .collect();

    reasons.extend(guidance(ctx.label, ctx.probability).into_iter().map(String::from));

    if ctx.meta.is_some_and(|m| m.resized) {
        reasons.push("Image was resized for analysis".to_string());
    }

    reasons.push(confidence_summary(ctx.probability).to_string());
    reasons.push(DISCLAIMER.to_string());
    reasons.truncate(MAX_REASONS);
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::extract_features;
    use crate::features::schema::FEATURE_COUNT;
    use image::{Rgb, RgbImage};
    use proptest::prelude::*;

    fn ctx(probability: f32, label: Label) -> ReasonContext {
        ReasonContext {
            probability,
            label,
            meta: None,
        }
    }

    /// 所有带区间的特征都落在区间中间，颜色分布不均匀
    fn unremarkable() -> Fingerprint {
        let mut v = [0.0f32; FEATURE_COUNT];
        for slot in FeatureSlot::ALL {
            if let Some(b) = slot.band() {
                v[slot.index()] = (b.low + b.high) / 2.0;
            }
        }
        v[FeatureSlot::RStd.index()] = 10.0;
        v[FeatureSlot::GStd.index()] = 30.0;
        v[FeatureSlot::BStd.index()] = 50.0;
        Fingerprint::new(v)
    }

    #[test]
    fn uniform_gray_reports_smooth_edges_and_uniform_sharpness() {
        let fp = extract_features(&RgbImage::from_pixel(128, 128, Rgb([128, 128, 128])));
        let reasons = reasons_from_features(&fp, &ctx(0.9, Label::Synthetic));
        assert!(reasons.contains(&"Detected unusually smooth edges".to_string()));
        assert!(reasons.contains(&"Detected unnaturally uniform sharpness".to_string()));
        assert!(reasons.len() <= MAX_REASONS);
    }

    #[test]
    fn anomalies_come_first_in_fixed_order() {
        let mut v = [0.0f32; FEATURE_COUNT];
        v.copy_from_slice(unremarkable().as_slice());
        v[FeatureSlot::EdgeDensity.index()] = 0.5;
        v[FeatureSlot::Periodicity.index()] = 3.0;
        v[FeatureSlot::SatMean.index()] = 230.0;
        v[FeatureSlot::SatStd.index()] = 5.0;
        let anomalies = analyze_anomalies(&Fingerprint::new(v));
        assert_eq!(
            anomalies,
            vec![
                Anomaly::SharpEdges,
                Anomaly::RepetitivePatterns,
                Anomaly::UniformSaturation
            ]
        );
    }

    #[test]
    fn clean_authentic_result() {
        let reasons = reasons_from_features(&unremarkable(), &ctx(0.01, Label::Authentic));
        assert_eq!(
            reasons,
            vec![
                "Verified — Signals look consistent with real photography.",
                "Good natural variation in lighting and texture detected.",
                "Strong indicators of authentic photography.",
                "Strong natural photography indicators",
                DISCLAIMER,
            ]
        );
    }

    #[test]
    fn suspicious_guidance_depends_on_probability() {
        let high = reasons_from_features(&unremarkable(), &ctx(0.65, Label::Suspicious));
        assert!(high.contains(&"Several indicators suggest possible AI generation.".to_string()));
        assert!(high.contains(&"Several suspicious patterns detected".to_string()));

        let low = reasons_from_features(&unremarkable(), &ctx(0.3, Label::Suspicious));
        assert!(low
            .iter()
            .any(|r| r.starts_with("Some unusual patterns detected")));
        assert!(low.contains(&"Mostly natural characteristics with minor anomalies".to_string()));
    }

    #[test]
    fn resize_note_follows_guidance() {
        let meta = ImageMeta {
            original_size: (2000, 1500),
            processed_size: (1024, 768),
            channels: 3,
            resized: true,
        };
        let reasons = reasons_from_features(
            &unremarkable(),
            &ReasonContext {
                probability: 0.95,
                label: Label::Synthetic,
                meta: Some(meta),
            },
        );
        assert_eq!(reasons[4], "Image was resized for analysis");
        assert_eq!(reasons[5], "Multiple strong indicators of artificial generation");
        assert_eq!(reasons.last().map(String::as_str), Some(DISCLAIMER));
    }

    #[test]
    fn truncation_can_drop_the_disclaimer() {
        let fp = extract_features(&RgbImage::from_pixel(64, 64, Rgb([90, 90, 90])));
        let reasons = reasons_from_features(&fp, &ctx(0.95, Label::Synthetic));
        assert_eq!(reasons.len(), MAX_REASONS);
        assert!(!reasons.iter().any(|r| r == DISCLAIMER));
    }

    proptest! {
        #[test]
        fn never_more_than_eight(
            values in proptest::collection::vec(-1e4f32..1e4, FEATURE_COUNT),
            p in 0.0f32..=1.0,
            label_idx in 0usize..3,
        ) {
            let mut raw = [0.0f32; FEATURE_COUNT];
            raw.copy_from_slice(&values);
            let label = [Label::Authentic, Label::Suspicious, Label::Synthetic][label_idx];
            let reasons = reasons_from_features(&Fingerprint::new(raw), &ctx(p, label));
            prop_assert!(!reasons.is_empty());
            prop_assert!(reasons.len() <= MAX_REASONS);
        }
    }
}
