use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Thresholds;
use crate::error::ScanError;
use crate::features::{try_extract, Extraction};
use crate::fingerprint::Fingerprint;
use crate::model::MetricsRecord;
use crate::preprocess::{preprocess, ImageMeta, DEFAULT_MAX_SIZE};
use crate::reasons::{reasons_from_features, ReasonContext};
use crate::store::ModelStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Authentic,
    Suspicious,
    Synthetic,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Authentic => "authentic",
            Label::Suspicious => "suspicious",
            Label::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次预测的结果：P(synthetic)、标签、不超过 8 条理由
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub probability: f32,
    pub label: Label,
    pub reasons: Vec<String>,
}

impl ScoreResult {
    /// 任何阶段失败时的降级结果
    pub fn fallback(err: impl fmt::Display) -> Self {
        Self {
            probability: 0.5,
            label: Label::Suspicious,
            reasons: vec![format!("Error in analysis: {err}")],
        }
    }
}

/// 带审计信息的预测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    #[serde(flatten)]
    pub score: ScoreResult,
    /// 指纹摘要；失败时为空串
    pub features_hash: String,
    /// 特征提取降级为全零，或整个预测走了降级路径
    pub degraded: bool,
    pub meta: Option<ImageMeta>,
    pub processing_ms: u64,
}

/// 预测器 (Predictor)
///
/// **职责**: 原始字节 → 预处理 → 指纹 → 标准化 → 校准概率 → 标签 + 理由。
/// 对外永不失败：模型缺失或任何阶段出错都返回 `(0.5, suspicious, ["Error in analysis: …"])`。
/// 阈值可在运行时替换，替换只影响之后开始的预测。
pub struct Predictor {
    store: Arc<ModelStore>,
    thresholds: RwLock<Thresholds>,
    max_size: u32,
}

impl Predictor {
    pub fn new(store: Arc<ModelStore>, thresholds: Thresholds) -> Self {
        Self {
            store,
            thresholds: RwLock::new(thresholds),
            max_size: DEFAULT_MAX_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn predict(&self, bytes: &[u8]) -> ScoreResult {
        self.analyze(bytes).score
    }

    pub fn analyze(&self, bytes: &[u8]) -> Analysis {
        let started = Instant::now();
        let mut analysis = match self.try_analyze(bytes) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "prediction failed, returning fallback");
                Analysis {
                    score: ScoreResult::fallback(&e),
                    features_hash: String::new(),
                    degraded: true,
                    meta: None,
                    processing_ms: 0,
                }
            }
        };
        analysis.processing_ms = started.elapsed().as_millis() as u64;
        analysis
    }

    /// 已解码栅格的打分，跳过预处理
    pub fn score_raster(&self, raster: &RgbImage) -> Result<ScoreResult, ScanError> {
        let extraction = try_extract(raster);
        self.score(&extraction.fingerprint(), None)
    }

    fn try_analyze(&self, bytes: &[u8]) -> Result<Analysis, ScanError> {
        // 先确认模型可用，避免白白解码
        self.store.snapshot()?;

        let (raster, meta) = preprocess(bytes, self.max_size)?;
        let extraction = try_extract(&raster);
        if let Extraction::Degraded { reason, .. } = &extraction {
            warn!(%reason, "feature extraction degraded");
        }
        let fingerprint = extraction.fingerprint();
        let score = self.score(&fingerprint, Some(meta))?;

        Ok(Analysis {
            score,
            features_hash: fingerprint.hash(),
            degraded: extraction.is_degraded(),
            meta: Some(meta),
            processing_ms: 0,
        })
    }

    fn score(&self, fingerprint: &Fingerprint, meta: Option<ImageMeta>) -> Result<ScoreResult, ScanError> {
        let model = self.store.snapshot()?;
        let x = fingerprint.to_f64();
        if model.scaler.n_features() != x.len() {
            return Err(ScanError::Dimension {
                expected: model.scaler.n_features(),
                actual: x.len(),
            });
        }

        let probability = model.classifier.predict_proba(&model.scaler.transform(&x)) as f32;
        let label = self.thresholds.read().classify(probability);
        debug!(probability, %label, "image scored");

        let reasons = reasons_from_features(
            fingerprint,
            &ReasonContext {
                probability,
                label,
                meta,
            },
        );
        Ok(ScoreResult {
            probability,
            label,
            reasons,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        *self.thresholds.write() = thresholds;
    }

    pub fn is_model_available(&self) -> bool {
        self.store.is_model_available()
    }

    pub fn get_metrics(&self) -> Option<MetricsRecord> {
        self.store.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::features::schema::FEATURE_COUNT;
    use crate::model::{CalibratedSvm, StandardScaler, SvcParams};
    use crate::store::tests::tiny_artifact;
    use crate::store::ModelArtifact;
    use image::{DynamicImage, ImageOutputFormat, Rgb};
    use proptest::prelude::*;

    fn png(img: RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    /// 31 维上可分的两团点，足够让预测流程跑通
    fn artifact_31() -> ModelArtifact {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..18 {
            let mut row = vec![0.0; FEATURE_COUNT];
            for (j, v) in row.iter_mut().enumerate() {
                *v = ((i * 7 + j * 3) % 11) as f64;
            }
            let label = (i % 2) as u8;
            row[0] = if label == 1 { 5.0 } else { -5.0 };
            rows.push(row);
            labels.push(label);
        }
        let scaler = StandardScaler::fit(&rows).unwrap();
        let classifier =
            CalibratedSvm::fit(&scaler.transform_all(&rows), &labels, &SvcParams::default(), 3).unwrap();
        ModelArtifact { scaler, classifier }
    }

    fn predictor_with(artifact: ModelArtifact) -> (tempfile::TempDir, Predictor) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ModelStore::new(dir.path()));
        let (_, metrics) = tiny_artifact();
        store.save(artifact, metrics).unwrap();
        (dir, Predictor::new(store, Thresholds::default()))
    }

    fn sample_raster() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, y| {
            Rgb([(x * 3) as u8, (y * 5) as u8, ((x + y) * 2) as u8])
        })
    }

    fn sample_png() -> Vec<u8> {
        png(sample_raster())
    }

    #[test]
    fn untrained_model_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Predictor::new(Arc::new(ModelStore::new(dir.path())), Thresholds::default());
        assert!(!predictor.is_model_available());

        let result = predictor.predict(&sample_png());
        assert_eq!(result.probability, 0.5);
        assert_eq!(result.label, Label::Suspicious);
        assert_eq!(result.reasons.len(), 1);
        assert!(result.reasons[0].starts_with("Error in analysis: "));
    }

    #[test]
    fn undecodable_bytes_fall_back() {
        let (_dir, predictor) = predictor_with(artifact_31());
        let analysis = predictor.analyze(b"definitely not an image");
        assert!(analysis.degraded);
        assert_eq!(analysis.score.label, Label::Suspicious);
        assert!(analysis.score.reasons[0].starts_with("Error in analysis: "));
        assert!(analysis.features_hash.is_empty());
    }

    #[test]
    fn dimension_mismatch_falls_back() {
        let (artifact, _) = tiny_artifact();
        let (_dir, predictor) = predictor_with(artifact);
        let result = predictor.predict(&sample_png());
        assert_eq!(result.probability, 0.5);
        assert!(result.reasons[0].contains("dimension mismatch"));
    }

    #[test]
    fn trained_model_scores_an_image() {
        let (_dir, predictor) = predictor_with(artifact_31());
        let analysis = predictor.analyze(&sample_png());
        let score = &analysis.score;
        assert!((0.0..=1.0).contains(&score.probability));
        assert_eq!(score.label, predictor.thresholds().classify(score.probability));
        assert!(!score.reasons.is_empty() && score.reasons.len() <= 8);
        assert_eq!(analysis.features_hash.len(), 64);
        assert!(!analysis.degraded);
        assert_eq!(analysis.meta.map(|m| m.processed_size), Some((64, 48)));
        assert!(predictor.get_metrics().is_some());
    }

    #[test]
    fn predictions_are_deterministic() {
        let (_dir, predictor) = predictor_with(artifact_31());
        let bytes = sample_png();
        assert_eq!(predictor.predict(&bytes), predictor.predict(&bytes));
    }

    #[test]
    fn threshold_updates_apply_to_later_predictions() {
        let (_dir, predictor) = predictor_with(artifact_31());
        let bytes = sample_png();
        let p = predictor.predict(&bytes).probability;

        let strict = Thresholds::new(0.0, 0.000_001).unwrap();
        predictor.set_thresholds(strict);
        assert_eq!(predictor.thresholds(), strict);
        assert_eq!(predictor.predict(&bytes).label, strict.classify(p));

        let lenient = Thresholds::new(0.999_998, 0.999_999).unwrap();
        predictor.set_thresholds(lenient);
        assert_eq!(predictor.predict(&bytes).label, lenient.classify(p));
    }

    #[test]
    fn large_images_are_resized_before_scoring() {
        let (_dir, predictor) = predictor_with(artifact_31());
        let predictor = predictor.with_max_size(32);
        let analysis = predictor.analyze(&sample_png());
        let meta = analysis.meta.unwrap();
        assert!(meta.resized);
        assert_eq!(meta.original_size, (64, 48));
        assert_eq!(meta.processed_size, (32, 24));
    }

    #[test]
    fn raster_scoring_matches_byte_scoring() {
        let (_dir, predictor) = predictor_with(artifact_31());
        let from_raster = predictor.score_raster(&sample_raster()).unwrap();
        assert_eq!(from_raster, predictor.predict(&sample_png()));

        let dir = tempfile::tempdir().unwrap();
        let empty = Predictor::new(Arc::new(ModelStore::new(dir.path())), Thresholds::default());
        assert!(matches!(
            empty.score_raster(&sample_raster()),
            Err(ScanError::Store(StoreError::Unavailable))
        ));
    }

    #[test]
    fn label_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Label::Synthetic).unwrap(), "\"synthetic\"");
        assert_eq!(Label::Authentic.to_string(), "authentic");
    }

    proptest! {
        #[test]
        fn labels_partition_the_unit_interval(
            a in 0.0f32..1.0,
            b in 0.0f32..1.0,
            p in 0.0f32..=1.0,
        ) {
            prop_assume!(a != b);
            let (auth, syn) = if a < b { (a, b) } else { (b, a) };
            let t = Thresholds::new(auth, syn).unwrap();
            let expected = if p < auth {
                Label::Authentic
            } else if p < syn {
                Label::Suspicious
            } else {
                Label::Synthetic
            };
            prop_assert_eq!(t.classify(p), expected);
        }
    }
}
