use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use image::RgbImage;
use tracing::{info, warn};

use crate::config::Config;
use crate::corpus::{DiskCorpus, ImageSource};
use crate::error::TrainingError;
use crate::features::{schema::FEATURE_COUNT, try_extract, Extraction};
use crate::fingerprint::Fingerprint;
use crate::model::metrics::{accuracy, classification_report, confusion_matrix};
use crate::model::split::stratified_split;
use crate::model::{CalibratedSvm, MetricsRecord, StandardScaler, SvcParams};
use crate::store::{ModelArtifact, ModelStore};

pub const LABEL_REALISTIC: u8 = 0;
pub const LABEL_SYNTHETIC: u8 = 1;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub samples_per_class: usize,
    pub seed: u64,
    pub test_fraction: f64,
    pub cv_folds: usize,
    /// 额外的真实照片目录；不存在时忽略
    pub real_corpus: Option<PathBuf>,
    pub max_disk_images: usize,
    pub svc: SvcParams,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            samples_per_class: 60,
            seed: 42,
            test_fraction: 0.2,
            cv_folds: 3,
            real_corpus: None,
            max_disk_images: 2000,
            svc: SvcParams::default(),
        }
    }
}

impl TrainOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            samples_per_class: config.samples_per_class,
            seed: config.train_seed,
            real_corpus: config.real_corpus_dir.clone(),
            ..Self::default()
        }
    }
}

/// 一次训练用的带标签数据集，训练结束即丢弃
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub rows: Vec<Fingerprint>,
    pub labels: Vec<u8>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, label: u8) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    fn push_image(&mut self, img: &RgbImage, label: u8) {
        let extraction = try_extract(img);
        if let Extraction::Degraded { reason, .. } = &extraction {
            warn!(index = self.rows.len(), label, %reason, "feature extraction degraded, using zero row");
        }
        self.rows.push(extraction.fingerprint());
        self.labels.push(label);
    }

    fn push_images(&mut self, images: &[RgbImage], label: u8) {
        for img in images {
            self.push_image(img, label);
        }
    }
}

/// 模型训练器
///
/// **流程**: 取图 → 提取指纹 → 分层划分 → 标准化 → RBF SVM + sigmoid 校准
/// → 测试集评估 → 整体落盘并热替换。任何一步失败都不会写入部分产物。
pub struct Trainer {
    options: TrainOptions,
}

impl Trainer {
    pub fn new(options: TrainOptions) -> Self {
        Self { options }
    }

    /// 阻塞等待训练锁，适合启动时的一次性训练
    pub fn train(
        &self,
        source: &mut dyn ImageSource,
        store: &ModelStore,
    ) -> Result<MetricsRecord, TrainingError> {
        let _guard = store.retrain_lock();
        self.train_locked(source, store)
    }

    /// 已有训练在进行时立即返回 `TrainingError::Busy`；锁一直持有到落盘完成
    pub fn try_train(
        &self,
        source: &mut dyn ImageSource,
        store: &ModelStore,
    ) -> Result<MetricsRecord, TrainingError> {
        let _guard = store.try_retrain_lock().ok_or(TrainingError::Busy)?;
        self.train_locked(source, store)
    }

    fn train_locked(
        &self,
        source: &mut dyn ImageSource,
        store: &ModelStore,
    ) -> Result<MetricsRecord, TrainingError> {
        let started = Instant::now();

        let (dataset, disk_used) = self.build_dataset(source)?;
        info!(
            samples = dataset.len(),
            synthetic = dataset.count(LABEL_SYNTHETIC),
            realistic = dataset.count(LABEL_REALISTIC),
            disk_used,
            "training dataset ready"
        );

        let (artifact, mut metrics) = self.fit(&dataset)?;
        metrics.disk_real_images_used = disk_used;
        metrics.training_time_seconds = started.elapsed().as_secs_f64();

        store.save(artifact, metrics.clone())?;
        info!(
            accuracy = metrics.accuracy,
            n_train = metrics.n_train,
            n_test = metrics.n_test,
            seconds = metrics.training_time_seconds,
            "model trained"
        );
        Ok(metrics)
    }

    /// N 张合成 + N 张程序化真实 +（可选）磁盘真实照片；返回数据集和磁盘图片数
    pub fn build_dataset(&self, source: &mut dyn ImageSource) -> Result<(Dataset, usize), TrainingError> {
        let n = self.options.samples_per_class;
        let mut dataset = Dataset::default();
        dataset.push_images(&source.synthetic(n)?, LABEL_SYNTHETIC);
        dataset.push_images(&source.realistic(n)?, LABEL_REALISTIC);

        // 磁盘照片可能上千张，边读边提取，不整体驻留内存
        let mut disk_used = 0;
        if let Some(root) = &self.options.real_corpus {
            disk_used = DiskCorpus::new(root, self.options.max_disk_images, self.options.seed)
                .for_each(|img| dataset.push_image(&img, LABEL_REALISTIC))?;
            if disk_used > 0 {
                info!(count = disk_used, root = %root.display(), "mixed in disk images");
            }
        }
        Ok((dataset, disk_used))
    }

    /// 纯计算部分：不落盘，训练时长与磁盘图片数由调用方填写
    pub fn fit(&self, dataset: &Dataset) -> Result<(ModelArtifact, MetricsRecord), TrainingError> {
        let (train_idx, test_idx) =
            stratified_split(&dataset.labels, self.options.test_fraction, self.options.seed);

        for label in [LABEL_REALISTIC, LABEL_SYNTHETIC] {
            let in_train = train_idx.iter().filter(|&&i| dataset.labels[i] == label).count();
            if in_train < self.options.cv_folds {
                return Err(TrainingError::InsufficientData(format!(
                    "class {label} has {in_train} training samples, need at least {}",
                    self.options.cv_folds
                )));
            }
        }

        let rows = |idx: &[usize]| -> Vec<Vec<f64>> {
            idx.iter().map(|&i| dataset.rows[i].to_f64()).collect()
        };
        let labels = |idx: &[usize]| -> Vec<u8> { idx.iter().map(|&i| dataset.labels[i]).collect() };

        let (x_train, y_train) = (rows(&train_idx), labels(&train_idx));
        let (x_test, y_test) = (rows(&test_idx), labels(&test_idx));

        let scaler = StandardScaler::fit(&x_train)?;
        let x_train = scaler.transform_all(&x_train);
        let x_test = scaler.transform_all(&x_test);

        let classifier = CalibratedSvm::fit(&x_train, &y_train, &self.options.svc, self.options.cv_folds)?;

        let predicted: Vec<u8> = x_test
            .iter()
            .map(|row| (classifier.predict_proba(row) >= 0.5) as u8)
            .collect();

        let metrics = MetricsRecord {
            accuracy: accuracy(&y_test, &predicted),
            n_train: y_train.len(),
            n_test: y_test.len(),
            n_features: FEATURE_COUNT,
            classification_report: classification_report(&y_test, &predicted),
            confusion_matrix: confusion_matrix(&y_test, &predicted),
            training_time_seconds: 0.0,
            disk_real_images_used: 0,
            trained_at: Utc::now(),
        };
        Ok((ModelArtifact { scaler, classifier }, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::ProceduralSource;
    use crate::error::CorpusError;

    fn small_options(samples_per_class: usize) -> TrainOptions {
        TrainOptions {
            samples_per_class,
            ..TrainOptions::default()
        }
    }

    #[test]
    fn trains_and_persists_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut source = ProceduralSource::new(42).with_size_range(48, 96);

        let metrics = Trainer::new(small_options(15)).train(&mut source, &store).unwrap();
        assert_eq!(metrics.n_train + metrics.n_test, 30);
        assert_eq!(metrics.n_test, 6);
        assert_eq!(metrics.n_features, 31);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        assert_eq!(
            metrics.confusion_matrix.iter().flatten().sum::<usize>(),
            metrics.n_test
        );
        assert!(store.is_model_available());
        assert!(dir.path().join("metrics.json").exists());
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut source = ProceduralSource::new(1).with_size_range(32, 40);
        let err = Trainer::new(small_options(2)).train(&mut source, &store).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData(_)), "{err}");
        assert!(!store.is_model_available());
        assert!(!dir.path().join("model.json").exists());
    }

    #[test]
    fn concurrent_training_is_rejected_as_busy() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let held = store.retrain_lock();

        let mut source = ProceduralSource::new(3).with_size_range(32, 40);
        let err = Trainer::new(small_options(6)).try_train(&mut source, &store).unwrap_err();
        assert!(matches!(err, TrainingError::Busy), "{err}");
        assert!(!store.is_model_available());

        drop(held);
        let mut source = ProceduralSource::new(3).with_size_range(32, 40);
        assert!(Trainer::new(small_options(6)).try_train(&mut source, &store).is_ok());
        // 训练结束后锁已释放
        assert!(store.try_retrain_lock().is_some());
    }

    struct BrokenSource;

    impl ImageSource for BrokenSource {
        fn synthetic(&mut self, _count: usize) -> Result<Vec<RgbImage>, CorpusError> {
            Err(CorpusError::Generator("renderer offline".into()))
        }

        fn realistic(&mut self, count: usize) -> Result<Vec<RgbImage>, CorpusError> {
            Ok(vec![RgbImage::new(8, 8); count])
        }
    }

    #[test]
    fn source_failure_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let err = Trainer::new(small_options(10)).train(&mut BrokenSource, &store).unwrap_err();
        assert!(matches!(err, TrainingError::Source(_)));
        assert!(!dir.path().join("scaler.json").exists());
    }

    #[test]
    fn disk_images_join_the_realistic_class() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(&real).unwrap();
        for i in 0..3u8 {
            let img = RgbImage::from_fn(40, 30, |x, y| image::Rgb([(x * 5) as u8, (y * 7) as u8, i * 40]));
            img.save(real.join(format!("photo{i}.png"))).unwrap();
        }
        let trainer = Trainer::new(TrainOptions {
            real_corpus: Some(real),
            ..small_options(4)
        });
        let mut source = ProceduralSource::new(5).with_size_range(32, 48);
        let (dataset, disk_used) = trainer.build_dataset(&mut source).unwrap();
        assert_eq!(disk_used, 3);
        assert_eq!(dataset.count(LABEL_SYNTHETIC), 4);
        assert_eq!(dataset.count(LABEL_REALISTIC), 7);
    }
}
