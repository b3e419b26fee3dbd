use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::{CalibratedSvm, MetricsRecord, StandardScaler};

pub const SCALER_FILE: &str = "scaler.json";
pub const MODEL_FILE: &str = "model.json";
pub const METRICS_FILE: &str = "metrics.json";

/// 模型产物：标准化器 + 校准后的分类器，总是作为一个整体加载和替换
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub scaler: StandardScaler,
    pub classifier: CalibratedSvm,
}

/// model.json 的落盘格式：分类器 + 与之配对的 scaler.json 的 BLAKE3 摘要
#[derive(Serialize, Deserialize)]
struct ModelFile {
    scaler_digest: String,
    classifier: CalibratedSvm,
}

/// 模型仓库 (Model Store)
///
/// **职责**: 管理 artifact 目录与内存中的当前模型快照。
/// - 读者通过 `snapshot()` 拿到 `Arc`，之后的热替换不影响正在进行的预测。
/// - 内存中没有模型时，`snapshot()` 会在首次使用时从目录懒加载。
/// - 写者（训练）先持有 `retrain_lock()`，同一时刻只有一个训练在落盘。
/// - 两个模型文件都 rename 到位之后才发布新快照；metrics.json 最后写。
pub struct ModelStore {
    dir: PathBuf,
    current: RwLock<Option<Arc<ModelArtifact>>>,
    metrics: RwLock<Option<MetricsRecord>>,
    retrain: Mutex<()>,
}

impl ModelStore {
    /// 空仓库，不读磁盘
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(None),
            metrics: RwLock::new(None),
            retrain: Mutex::new(()),
        }
    }

    /// 打开目录并尝试加载已有产物
    ///
    /// 文件缺失时得到空仓库；文件存在但不一致或损坏时返回错误，不会半加载。
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(dir);
        if store.reload()? {
            info!(dir = %store.dir.display(), "model artifacts loaded");
        } else {
            info!(dir = %store.dir.display(), "no model artifacts found");
        }
        Ok(store)
    }

    pub fn is_model_available(&self) -> bool {
        self.snapshot().is_ok()
    }

    /// 当前模型快照
    ///
    /// 内存里还没有模型时回退到磁盘懒加载（例如另一个进程刚训练完），
    /// 加载成功后缓存；磁盘上也没有时返回 `Unavailable`。
    pub fn snapshot(&self) -> Result<Arc<ModelArtifact>, StoreError> {
        let cached = self.current.read().clone();
        if let Some(artifact) = cached {
            return Ok(artifact);
        }

        let mut current = self.current.write();
        if current.is_none() && self.load_into(&mut current)? {
            info!(dir = %self.dir.display(), "model artifacts loaded lazily");
        }
        current.clone().ok_or(StoreError::Unavailable)
    }

    pub fn metrics(&self) -> Option<MetricsRecord> {
        let missing = self.metrics.read().is_none();
        if missing && self.snapshot().is_err() {
            return None;
        }
        self.metrics.read().clone()
    }

    /// 训练写锁；持有期间其它训练请求阻塞
    pub fn retrain_lock(&self) -> MutexGuard<'_, ()> {
        self.retrain.lock()
    }

    pub fn try_retrain_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.retrain.try_lock()
    }

    /// 原子落盘并热替换
    ///
    /// 顺序：scaler.json.tmp、model.json.tmp 全部写完 → 依次 rename →
    /// metrics.json（tmp + rename）→ 发布内存快照。中途失败时清掉残留的 tmp 文件。
    pub fn save(&self, artifact: ModelArtifact, metrics: MetricsRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let scaler_blob = serde_json::to_vec(&artifact.scaler)?;
        let model_blob = serde_json::to_vec(&ModelFile {
            scaler_digest: blake3::hash(&scaler_blob).to_hex().to_string(),
            classifier: artifact.classifier.clone(),
        })?;
        let metrics_blob = serde_json::to_vec_pretty(&metrics)?;

        let written = self.write_files(&scaler_blob, &model_blob, &metrics_blob);
        if let Err(e) = written {
            for name in [SCALER_FILE, MODEL_FILE, METRICS_FILE] {
                let tmp = self.tmp_path(name);
                if tmp.exists() {
                    if let Err(rm) = fs::remove_file(&tmp) {
                        warn!(path = %tmp.display(), error = %rm, "failed to remove temp file");
                    }
                }
            }
            return Err(e);
        }

        *self.current.write() = Some(Arc::new(artifact));
        *self.metrics.write() = Some(metrics);
        info!(dir = %self.dir.display(), "model artifacts saved");
        Ok(())
    }

    /// 从磁盘重新加载；没有产物时返回 Ok(false) 并保持当前快照
    pub fn reload(&self) -> Result<bool, StoreError> {
        let mut current = self.current.write();
        self.load_into(&mut current)
    }

    fn write_files(&self, scaler: &[u8], model: &[u8], metrics: &[u8]) -> Result<(), StoreError> {
        fs::write(self.tmp_path(SCALER_FILE), scaler)?;
        fs::write(self.tmp_path(MODEL_FILE), model)?;
        fs::rename(self.tmp_path(SCALER_FILE), self.dir.join(SCALER_FILE))?;
        fs::rename(self.tmp_path(MODEL_FILE), self.dir.join(MODEL_FILE))?;

        fs::write(self.tmp_path(METRICS_FILE), metrics)?;
        fs::rename(self.tmp_path(METRICS_FILE), self.dir.join(METRICS_FILE))?;
        Ok(())
    }

    /// 调用方持有 `current` 的写锁，读盘与发布之间不会插入别的写者
    fn load_into(&self, current: &mut Option<Arc<ModelArtifact>>) -> Result<bool, StoreError> {
        match self.load_from_disk()? {
            Some((artifact, metrics)) => {
                *current = Some(Arc::new(artifact));
                *self.metrics.write() = metrics;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.tmp"))
    }

    fn load_from_disk(&self) -> Result<Option<(ModelArtifact, Option<MetricsRecord>)>, StoreError> {
        let scaler_path = self.dir.join(SCALER_FILE);
        let model_path = self.dir.join(MODEL_FILE);
        if !scaler_path.exists() || !model_path.exists() {
            return Ok(None);
        }

        let scaler_blob = fs::read(&scaler_path)?;
        let model: ModelFile = serde_json::from_slice(&fs::read(&model_path)?)?;
        if blake3::hash(&scaler_blob).to_hex().as_str() != model.scaler_digest {
            warn!(dir = %self.dir.display(), "scaler digest mismatch, refusing to load");
            return Err(StoreError::Inconsistent);
        }
        let scaler: StandardScaler = serde_json::from_slice(&scaler_blob)?;

        let metrics = match fs::read(self.dir.join(METRICS_FILE)) {
            Ok(blob) => match serde_json::from_slice(&blob) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(error = %e, "metrics.json unreadable, ignoring");
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Some((
            ModelArtifact {
                scaler,
                classifier: model.classifier,
            },
            metrics,
        )))
    }
}
