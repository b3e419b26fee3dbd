//! 图像真实性评分：预处理 → 31 维指纹 → 校准 SVM → 标签与理由

pub mod api;
pub mod config;
pub mod corpus;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod reasons;
pub mod store;
pub mod trainer;

pub use config::{Config, Thresholds};
pub use corpus::{DiskCorpus, ImageSource, ProceduralSource};
pub use features::{extract_features, try_extract, Extraction};
pub use fingerprint::{compute_features_hash, Fingerprint};
pub use predictor::{Analysis, Label, Predictor, ScoreResult};
pub use preprocess::{preprocess, ImageMeta};
pub use reasons::{reasons_from_features, ReasonContext};
pub use store::{ModelArtifact, ModelStore};
pub use trainer::{TrainOptions, Trainer};
