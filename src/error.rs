use thiserror::Error;

/// 图片字节无法解码，终止性错误，直接返回给调用方，不重试
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid image format or corrupted data: {0}")]
    Format(#[from] image::ImageError),
}

/// 某个子特征提取器失败。不会向外传播：提取器把它折叠成全零指纹
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("raster is empty ({width}x{height})")]
    EmptyRaster { width: u32, height: u32 },
    #[error("{0} extractor produced no samples")]
    NoSamples(&'static str),
}

/// 阈值或环境配置不合法，在服务任何预测之前被拒绝
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("threshold {name} = {value} is outside [0, 1]")]
    ThresholdRange { name: &'static str, value: f32 },
    #[error("thresh_syn ({syn}) must be greater than thresh_auth ({auth})")]
    ThresholdOrder { auth: f32, syn: f32 },
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// 模型仓库（artifact 目录）的读写错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("model not available, train the model first")]
    Unavailable,
    #[error("model and scaler on disk belong to different training runs")]
    Inconsistent,
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// 训练流程中任一阶段失败，整个训练中止，不落盘任何部分产物
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training already in progress")]
    Busy,
    #[error("image source failed: {0}")]
    Source(#[from] CorpusError),
    #[error("insufficient training data: {0}")]
    InsufficientData(String),
    #[error("model fitting failed: {0}")]
    Fit(String),
    #[error("persisting artifacts failed: {0}")]
    Store(#[from] StoreError),
}

/// 训练图片来源（生成器 / 磁盘语料）错误
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("generator failed: {0}")]
    Generator(String),
}

/// 预测管线内部错误；在 Predictor 边界上被折叠成降级结果
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}
