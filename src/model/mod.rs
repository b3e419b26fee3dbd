//! 学习原语：标准化、RBF SVM、概率校准、数据划分、评估指标

pub mod calibration;
pub mod metrics;
pub mod scaler;
pub mod split;
pub mod svm;

pub use calibration::CalibratedSvm;
pub use metrics::MetricsRecord;
pub use scaler::StandardScaler;
pub use svm::SvcParams;
