use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// 按类别的 precision / recall / F1，外加宏平均与加权平均
///
/// JSON 键沿用常见报表格式："0"、"1"、"accuracy"、"macro avg"、"weighted avg"。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    #[serde(rename = "0")]
    pub authentic: ClassScores,
    #[serde(rename = "1")]
    pub synthetic: ClassScores,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: ClassScores,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: ClassScores,
}

/// 训练结果记录，随模型一起落盘为 metrics.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub accuracy: f64,
    pub n_train: usize,
    pub n_test: usize,
    pub n_features: usize,
    pub classification_report: ClassificationReport,
    /// [[TN, FP], [FN, TP]]，行为真实标签
    pub confusion_matrix: [[usize; 2]; 2],
    pub training_time_seconds: f64,
    pub disk_real_images_used: usize,
    pub trained_at: DateTime<Utc>,
}

pub fn confusion_matrix(truth: &[u8], predicted: &[u8]) -> [[usize; 2]; 2] {
    let mut m = [[0usize; 2]; 2];
    for (&t, &p) in truth.iter().zip(predicted) {
        m[(t == 1) as usize][(p == 1) as usize] += 1;
    }
    m
}

pub fn accuracy(truth: &[u8], predicted: &[u8]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    hits as f64 / truth.len() as f64
}

pub fn classification_report(truth: &[u8], predicted: &[u8]) -> ClassificationReport {
    let m = confusion_matrix(truth, predicted);
    let per_class = |c: usize| {
        let tp = m[c][c] as f64;
        let predicted_c = (m[0][c] + m[1][c]) as f64;
        let support = m[c][0] + m[c][1];
        let precision = ratio(tp, predicted_c);
        let recall = ratio(tp, support as f64);
        let f1_score = ratio(2.0 * precision * recall, precision + recall);
        ClassScores {
            precision,
            recall,
            f1_score,
            support,
        }
    };
    let authentic = per_class(0);
    let synthetic = per_class(1);
    let total = authentic.support + synthetic.support;

    let macro_avg = ClassScores {
        precision: (authentic.precision + synthetic.precision) / 2.0,
        recall: (authentic.recall + synthetic.recall) / 2.0,
        f1_score: (authentic.f1_score + synthetic.f1_score) / 2.0,
        support: total,
    };
    let weight = |a: f64, s: f64| {
        ratio(
            a * authentic.support as f64 + s * synthetic.support as f64,
            total as f64,
        )
    };
    let weighted_avg = ClassScores {
        precision: weight(authentic.precision, synthetic.precision),
        recall: weight(authentic.recall, synthetic.recall),
        f1_score: weight(authentic.f1_score, synthetic.f1_score),
        support: total,
    };

    ClassificationReport {
        authentic,
        synthetic,
        accuracy: accuracy(truth, predicted),
        macro_avg,
        weighted_avg,
    }
}

/// 分母为 0 时记 0
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
