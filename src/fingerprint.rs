use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::features::schema::{FeatureSlot, FEATURE_COUNT};

/// 非有限值清洗后的上/下界
pub const INF_REPLACEMENT: f32 = 1e6;

/// 图像指纹：31 维 f32 特征向量
///
/// 提取器、训练器、预测器之间只交换指纹，从不交换图像。
/// 通过 `Fingerprint::new` 构造的指纹保证每个元素都是有限值。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint([f32; FEATURE_COUNT]);

impl Fingerprint {
    /// NaN → 0，+inf → 1e6，-inf → -1e6
    pub fn new(mut values: [f32; FEATURE_COUNT]) -> Self {
        for v in values.iter_mut() {
            *v = sanitize(*v);
        }
        Self(values)
    }

    /// 提取失败时的全零哨兵
    pub const fn zeroed() -> Self {
        Self([0.0; FEATURE_COUNT])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    pub fn get(&self, slot: FeatureSlot) -> f32 {
        self.0[slot.index()]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_f64(&self) -> Vec<f64> {
        self.0.iter().map(|&v| v as f64).collect()
    }

    /// 内容摘要，仅用于复现审计，不参与分类
    pub fn hash(&self) -> String {
        compute_features_hash(self.as_slice())
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::zeroed()
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else if v == f32::INFINITY {
        INF_REPLACEMENT
    } else if v == f32::NEG_INFINITY {
        -INF_REPLACEMENT
    } else {
        v
    }
}

/// 特征向量 → SHA256 小写十六进制
///
/// 序列化方式：每个 f32 按小端字节顺序拼接，与向量在内存中的布局一致。
pub fn compute_features_hash(features: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for v in features {
        hasher.update(v.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_values_are_clamped() {
        let mut raw = [1.5f32; FEATURE_COUNT];
        raw[0] = f32::NAN;
        raw[1] = f32::INFINITY;
        raw[2] = f32::NEG_INFINITY;
        let fp = Fingerprint::new(raw);
        assert_eq!(fp.as_slice()[0], 0.0);
        assert_eq!(fp.as_slice()[1], 1e6);
        assert_eq!(fp.as_slice()[2], -1e6);
        assert_eq!(fp.as_slice()[3], 1.5);
        assert!(fp.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = compute_features_hash(&[1.0, 2.0, 3.0, 4.0]);
        let b = compute_features_hash(&[1.0, 2.0, 3.0, 4.0]);
        let c = compute_features_hash(&[1.0, 2.0, 3.0, 4.000001]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_survives_json_round_trip() {
        let fp = Fingerprint::new([0.125; FEATURE_COUNT]);
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp.hash(), back.hash());
    }

    #[test]
    fn zeroed_is_the_sentinel() {
        assert!(Fingerprint::zeroed().is_zero());
        assert!(!Fingerprint::new([0.1; FEATURE_COUNT]).is_zero());
    }
}
