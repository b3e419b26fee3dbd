//! Sigmoid（Platt）概率校准
//!
//! P(y=1 | f) = 1 / (1 + exp(A·f + B))，A、B 在留出集上用牛顿法拟合，
//! 目标值做 (N₊+1)/(N₊+2)、1/(N₋+2) 平滑以避免过拟合。

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::split::stratified_folds;
use super::svm::{Svc, SvcParams};
use crate::error::TrainingError;

const MAX_NEWTON_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
const SIGMA: f64 = 1e-12;
const EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaler {
    a: f64,
    b: f64,
}

impl PlattScaler {
    pub fn fit(decisions: &[f64], labels: &[u8]) -> Self {
        let prior1 = labels.iter().filter(|&&l| l == 1).count() as f64;
        let prior0 = labels.len() as f64 - prior1;

        let hi_target = (prior1 + 1.0) / (prior1 + 2.0);
        let lo_target = 1.0 / (prior0 + 2.0);
        let targets: Vec<f64> = labels
            .iter()
            .map(|&l| if l == 1 { hi_target } else { lo_target })
            .collect();

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(decisions, &targets, a, b);

        for iter in 0..MAX_NEWTON_ITER {
            // 梯度与 Hessian
            let (mut h11, mut h22, mut h21) = (SIGMA, SIGMA, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&f, &t) in decisions.iter().zip(&targets) {
                let fapb = f * a + b;
                let (p, q) = if fapb >= 0.0 {
                    let e = (-fapb).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = fapb.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < EPS && g2.abs() < EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            // 回溯线搜索
            let mut step = 1.0;
            let mut improved = false;
            while step >= MIN_STEP {
                let (na, nb) = (a + step * da, b + step * db);
                let nf = objective(decisions, &targets, na, nb);
                if nf < fval + 1e-4 * step * gd {
                    a = na;
                    b = nb;
                    fval = nf;
                    improved = true;
                    break;
                }
                step /= 2.0;
            }
            if !improved {
                debug!(iter, "platt line search failed");
                break;
            }
            if iter + 1 == MAX_NEWTON_ITER {
                warn!("platt scaling reached max iterations");
            }
        }

        Self { a, b }
    }

    pub fn probability(&self, decision: f64) -> f64 {
        let fapb = decision * self.a + self.b;
        if fapb >= 0.0 {
            let e = (-fapb).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + fapb.exp())
        }
    }
}

/// 负对数似然，写成不会溢出的形式
fn objective(decisions: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    decisions
        .iter()
        .zip(targets)
        .map(|(&f, &t)| {
            let fapb = f * a + b;
            if fapb >= 0.0 {
                t * fapb + (1.0 + (-fapb).exp()).ln()
            } else {
                (t - 1.0) * fapb + (1.0 + fapb.exp()).ln()
            }
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Member {
    svc: Svc,
    platt: PlattScaler,
}

/// 交叉校准的 SVM 集成
///
/// 每一折训练一个 SVM，并在该折的留出部分上拟合 Platt 参数；
/// 预测概率为各成员概率的算术平均。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedSvm {
    members: Vec<Member>,
}

impl CalibratedSvm {
    pub fn fit(
        x: &[Vec<f64>],
        labels: &[u8],
        params: &SvcParams,
        folds: usize,
    ) -> Result<Self, TrainingError> {
        if folds < 2 {
            return Err(TrainingError::Fit(format!("need at least 2 folds, got {folds}")));
        }
        let fold_of = stratified_folds(labels, folds);
        let mut members = Vec::with_capacity(folds);

        for k in 0..folds {
            let (mut train_x, mut train_y) = (Vec::new(), Vec::new());
            let (mut held_x, mut held_y) = (Vec::new(), Vec::new());
            for (i, (row, &label)) in x.iter().zip(labels).enumerate() {
                if fold_of[i] == k {
                    held_x.push(row.as_slice());
                    held_y.push(label);
                } else {
                    train_x.push(row.clone());
                    train_y.push(label);
                }
            }
            if held_y.is_empty() {
                return Err(TrainingError::InsufficientData(format!(
                    "fold {k} has no held-out samples"
                )));
            }

            let svc = Svc::fit(&train_x, &train_y, params)?;
            let decisions: Vec<f64> = held_x.iter().map(|row| svc.decision(row)).collect();
            let platt = PlattScaler::fit(&decisions, &held_y);
            debug!(fold = k, held_out = held_y.len(), ?platt, "calibration fold fitted");
            members.push(Member { svc, platt });
        }

        Ok(Self { members })
    }

    /// 类别 1（合成）的概率，范围 [0, 1]
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.members.is_empty() {
            return 0.5;
        }
        let sum: f64 = self
            .members
            .iter()
            .map(|m| m.platt.probability(m.svc.decision(x)))
            .sum();
        (sum / self.members.len() as f64).clamp(0.0, 1.0)
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.members.first().and_then(|m| m.svc.n_features())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platt_is_monotone_in_decision() {
        let decisions = [-3.0, -2.0, -1.5, -0.5, 0.4, 1.0, 2.0, 2.5];
        let labels = [0, 0, 0, 0, 1, 1, 1, 1];
        let platt = PlattScaler::fit(&decisions, &labels);
        assert!(platt.probability(-3.0) < platt.probability(0.0));
        assert!(platt.probability(0.0) < platt.probability(3.0));
        assert!(platt.probability(3.0) > 0.5);
        assert!(platt.probability(-3.0) < 0.5);
    }

    #[test]
    fn platt_probability_is_bounded_for_extreme_inputs() {
        let platt = PlattScaler { a: -5.0, b: 0.0 };
        for f in [-1e6, -1.0, 0.0, 1.0, 1e6] {
            let p = platt.probability(f);
            assert!((0.0..=1.0).contains(&p), "p({f}) = {p}");
        }
    }

    #[test]
    fn calibrated_ensemble_ranks_classes() {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..30 {
            let d = (i % 10) as f64 * 0.1;
            x.push(vec![-1.5 + d, 0.3 * d]);
            y.push(0);
            x.push(vec![1.5 - d, -0.3 * d]);
            y.push(1);
        }
        let model = CalibratedSvm::fit(&x, &y, &SvcParams::default(), 3).unwrap();
        assert_eq!(model.n_members(), 3);
        assert_eq!(model.n_features(), Some(2));
        assert!(model.predict_proba(&[2.0, 0.0]) > 0.5);
        assert!(model.predict_proba(&[-2.0, 0.0]) < 0.5);
    }

    #[test]
    fn too_few_folds_is_an_error() {
        let x = vec![vec![0.0], vec![1.0]];
        assert!(CalibratedSvm::fit(&x, &[0, 1], &SvcParams::default(), 1).is_err());
    }
}
