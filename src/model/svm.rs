//! RBF 核支持向量分类器（二分类），SMO 求解对偶问题
//!
//! 对偶问题：min ½ αᵀQα − eᵀα，s.t. yᵀα = 0，0 ≤ αᵢ ≤ Cᵢ，
//! 其中 Qᵢⱼ = yᵢyⱼK(xᵢ, xⱼ)，K(x, z) = exp(−γ‖x − z‖²)。
//! 工作集选择使用二阶信息（Fan, Chen & Lin, 2005）。
//! 类别权重按 n / (2·n_c) 平衡，体现在每个样本的上界 Cᵢ 上。

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TrainingError;

const TAU: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvcParams {
    pub c: f64,
    /// None → "scale"：1 / (n_features · Var(X))
    pub gamma: Option<f64>,
    pub tol: f64,
    pub max_iter: usize,
    pub balanced: bool,
}

impl Default for SvcParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: None,
            tol: 1e-3,
            max_iter: 200_000,
            balanced: true,
        }
    }
}

/// 训练好的分类器：决策值 f(x) = Σ coefᵢ·K(svᵢ, x) − ρ，f > 0 判为类别 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Svc {
    gamma: f64,
    rho: f64,
    support_vectors: Vec<Vec<f64>>,
    /// αᵢ·yᵢ
    dual_coef: Vec<f64>,
}

impl Svc {
    /// `labels` 取值 0/1，两类都必须出现
    pub fn fit(x: &[Vec<f64>], labels: &[u8], params: &SvcParams) -> Result<Self, TrainingError> {
        let n = x.len();
        if n != labels.len() {
            return Err(TrainingError::Fit(format!(
                "{} samples but {} labels",
                n,
                labels.len()
            )));
        }
        let n_pos = labels.iter().filter(|&&l| l == 1).count();
        let n_neg = n - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(TrainingError::Fit("both classes must be present".into()));
        }

        let gamma = params.gamma.unwrap_or_else(|| scale_gamma(x));
        let y: Vec<f64> = labels.iter().map(|&l| if l == 1 { 1.0 } else { -1.0 }).collect();
        let upper: Vec<f64> = labels
            .iter()
            .map(|&l| {
                let weight = if !params.balanced {
                    1.0
                } else if l == 1 {
                    n as f64 / (2.0 * n_pos as f64)
                } else {
                    n as f64 / (2.0 * n_neg as f64)
                };
                params.c * weight
            })
            .collect();

        // 核矩阵一次算好；训练集规模在几千以内
        let mut kernel = vec![0.0; n * n];
        for i in 0..n {
            kernel[i * n + i] = 1.0;
            for j in 0..i {
                let k = rbf(&x[i], &x[j], gamma);
                kernel[i * n + j] = k;
                kernel[j * n + i] = k;
            }
        }
        let q = |i: usize, j: usize| y[i] * y[j] * kernel[i * n + j];

        let mut alpha = vec![0.0; n];
        let mut grad = vec![-1.0; n];
        let mut iter = 0;

        loop {
            let Some((i, j)) = select_working_set(&y, &alpha, &grad, &upper, &kernel, n, params.tol)
            else {
                break;
            };
            if iter >= params.max_iter {
                warn!(iter, "SMO reached max_iter before convergence");
                break;
            }
            iter += 1;

            let (old_ai, old_aj) = (alpha[i], alpha[j]);
            let (ci, cj) = (upper[i], upper[j]);
            if y[i] != y[j] {
                let quad = (q(i, i) + q(j, j) + 2.0 * q(i, j)).max(TAU);
                let delta = (-grad[i] - grad[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0.0 {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if diff > ci - cj {
                    if alpha[i] > ci {
                        alpha[i] = ci;
                        alpha[j] = ci - diff;
                    }
                } else if alpha[j] > cj {
                    alpha[j] = cj;
                    alpha[i] = cj + diff;
                }
            } else {
                let quad = (q(i, i) + q(j, j) - 2.0 * q(i, j)).max(TAU);
                let delta = (grad[i] - grad[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > ci {
                    if alpha[i] > ci {
                        alpha[i] = ci;
                        alpha[j] = sum - ci;
                    }
                } else if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = sum;
                }
                if sum > cj {
                    if alpha[j] > cj {
                        alpha[j] = cj;
                        alpha[i] = sum - cj;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = sum;
                }
            }

            let (dai, daj) = (alpha[i] - old_ai, alpha[j] - old_aj);
            for t in 0..n {
                grad[t] += q(t, i) * dai + q(t, j) * daj;
            }
        }

        let rho = compute_rho(&y, &alpha, &grad, &upper);

        let mut support_vectors = Vec::new();
        let mut dual_coef = Vec::new();
        for t in 0..n {
            if alpha[t] > 0.0 {
                support_vectors.push(x[t].clone());
                dual_coef.push(alpha[t] * y[t]);
            }
        }
        debug!(
            iter,
            n_support = support_vectors.len(),
            gamma,
            rho,
            "SVC fitted"
        );

        Ok(Self {
            gamma,
            rho,
            support_vectors,
            dual_coef,
        })
    }

    pub fn decision(&self, x: &[f64]) -> f64 {
        self.support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, coef)| coef * rbf(sv, x, self.gamma))
            .sum::<f64>()
            - self.rho
    }

    pub fn n_support(&self) -> usize {
        self.support_vectors.len()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.support_vectors.first().map(Vec::len)
    }
}

fn rbf(a: &[f64], b: &[f64], gamma: f64) -> f64 {
    let dist: f64 = a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum();
    (-gamma * dist).exp()
}

/// gamma = 1 / (n_features · Var(X))，方差取全部元素
fn scale_gamma(x: &[Vec<f64>]) -> f64 {
    let values: Vec<f64> = x.iter().flatten().copied().collect();
    if values.is_empty() {
        return 1.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let n_features = x[0].len().max(1) as f64;
    if var > 0.0 {
        1.0 / (n_features * var)
    } else {
        1.0
    }
}

fn in_upper_set(y: f64, a: f64, c: f64) -> bool {
    (y > 0.0 && a < c) || (y < 0.0 && a > 0.0)
}

fn in_lower_set(y: f64, a: f64, c: f64) -> bool {
    (y > 0.0 && a > 0.0) || (y < 0.0 && a < c)
}

/// 返回 None 表示已满足 KKT 条件（最大违背量 < tol）
fn select_working_set(
    y: &[f64],
    alpha: &[f64],
    grad: &[f64],
    upper: &[f64],
    kernel: &[f64],
    n: usize,
    tol: f64,
) -> Option<(usize, usize)> {
    // i = argmax_{t ∈ I_up} −yₜ∇ₜ
    let mut gmax = f64::NEG_INFINITY;
    let mut i = None;
    for t in 0..n {
        if in_upper_set(y[t], alpha[t], upper[t]) {
            let v = -y[t] * grad[t];
            if v >= gmax {
                gmax = v;
                i = Some(t);
            }
        }
    }
    let i = i?;

    // j = argmin 二阶目标下降量，t ∈ I_low 且 −yₜ∇ₜ < gmax
    let mut gmax2 = f64::NEG_INFINITY;
    let mut best = f64::INFINITY;
    let mut j = None;
    for t in 0..n {
        if !in_lower_set(y[t], alpha[t], upper[t]) {
            continue;
        }
        let v = y[t] * grad[t];
        if v >= gmax2 {
            gmax2 = v;
        }
        let grad_diff = gmax + v;
        if grad_diff > 0.0 {
            let quad = (2.0 - 2.0 * kernel[i * n + t]).max(TAU);
            let obj = -(grad_diff * grad_diff) / quad;
            if obj <= best {
                best = obj;
                j = Some(t);
            }
        }
    }

    if gmax + gmax2 < tol {
        return None;
    }
    j.map(|j| (i, j))
}

fn compute_rho(y: &[f64], alpha: &[f64], grad: &[f64], upper: &[f64]) -> f64 {
    let mut ub = f64::INFINITY;
    let mut lb = f64::NEG_INFINITY;
    let mut sum_free = 0.0;
    let mut n_free = 0usize;
    for t in 0..y.len() {
        let yg = y[t] * grad[t];
        if alpha[t] >= upper[t] {
            if y[t] < 0.0 {
                ub = ub.min(yg);
            } else {
                lb = lb.max(yg);
            }
        } else if alpha[t] <= 0.0 {
            if y[t] > 0.0 {
                ub = ub.min(yg);
            } else {
                lb = lb.max(yg);
            }
        } else {
            n_free += 1;
            sum_free += yg;
        }
    }
    if n_free > 0 {
        sum_free / n_free as f64
    } else {
        (ub + lb) / 2.0
    }
}
