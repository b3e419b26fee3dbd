use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// 分层划分训练/测试集，返回 (train_idx, test_idx)
///
/// 每个类别按 `test_fraction` 四舍五入抽取测试样本；类别样本数 ≥ 2 时
/// 训练和测试两侧至少各保留一个。同一 seed 结果一致。
pub fn stratified_split(labels: &[u8], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in classes(labels) {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let n = idx.len();
        let mut n_test = (n as f64 * test_fraction).round() as usize;
        if n >= 2 {
            n_test = n_test.clamp(1, n - 1);
        } else {
            n_test = 0;
        }
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    (train, test)
}

/// 分层 k 折：每个类别的第 m 个样本落入第 m % k 折，返回每个样本的折号
pub fn stratified_folds(labels: &[u8], k: usize) -> Vec<usize> {
    let mut seen = [0usize; 256];
    labels
        .iter()
        .map(|&l| {
            let fold = seen[l as usize] % k.max(1);
            seen[l as usize] += 1;
            fold
        })
        .collect()
}

fn classes(labels: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = labels.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}
