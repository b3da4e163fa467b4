//! Cross-Entropy Loss
//!
//! Mean negative log-likelihood of the target ids over every position:
//!
//! ```text
//! loss = -1/N × Σ_i log softmax(logits_i)[target_i]
//! ```
//!
//! computed per row as `logsumexp(logits_i) - logits_i[target_i]` so large
//! logits never overflow. The gradient w.r.t. the logits is
//! `(softmax(logits) - onehot(target)) / N`.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Mean cross-entropy of `[N, V]` logits against `N` target ids
pub fn cross_entropy(logits: &Tensor, targets: &[usize]) -> f32 {
    let vocab = logits.last_dim();
    assert_eq!(logits.rows(), targets.len(), "one target per logits row");

    // per-row terms are summed in order so the result doesn't depend on scheduling
    let per_row: Vec<f64> = logits
        .data
        .par_chunks(vocab)
        .zip(targets.par_iter())
        .map(|(row, &target)| {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let sum_exp: f32 = row.iter().map(|&v| (v - max).exp()).sum();
            (max + sum_exp.ln() - row[target]) as f64
        })
        .collect();
    let total: f64 = per_row.iter().sum();

    (total / targets.len() as f64) as f32
}

/// Gradient of [`cross_entropy`] w.r.t. the logits, `[N, V]`
pub fn cross_entropy_backward(logits: &Tensor, targets: &[usize]) -> Tensor {
    let vocab = logits.last_dim();
    let n = targets.len() as f32;
    let mut grad = logits.softmax();

    grad.data
        .par_chunks_mut(vocab)
        .zip(targets.par_iter())
        .for_each(|(row, &target)| {
            row[target] -= 1.0;
            for v in row.iter_mut() {
                *v /= n;
            }
        });
    grad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits_give_log_vocab() {
        let logits = Tensor::zeros(vec![3, 16]);
        let loss = cross_entropy(&logits, &[0, 5, 15]);
        assert!((loss - (16.0f32).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_confident_correct_prediction_has_low_loss() {
        let logits = Tensor::new(vec![20.0, 0.0, 0.0, 0.0, 20.0, 0.0], vec![2, 3]);
        assert!(cross_entropy(&logits, &[0, 1]) < 1e-6);
        assert!(cross_entropy(&logits, &[1, 0]) > 19.0);
    }

    #[test]
    fn test_large_logits_stay_finite() {
        let logits = Tensor::new(vec![1e4, -1e4, 0.0], vec![1, 3]);
        let loss = cross_entropy(&logits, &[2]);
        assert!(loss.is_finite());
        assert!((loss - 1e4).abs() < 1.0);
    }

    #[test]
    fn test_gradient_rows_sum_to_zero_and_match_finite_difference() {
        let logits = Tensor::new(vec![0.2, -0.4, 1.0, 0.5, 0.0, -1.0], vec![2, 3]);
        let targets = [2, 0];
        let grad = cross_entropy_backward(&logits, &targets);
        for row in grad.data.chunks(3) {
            assert!(row.iter().sum::<f32>().abs() < 1e-6);
        }
        let eps = 1e-2;
        for i in 0..logits.len() {
            let mut plus = logits.clone();
            plus.data[i] += eps;
            let mut minus = logits.clone();
            minus.data[i] -= eps;
            let numeric =
                (cross_entropy(&plus, &targets) - cross_entropy(&minus, &targets)) / (2.0 * eps);
            assert!((numeric - grad.data[i]).abs() < 1e-3);
        }
    }
}
