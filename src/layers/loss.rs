//! Classification Losses
//!
//! Both losses take raw class scores `[N, C]` and integer labels `[N]` and
//! return the scalar loss together with its gradient with respect to the
//! scores. Losses end a backward pass, so there is no cache.
//!
//! ## Softmax (cross-entropy)
//!
//! ```text
//! shifted   = x - max(x, axis=1)
//! log_probs = shifted - log(sum(exp(shifted), axis=1))
//! loss      = -mean(log_probs[i, y_i])
//! grad      = (exp(log_probs) - onehot(y)) / N
//! ```
//!
//! Subtracting the row maximum keeps `exp()` from overflowing without
//! changing the result.
//!
//! ## Multiclass SVM (hinge)
//!
//! ```text
//! margins[i, j] = max(0, x[i, j] - x[i, y_i] + 1)   for j != y_i
//! loss          = sum(margins) / N
//! ```

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Check `[N, C]` scores against `N` labels in `[0, C)`.
fn check_labels(op: &'static str, scores: &Tensor, labels: &[usize]) -> Result<(usize, usize)> {
    let (n, c) = scores.dims2(op)?;
    if n == 0 {
        return Err(Error::config(format!("{op}: empty batch")));
    }
    if labels.len() != n {
        return Err(Error::LabelCountMismatch {
            rows: n,
            labels: labels.len(),
        });
    }
    if let Some((row, &label)) = labels.iter().enumerate().find(|(_, &y)| y >= c) {
        return Err(Error::LabelOutOfRange {
            row,
            label,
            classes: c,
        });
    }
    Ok((n, c))
}

/// Softmax loss and gradient
///
/// # Arguments
///
/// * `scores` - Class scores `[N, C]`, `scores[i, j]` is the score of class `j` for example `i`
/// * `labels` - True class of each example, `0 <= labels[i] < C`
///
/// # Returns
///
/// `(loss, grad_scores)` with `grad_scores` of shape `[N, C]`
///
/// # Example
///
/// ```rust
/// # use handgrad::{Tensor, layers::softmax_loss};
/// let scores = Tensor::zeros(vec![2, 4]);
/// let (loss, _) = softmax_loss(&scores, &[0, 3]).unwrap();
/// // uniform scores: loss = ln(C)
/// assert!((loss - 4f64.ln()).abs() < 1e-12);
/// ```
pub fn softmax_loss(scores: &Tensor, labels: &[usize]) -> Result<(f64, Tensor)> {
    let (n, c) = check_labels("softmax_loss", scores, labels)?;

    let mut grad = vec![0.0; n * c];
    let mut loss = 0.0;
    for (i, &y) in labels.iter().enumerate() {
        let row = &scores.data[i * c..(i + 1) * c];

        // Find max for numerical stability
        let max = row.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let log_sum_exp = row.iter().map(|&s| (s - max).exp()).sum::<f64>().ln();

        let grad_row = &mut grad[i * c..(i + 1) * c];
        for (g, &s) in grad_row.iter_mut().zip(row) {
            *g = (s - max - log_sum_exp).exp();
        }
        loss -= row[y] - max - log_sum_exp;
        grad_row[y] -= 1.0;
    }

    let inv_n = 1.0 / n as f64;
    grad.iter_mut().for_each(|g| *g *= inv_n);
    Ok((loss * inv_n, Tensor::new(grad, vec![n, c])?))
}

/// Multiclass SVM (hinge) loss and gradient
///
/// Same argument contract as [`softmax_loss`].
pub fn svm_loss(scores: &Tensor, labels: &[usize]) -> Result<(f64, Tensor)> {
    let (n, c) = check_labels("svm_loss", scores, labels)?;

    let mut grad = vec![0.0; n * c];
    let mut loss = 0.0;
    for (i, &y) in labels.iter().enumerate() {
        let row = &scores.data[i * c..(i + 1) * c];
        let correct = row[y];
        let mut positive = 0usize;
        for j in (0..c).filter(|&j| j != y) {
            let margin = row[j] - correct + 1.0;
            if margin > 0.0 {
                loss += margin;
                grad[i * c + j] = 1.0;
                positive += 1;
            }
        }
        grad[i * c + y] = -(positive as f64);
    }

    let inv_n = 1.0 / n as f64;
    grad.iter_mut().for_each(|g| *g *= inv_n);
    Ok((loss * inv_n, Tensor::new(grad, vec![n, c])?))
}
