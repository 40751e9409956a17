//! Numerical Gradient Checking
//!
//! Analytic backward passes are verified against centered finite
//! differences:
//!
//! ```text
//! df/dx_i ~= (f(x + h*e_i) - f(x - h*e_i)) / 2h
//! ```
//!
//! For a tensor-valued `f` the upstream gradient `dout` is folded in, which
//! gives the same quantity a backward pass computes:
//!
//! ```text
//! grad_i = sum((f(x + h*e_i) - f(x - h*e_i)) * dout) / 2h
//! ```
//!
//! Every evaluation perturbs a single element and restores it afterwards,
//! so the check costs `2 * numel(x)` calls of `f`.

use crate::error::Result;
use crate::tensor::Tensor;

/// Default finite-difference step
pub const DEFAULT_STEP: f64 = 1e-5;

/// Numerical gradient of a scalar function at `x`
///
/// # Example
///
/// ```rust
/// # use handgrad::{Tensor, gradient_check::eval_numerical_gradient};
/// let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![3]).unwrap();
/// // f(x) = sum(x^2), df/dx = 2x
/// let grad = eval_numerical_gradient(|t| Ok(t.data.iter().map(|v| v * v).sum()), &x, 1e-5).unwrap();
/// for (g, v) in grad.data.iter().zip(&x.data) {
///     assert!((g - 2.0 * v).abs() < 1e-6);
/// }
/// ```
pub fn eval_numerical_gradient<F>(mut f: F, x: &Tensor, h: f64) -> Result<Tensor>
where
    F: FnMut(&Tensor) -> Result<f64>,
{
    let mut probe = x.clone();
    let mut grad = Tensor::zeros(x.shape.clone());
    for i in 0..x.numel() {
        let orig = probe.data[i];
        probe.data[i] = orig + h;
        let plus = f(&probe)?;
        probe.data[i] = orig - h;
        let minus = f(&probe)?;
        probe.data[i] = orig;
        grad.data[i] = (plus - minus) / (2.0 * h);
    }
    Ok(grad)
}

/// Numerical gradient of a tensor function at `x`, contracted with `dout`
///
/// `dout` must have the shape `f` returns.
pub fn eval_numerical_gradient_array<F>(mut f: F, x: &Tensor, dout: &Tensor, h: f64) -> Result<Tensor>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    let mut probe = x.clone();
    let mut grad = Tensor::zeros(x.shape.clone());
    for i in 0..x.numel() {
        let orig = probe.data[i];
        probe.data[i] = orig + h;
        let plus = f(&probe)?;
        probe.data[i] = orig - h;
        let minus = f(&probe)?;
        probe.data[i] = orig;

        plus.expect_shape("eval_numerical_gradient_array", &dout.shape)?;
        minus.expect_shape("eval_numerical_gradient_array", &dout.shape)?;
        let dot: f64 = plus
            .data
            .iter()
            .zip(&minus.data)
            .zip(&dout.data)
            .map(|((p, m), d)| (p - m) * d)
            .sum();
        grad.data[i] = dot / (2.0 * h);
    }
    Ok(grad)
}

/// Maximum elementwise relative error `|a - b| / max(1e-8, |a| + |b|)`
///
/// # Errors
///
/// [`crate::Error::ShapeMismatch`] if the tensors differ in shape.
pub fn rel_error(a: &Tensor, b: &Tensor) -> Result<f64> {
    b.expect_shape("rel_error", &a.shape)?;
    Ok(a.data
        .iter()
        .zip(&b.data)
        .map(|(x, y)| (x - y).abs() / (x.abs() + y.abs()).max(1e-8))
        .fold(0.0, f64::max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_gradient_of_cubic() {
        let x = Tensor::new(vec![0.5, -1.5, 2.0, 1.0], vec![2, 2]).unwrap();
        let grad = eval_numerical_gradient(
            |t| Ok(t.data.iter().map(|v| v * v * v).sum()),
            &x,
            DEFAULT_STEP,
        )
        .unwrap();
        let analytic = x.map(|v| 3.0 * v * v);
        assert!(rel_error(&grad, &analytic).unwrap() < 1e-7);
        // the probe must not leak into the caller's tensor
        assert_eq!(x.data, vec![0.5, -1.5, 2.0, 1.0]);
    }

    #[test]
    fn test_array_gradient_contracts_with_dout() {
        // f(x) = 2x elementwise, so grad = 2 * dout
        let x = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]).unwrap();
        let dout = Tensor::new(vec![0.5, -1.0, 4.0], vec![3]).unwrap();
        let grad =
            eval_numerical_gradient_array(|t| Ok(t.mul_scalar(2.0)), &x, &dout, DEFAULT_STEP)
                .unwrap();
        for (g, d) in grad.data.iter().zip(&dout.data) {
            assert!((g - 2.0 * d).abs() < 1e-8);
        }
    }

    #[test]
    fn test_rel_error() {
        let a = Tensor::new(vec![1.0, 0.0, -2.0], vec![3]).unwrap();
        let b = Tensor::new(vec![1.0, 0.0, -2.2], vec![3]).unwrap();
        assert!((rel_error(&a, &b).unwrap() - 0.2 / 4.2).abs() < 1e-12);
        assert_eq!(rel_error(&a, &a).unwrap(), 0.0);
        assert!(rel_error(&a, &Tensor::zeros(vec![2])).is_err());
    }
}
