//! Max Pooling (naive)
//!
//! Each output cell is the maximum of one `pool_height x pool_width` window
//! of a single channel. Windows step by `stride` along both axes and there
//! is no padding.
//!
//! The forward pass records where each maximum came from (the flat index of
//! its first occurrence in row-major window order), so the backward pass is
//! a scatter:
//!
//! ```text
//! dx[argmax[n, c, i, j]] += dout[n, c, i, j]
//! ```
//!
//! Overlapping windows (`stride < pool size`) can pick the same input cell,
//! in which case its gradient is the sum of every window that chose it.

use rayon::prelude::*;

use crate::config::{output_extent, PoolOptions};
use crate::error::Result;
use crate::tensor::Tensor;

/// Cache for max-pool backward pass
#[derive(Clone, Debug)]
pub struct PoolCache {
    x_shape: Vec<usize>,
    out_shape: Vec<usize>,
    /// Flat input index of the maximum of each output cell
    argmax: Vec<usize>,
}

impl PoolCache {
    pub fn argmax(&self) -> &[usize] {
        &self.argmax
    }
}

/// Forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, C, H, W]`
/// * `options` - Window size and stride
///
/// # Returns
///
/// Tuple of (output `[N, C, out_h, out_w]`, cache)
///
/// # Example
///
/// ```rust
/// # use handgrad::{Tensor, PoolOptions, layers::max_pool_forward_naive};
/// let x = Tensor::new((0..16).map(f64::from).collect(), vec![1, 1, 4, 4]).unwrap();
/// let (out, _) = max_pool_forward_naive(&x, &PoolOptions::default()).unwrap();
/// assert_eq!(out.data, vec![5.0, 7.0, 13.0, 15.0]);
/// ```
pub fn max_pool_forward_naive(x: &Tensor, options: &PoolOptions) -> Result<(Tensor, PoolCache)> {
    options.validate()?;
    let (n, c, h, w) = x.dims4("max_pool_forward_naive")?;
    let PoolOptions {
        pool_height: ph,
        pool_width: pw,
        stride,
    } = *options;
    let out_h = output_extent("max_pool_forward_naive", h, 0, ph, stride)?;
    let out_w = output_extent("max_pool_forward_naive", w, 0, pw, stride)?;
    tracing::debug!(input = ?x.shape, ph, pw, stride, out_h, out_w, "max pool forward");

    let plane_out = out_h * out_w;
    let mut out = vec![0.0; n * c * plane_out];
    let mut argmax = vec![0usize; n * c * plane_out];

    out.par_chunks_mut(plane_out)
        .zip(argmax.par_chunks_mut(plane_out))
        .enumerate()
        .for_each(|(plane, (out_p, arg_p))| {
            let base = plane * h * w;
            for i in 0..out_h {
                for j in 0..out_w {
                    let (top, left) = (i * stride, j * stride);
                    let mut best = base + top * w + left;
                    for di in 0..ph {
                        for dj in 0..pw {
                            let idx = base + (top + di) * w + left + dj;
                            if x.data[idx] > x.data[best] {
                                best = idx;
                            }
                        }
                    }
                    out_p[i * out_w + j] = x.data[best];
                    arg_p[i * out_w + j] = best;
                }
            }
        });

    let out_shape = vec![n, c, out_h, out_w];
    let cache = PoolCache {
        x_shape: x.shape.clone(),
        out_shape: out_shape.clone(),
        argmax,
    };
    Ok((Tensor::new(out, out_shape)?, cache))
}

/// Backward pass
///
/// # Errors
///
/// `grad_out` must have the forward output's shape.
pub fn max_pool_backward_naive(grad_out: &Tensor, cache: &PoolCache) -> Result<Tensor> {
    grad_out.expect_shape("max_pool_backward_naive", &cache.out_shape)?;
    let mut dx = Tensor::zeros(cache.x_shape.clone());
    for (&idx, &g) in cache.argmax.iter().zip(&grad_out.data) {
        dx.data[idx] += g;
    }
    Ok(dx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn seq(shape: Vec<usize>) -> Tensor {
        let n: usize = shape.iter().product();
        Tensor::new((0..n).map(|i| i as f64).collect(), shape).unwrap()
    }

    #[test]
    fn test_each_window_routes_to_one_location() {
        let x = Tensor::new(
            vec![
                1.0, 3.0, 2.0, 0.0, //
                4.0, 0.5, -1.0, 6.0, //
                7.0, 7.0, 1.0, 1.0, //
                0.0, 2.0, 1.0, 1.0,
            ],
            vec![1, 1, 4, 4],
        )
        .unwrap();
        let (out, cache) = max_pool_forward_naive(&x, &PoolOptions::default()).unwrap();
        assert_eq!(out.data, vec![4.0, 6.0, 7.0, 1.0]);
        // ties resolve to the first cell in row-major window order
        assert_eq!(cache.argmax(), &[4, 7, 8, 10]);

        let dout = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 1, 2, 2]).unwrap();
        let dx = max_pool_backward_naive(&dout, &cache).unwrap();
        assert_eq!(dx.data.iter().filter(|&&g| g != 0.0).count(), 4);
        for (wi, (top, left)) in [(0, 0), (0, 2), (2, 0), (2, 2)].into_iter().enumerate() {
            let sum: f64 = (0..2)
                .flat_map(|di| (0..2).map(move |dj| (top + di) * 4 + left + dj))
                .map(|idx| dx.data[idx])
                .sum();
            assert_eq!(sum, dout.data[wi]);
        }
    }

    #[test]
    fn test_non_square_window_steps_by_width() {
        // 2x3 windows, stride 3 along both axes over a 5x6 plane:
        // rows {0,1} and {3,4}, columns {0,1,2} and {3,4,5}
        let x = seq(vec![1, 1, 5, 6]);
        let options = PoolOptions {
            pool_height: 2,
            pool_width: 3,
            stride: 3,
        };
        let (out, cache) = max_pool_forward_naive(&x, &options).unwrap();
        assert_eq!(out.shape, vec![1, 1, 2, 2]);
        assert_eq!(out.data, vec![8.0, 11.0, 26.0, 29.0]);
        assert_eq!(cache.argmax(), &[8, 11, 26, 29]);

        let dout = Tensor::full(vec![1, 1, 2, 2], 1.0);
        let dx = max_pool_backward_naive(&dout, &cache).unwrap();
        assert_eq!(dx.data.iter().sum::<f64>(), 4.0);
        assert_eq!(dx.data[11], 1.0);
        assert_eq!(dx.data[29], 1.0);
    }

    #[test]
    fn test_overlapping_windows_accumulate() {
        // the centre of a 3x3 plane wins all four 2x2 windows at stride 1
        let mut data = vec![0.0; 9];
        data[4] = 10.0;
        let x = Tensor::new(data, vec![1, 1, 3, 3]).unwrap();
        let options = PoolOptions {
            pool_height: 2,
            pool_width: 2,
            stride: 1,
        };
        let (out, cache) = max_pool_forward_naive(&x, &options).unwrap();
        assert_eq!(out.data, vec![10.0; 4]);
        let dout = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 1, 2, 2]).unwrap();
        let dx = max_pool_backward_naive(&dout, &cache).unwrap();
        assert_eq!(dx.data[4], 10.0);
        assert_eq!(dx.data.iter().sum::<f64>(), 10.0);
    }

    #[test]
    fn test_channels_pool_independently() {
        let x = seq(vec![2, 3, 2, 2]);
        let (out, cache) = max_pool_forward_naive(&x, &PoolOptions::default()).unwrap();
        assert_eq!(out.shape, vec![2, 3, 1, 1]);
        assert_eq!(out.data, vec![3.0, 7.0, 11.0, 15.0, 19.0, 23.0]);
        assert!(max_pool_backward_naive(&Tensor::zeros(vec![2, 3, 2, 2]), &cache).is_err());
    }

    #[test]
    fn test_fractional_output_rejected() {
        let x = Tensor::zeros(vec![1, 1, 5, 5]);
        assert!(matches!(
            max_pool_forward_naive(&x, &PoolOptions::default()),
            Err(Error::FractionalOutput { extent: 5, .. })
        ));
    }
}
