//! Convolution (naive)
//!
//! Direct convolution over `[N, C, H, W]` inputs with `F` filters of shape
//! `[C, HH, WW]`. Every output position is the dot product of one receptive
//! field with one filter, plus that filter's bias:
//!
//! ```text
//! x_pad          = zero-pad x by `pad` on each spatial side
//! out[n, f, i, j] = sum(x_pad[n, :, i*s .. i*s+HH, j*s .. j*s+WW] * w[f]) + b[f]
//! out_h          = 1 + (H + 2*pad - HH) / stride
//! out_w          = 1 + (W + 2*pad - WW) / stride
//! ```
//!
//! ## Backward Pass
//!
//! Each output position scatters `dout[n, f, i, j]` back through its
//! receptive field. Receptive fields overlap whenever `stride < HH`, so the
//! input and filter gradients are accumulated, never assigned:
//!
//! ```text
//! dx_pad[n, :, field] += dout[n, f, i, j] * w[f]
//! dw[f]               += dout[n, f, i, j] * x_pad[n, :, field]
//! db[f]               += dout[n, f, i, j]
//! dx                   = dx_pad with the padding stripped
//! ```
//!
//! These loops are reference implementations. They favour an obvious
//! index pattern over speed.

use rayon::prelude::*;

use crate::config::{output_extent, ConvOptions};
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Cache for convolution backward pass
#[derive(Clone, Debug)]
pub struct ConvCache {
    /// Zero-padded input `[N, C, H + 2*pad, W + 2*pad]`
    x_padded: Tensor,
    w: Tensor,
    options: ConvOptions,
    out_hw: (usize, usize),
}

/// Gradients for the convolution layer
#[derive(Clone, Debug)]
pub struct ConvGradients {
    pub x: Tensor,
    pub w: Tensor,
    pub b: Tensor,
}

/// Forward pass
///
/// # Arguments
///
/// * `x` - Input `[N, C, H, W]`
/// * `w` - Filters `[F, C, HH, WW]`
/// * `b` - Bias `[F]`
/// * `options` - Stride and zero padding
///
/// # Returns
///
/// Tuple of (output `[N, F, out_h, out_w]`, cache)
///
/// # Errors
///
/// Rank or channel mismatches, a zero stride, and any window/stride/pad
/// combination that does not tile the padded input exactly.
pub fn conv_forward_naive(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    options: &ConvOptions,
) -> Result<(Tensor, ConvCache)> {
    options.validate()?;
    let (n, c, h, wd) = x.dims4("conv_forward_naive")?;
    let (f, wc, hh, ww) = w.dims4("conv_forward_naive")?;
    if wc != c {
        return Err(Error::ShapeMismatch {
            op: "conv_forward_naive",
            expected: vec![f, c, hh, ww],
            got: w.shape.clone(),
        });
    }
    b.expect_shape("conv_forward_naive", &[f])?;

    let ConvOptions { stride, pad } = *options;
    let out_h = output_extent("conv_forward_naive", h, pad, hh, stride)?;
    let out_w = output_extent("conv_forward_naive", wd, pad, ww, stride)?;
    tracing::debug!(
        input = ?x.shape,
        filters = ?w.shape,
        stride,
        pad,
        out_h,
        out_w,
        "conv forward"
    );

    let x_padded = x.pad_spatial(pad)?;
    let (hp, wp) = (h + 2 * pad, wd + 2 * pad);
    let field = c * hh * ww;

    let per_example = f * out_h * out_w;
    let mut out = vec![0.0; n * per_example];
    // an empty filter bank yields an empty [N, 0, out_h, out_w] output
    out.par_chunks_mut(per_example.max(1))
        .enumerate()
        .for_each(|(ni, out_n)| {
            let x_n = &x_padded.data[ni * c * hp * wp..(ni + 1) * c * hp * wp];
            for fi in 0..f {
                let w_f = &w.data[fi * field..(fi + 1) * field];
                for i in 0..out_h {
                    for j in 0..out_w {
                        let (top, left) = (i * stride, j * stride);
                        let mut acc = b.data[fi];
                        for ci in 0..c {
                            for di in 0..hh {
                                let row = ci * hp * wp + (top + di) * wp + left;
                                let w_row = ci * hh * ww + di * ww;
                                for dj in 0..ww {
                                    acc += x_n[row + dj] * w_f[w_row + dj];
                                }
                            }
                        }
                        out_n[(fi * out_h + i) * out_w + j] = acc;
                    }
                }
            }
        });

    let cache = ConvCache {
        x_padded,
        w: w.clone(),
        options: options.clone(),
        out_hw: (out_h, out_w),
    };
    Ok((Tensor::new(out, vec![n, f, out_h, out_w])?, cache))
}

/// Backward pass
///
/// # Errors
///
/// `grad_out` must have the forward output's shape.
pub fn conv_backward_naive(grad_out: &Tensor, cache: &ConvCache) -> Result<ConvGradients> {
    let (n, c, hp, wp) = cache.x_padded.dims4("conv_backward_naive")?;
    let (f, _, hh, ww) = cache.w.dims4("conv_backward_naive")?;
    let (out_h, out_w) = cache.out_hw;
    grad_out.expect_shape("conv_backward_naive", &[n, f, out_h, out_w])?;

    let ConvOptions { stride, pad } = cache.options;
    let field = c * hh * ww;
    let x_pad = &cache.x_padded.data;
    let w = &cache.w.data;

    let mut dx_pad = vec![0.0; n * c * hp * wp];
    let mut dw = vec![0.0; f * field];
    let mut db = vec![0.0; f];

    for ni in 0..n {
        let base = ni * c * hp * wp;
        for fi in 0..f {
            for i in 0..out_h {
                for j in 0..out_w {
                    let g = grad_out.data[((ni * f + fi) * out_h + i) * out_w + j];
                    db[fi] += g;
                    let (top, left) = (i * stride, j * stride);
                    for ci in 0..c {
                        for di in 0..hh {
                            let row = base + ci * hp * wp + (top + di) * wp + left;
                            let w_row = fi * field + ci * hh * ww + di * ww;
                            for dj in 0..ww {
                                dx_pad[row + dj] += g * w[w_row + dj];
                                dw[w_row + dj] += g * x_pad[row + dj];
                            }
                        }
                    }
                }
            }
        }
    }

    let dx = Tensor::new(dx_pad, vec![n, c, hp, wp])?.strip_spatial_padding(pad)?;
    Ok(ConvGradients {
        x: dx,
        w: Tensor::new(dw, cache.w.shape.clone())?,
        b: Tensor::new(db, vec![f])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn averaging_filter(c: usize) -> (Tensor, Tensor) {
        // one filter summing all channels, each tap 1/9 of a 3x3 field
        let w = Tensor::full(vec![1, c, 3, 3], 1.0 / (9.0 * c as f64));
        (w, Tensor::zeros(vec![1]))
    }

    #[test]
    fn test_averaging_filter_on_constant_input() {
        let k = 4.5;
        let x = Tensor::full(vec![1, 2, 5, 6], k);
        let (w, b) = averaging_filter(2);
        let options = ConvOptions { stride: 1, pad: 1 };
        let (out, _) = conv_forward_naive(&x, &w, &b, &options).unwrap();
        assert_eq!(out.shape, vec![1, 1, 5, 6]);

        for i in 0..5 {
            for j in 0..6 {
                let rows = 3 - usize::from(i == 0) - usize::from(i == 4);
                let cols = 3 - usize::from(j == 0) - usize::from(j == 5);
                let expected = k * (rows * cols) as f64 / 9.0;
                let got = out.data[i * 6 + j];
                assert!((got - expected).abs() < 1e-12, "({i},{j}): {got} vs {expected}");
            }
        }
        // interior equals k exactly, corner sees 4 of 9 cells
        assert!((out.data[2 * 6 + 2] - k).abs() < 1e-12);
        assert!((out.data[0] - k * 4.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_output_shape_with_stride() {
        let x = Tensor::zeros(vec![2, 3, 4, 4]);
        let w = Tensor::zeros(vec![3, 3, 4, 4]);
        let b = Tensor::full(vec![3], 0.5);
        let options = ConvOptions { stride: 2, pad: 1 };
        let (out, _) = conv_forward_naive(&x, &w, &b, &options).unwrap();
        assert_eq!(out.shape, vec![2, 3, 2, 2]);
        assert!(out.data.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_fractional_output_rejected() {
        let x = Tensor::zeros(vec![1, 1, 5, 5]);
        let w = Tensor::zeros(vec![1, 1, 2, 2]);
        let b = Tensor::zeros(vec![1]);
        let options = ConvOptions { stride: 2, pad: 0 };
        assert!(matches!(
            conv_forward_naive(&x, &w, &b, &options),
            Err(Error::FractionalOutput { extent: 5, .. })
        ));
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let x = Tensor::zeros(vec![1, 2, 4, 4]);
        let w = Tensor::zeros(vec![1, 3, 3, 3]);
        let b = Tensor::zeros(vec![1]);
        assert!(conv_forward_naive(&x, &w, &b, &ConvOptions::default()).is_err());
    }

    #[test]
    fn test_backward_accumulates_overlapping_fields() {
        // 1x1x3x3 input, 2x2 filter of ones, stride 1: the centre pixel is in
        // all four receptive fields
        let x = Tensor::new((1..=9).map(f64::from).collect(), vec![1, 1, 3, 3]).unwrap();
        let w = Tensor::full(vec![1, 1, 2, 2], 1.0);
        let b = Tensor::zeros(vec![1]);
        let (out, cache) = conv_forward_naive(&x, &w, &b, &ConvOptions::default()).unwrap();
        assert_eq!(out.data, vec![12.0, 16.0, 24.0, 28.0]);

        let dout = Tensor::full(vec![1, 1, 2, 2], 1.0);
        let grads = conv_backward_naive(&dout, &cache).unwrap();
        assert_eq!(
            grads.x.data,
            vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
        );
        // dw[di, dj] = sum of the 2x2 block of x starting at (di, dj)
        assert_eq!(grads.w.data, vec![12.0, 16.0, 24.0, 28.0]);
        assert_eq!(grads.b.data, vec![4.0]);
    }

    #[test]
    fn test_empty_filter_bank() {
        let x = Tensor::full(vec![2, 1, 3, 3], 1.0);
        let w = Tensor::zeros(vec![0, 1, 3, 3]);
        let b = Tensor::zeros(vec![0]);
        let options = ConvOptions { stride: 1, pad: 1 };
        let (out, cache) = conv_forward_naive(&x, &w, &b, &options).unwrap();
        assert_eq!(out.shape, vec![2, 0, 3, 3]);
        assert!(out.data.is_empty());

        let grads = conv_backward_naive(&out, &cache).unwrap();
        assert_eq!(grads.x, Tensor::zeros(vec![2, 1, 3, 3]));
        assert_eq!(grads.w.shape, vec![0, 1, 3, 3]);
        assert_eq!(grads.b.shape, vec![0]);
    }

    #[test]
    fn test_backward_strips_padding() {
        let x = Tensor::full(vec![2, 1, 3, 3], 1.0);
        let w = Tensor::full(vec![2, 1, 3, 3], 1.0);
        let b = Tensor::zeros(vec![2]);
        let options = ConvOptions { stride: 1, pad: 1 };
        let (out, cache) = conv_forward_naive(&x, &w, &b, &options).unwrap();
        let grads = conv_backward_naive(&Tensor::full(out.shape.clone(), 1.0), &cache).unwrap();
        assert_eq!(grads.x.shape, vec![2, 1, 3, 3]);
        assert_eq!(grads.b.data, vec![9.0, 9.0]);
        // a pixel is covered by 2 output rows on the border and 3 inside,
        // likewise for columns, once per filter
        let coverage = [2.0, 3.0, 2.0];
        for a in 0..3 {
            for c in 0..3 {
                let expected = 2.0 * coverage[a] * coverage[c];
                assert_eq!(grads.x.data[a * 3 + c], expected);
                assert_eq!(grads.x.data[9 + a * 3 + c], expected);
            }
        }
    }
}
