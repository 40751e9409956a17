//! Tensor Operations for Layer Kernels
//!
//! This module provides the minimal dense tensor every kernel operates on.
//! Tensors store multi-dimensional arrays with shape and stride information
//! for indexing and memory layout.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f64>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, channels, height, width]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! Kernels run in `f64` so that analytic gradients can be compared against
//! centered finite differences at a relative error of `1e-7`.
//!
//! ## Example
//!
//! ```rust
//! use handgrad::Tensor;
//!
//! // Create a 2x3 matrix
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::new(data, vec![2, 3]).unwrap();
//!
//! // Matrix multiplication
//! let other = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]).unwrap();
//! let result = tensor.matmul(&other).unwrap();
//! assert_eq!(result.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Element-wise operations and large matrix products use Rayon. Every output
//! element is still computed by exactly one task in a fixed order, so results
//! do not depend on thread scheduling.

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// A multi-dimensional array for layer computations
///
/// For shape `[2, 3]`, data is stored as
/// `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
/// and strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f64>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Errors
    ///
    /// [`Error::ElementCountMismatch`] if the product of the shape differs
    /// from the data length.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use handgrad::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// assert!(Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]).is_err());
    /// ```
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self::from_raw(data, shape))
    }

    /// Build a tensor whose element count is already known to match.
    pub(crate) fn from_raw(data: Vec<f64>, shape: Vec<usize>) -> Self {
        debug_assert_eq!(data.len(), shape.iter().product::<usize>());
        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor with every element set to `value`
    pub fn full(shape: Vec<usize>, value: f64) -> Self {
        let size: usize = shape.iter().product();
        Self::from_raw(vec![value; size], shape)
    }

    /// Create a tensor of independent standard normal samples
    ///
    /// ```rust
    /// # use handgrad::Tensor;
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let mut rng = StdRng::seed_from_u64(0);
    /// let x = Tensor::randn(vec![2, 3, 4], &mut rng);
    /// assert_eq!(x.numel(), 24);
    /// ```
    pub fn randn<R: Rng + ?Sized>(shape: Vec<usize>, rng: &mut R) -> Self {
        let size: usize = shape.iter().product();
        let data = (0..size).map(|_| rng.sample(StandardNormal)).collect();
        Self::from_raw(data, shape)
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Fail unless the tensor has exactly `expected` dimensions.
    pub fn expect_shape(&self, op: &'static str, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(Error::ShapeMismatch {
                op,
                expected: expected.to_vec(),
                got: self.shape.clone(),
            });
        }
        Ok(())
    }

    /// Fail unless the tensor has rank `rank`.
    pub fn expect_rank(&self, op: &'static str, rank: usize) -> Result<()> {
        if self.shape.len() != rank {
            return Err(Error::RankMismatch {
                op,
                expected: rank,
                got: self.shape.len(),
                shape: self.shape.clone(),
            });
        }
        Ok(())
    }

    /// Dimensions of a rank-2 tensor as `(rows, cols)`.
    pub fn dims2(&self, op: &'static str) -> Result<(usize, usize)> {
        self.expect_rank(op, 2)?;
        Ok((self.shape[0], self.shape[1]))
    }

    /// Dimensions of a rank-4 tensor as `(n, c, h, w)`.
    pub fn dims4(&self, op: &'static str) -> Result<(usize, usize, usize, usize)> {
        self.expect_rank(op, 4)?;
        Ok((self.shape[0], self.shape[1], self.shape[2], self.shape[3]))
    }

    /// SIMD-friendly inner loop for matrix multiplication
    /// Computes: result[j] += a_val * b[j] for all j
    #[inline(always)]
    fn matmul_inner_simd(a_val: f64, b: &[f64], result: &mut [f64]) {
        // Plain zip loop so LLVM can auto-vectorize it
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]` with `C[i,j] = sum(A[i,l] * B[l,j])`.
    ///
    /// Small products run sequentially; products of at least 1K
    /// multiply-adds use the parallel cache-blocked version.
    ///
    /// # Errors
    ///
    /// Either operand not rank 2, or inner dimensions differ.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let (m, k) = self.dims2("matmul")?;
        let (k2, n) = other.dims2("matmul")?;
        if k != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1: k, k2, n });
        }

        if m * n * k >= 1_000 {
            return Ok(self.matmul_parallel_blocked(other, m, n, k));
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                Self::matmul_inner_simd(
                    a_val,
                    &other.data[l * n..(l + 1) * n],
                    &mut result[i * n..(i + 1) * n],
                );
            }
        }

        Ok(Tensor::from_raw(result, vec![m, n]))
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks that fit in L1 cache and distributes row blocks
    /// across cores. The summation order over `k` is identical to the
    /// sequential path.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::from_raw(result, vec![m, n])
    }

    /// Apply `f` to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::from_raw(result, self.shape.clone())
    }

    /// Combine two same-shaped tensors element by element
    pub fn zip_map<F>(&self, other: &Tensor, op: &'static str, f: F) -> Result<Tensor>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        other.expect_shape(op, &self.shape)?;
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Tensor::from_raw(result, self.shape.clone()))
    }

    /// Element-wise addition with broadcasting support
    ///
    /// Supports:
    ///
    /// 1. **Exact match**: Same shape
    /// 2. **Broadcast last dim**: `[*, n] + [n]` (e.g., adding bias)
    ///
    /// # Example
    ///
    /// ```rust
    /// # use handgrad::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
    /// let b = Tensor::new(vec![10.0, 20.0], vec![2]).unwrap();
    /// let c = a.add(&b).unwrap();
    /// assert_eq!(c.data, vec![11.0, 22.0, 13.0, 24.0]);
    /// ```
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.broadcast_last("add", other, |a, b| a + b)
    }

    /// Element-wise subtraction
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    fn broadcast_last<F>(&self, op: &'static str, other: &Tensor, f: F) -> Result<Tensor>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        if self.shape == other.shape {
            return self.zip_map(other, op, f);
        }

        // === BROADCAST LAST DIM: [*, n] (op) [n] ===
        if let (Some(&last_dim), 1) = (self.shape.last(), other.shape.len()) {
            if other.shape[0] == last_dim {
                let result = self
                    .data
                    .par_iter()
                    .enumerate()
                    .map(|(i, &a)| f(a, other.data[i % last_dim]))
                    .collect();
                return Ok(Tensor::from_raw(result, self.shape.clone()));
            }
        }

        Err(Error::ShapeMismatch {
            op,
            expected: self.shape.clone(),
            got: other.shape.clone(),
        })
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Sum a `[rows, cols]` tensor over its rows, giving `[cols]`
    pub fn sum_axis0(&self) -> Result<Tensor> {
        let (rows, cols) = self.dims2("sum_axis0")?;
        let mut sums = vec![0.0; cols];
        for r in 0..rows {
            for (s, &v) in sums.iter_mut().zip(&self.data[r * cols..(r + 1) * cols]) {
                *s += v;
            }
        }
        Ok(Tensor::from_raw(sums, vec![cols]))
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    ///
    /// ```rust
    /// # use handgrad::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
    /// let reshaped = tensor.reshape(&[3, 2]).unwrap();
    /// assert_eq!(reshaped.shape, vec![3, 2]);
    /// ```
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Tensor> {
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Transpose two dimensions (negative indices count from the end)
    pub fn transpose(&self, dim1: isize, dim2: isize) -> Result<Tensor> {
        let d1 = self.resolve_axis(dim1)?;
        let d2 = self.resolve_axis(dim2)?;

        // For 2D matrices, we can use a simple transpose
        if self.shape.len() == 2 && d1 != d2 {
            let rows = self.shape[0];
            let cols = self.shape[1];
            let mut result = vec![0.0; rows * cols];

            for i in 0..rows {
                for j in 0..cols {
                    result[j * rows + i] = self.data[i * cols + j];
                }
            }

            return Ok(Tensor::from_raw(result, vec![cols, rows]));
        }

        let mut axes: Vec<usize> = (0..self.shape.len()).collect();
        axes.swap(d1, d2);
        self.permute(&axes)
    }

    fn resolve_axis(&self, axis: isize) -> Result<usize> {
        let ndim = self.shape.len() as isize;
        let resolved = if axis < 0 { ndim + axis } else { axis };
        if resolved < 0 || resolved >= ndim {
            return Err(Error::config(format!(
                "axis {axis} out of range for shape {:?}",
                self.shape
            )));
        }
        Ok(resolved as usize)
    }

    /// Reorder dimensions: output dimension `i` is input dimension `axes[i]`
    ///
    /// ```rust
    /// # use handgrad::Tensor;
    /// let x = Tensor::zeros(vec![2, 3, 4, 5]);
    /// let y = x.permute(&[0, 2, 3, 1]).unwrap();
    /// assert_eq!(y.shape, vec![2, 4, 5, 3]);
    /// ```
    pub fn permute(&self, axes: &[usize]) -> Result<Tensor> {
        let rank = self.shape.len();
        let mut seen = vec![false; rank];
        if axes.len() != rank
            || axes
                .iter()
                .any(|&a| a >= rank || std::mem::replace(&mut seen[a], true))
        {
            return Err(Error::config(format!(
                "{axes:?} is not a permutation of the {rank} axes of {:?}",
                self.shape
            )));
        }

        let new_shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let new_strides = Self::compute_strides(&new_shape);
        let source_strides: Vec<usize> = axes.iter().map(|&a| self.strides[a]).collect();

        let result = (0..self.data.len())
            .into_par_iter()
            .map(|i| {
                // Decompose the output index and map each coordinate back
                let mut remaining = i;
                let mut old_idx = 0;
                for (&stride, &src) in new_strides.iter().zip(&source_strides) {
                    let coord = remaining / stride;
                    remaining %= stride;
                    old_idx += coord * src;
                }
                self.data[old_idx]
            })
            .collect();

        Ok(Tensor::from_raw(result, new_shape))
    }

    /// Zero-pad the two trailing (spatial) axes of an `[N, C, H, W]` tensor
    pub fn pad_spatial(&self, pad: usize) -> Result<Tensor> {
        let (n, c, h, w) = self.dims4("pad_spatial")?;
        if pad == 0 {
            return Ok(self.clone());
        }
        let (hp, wp) = (h + 2 * pad, w + 2 * pad);
        let mut out = vec![0.0; n * c * hp * wp];
        for plane in 0..n * c {
            for i in 0..h {
                let src = plane * h * w + i * w;
                let dst = plane * hp * wp + (i + pad) * wp + pad;
                out[dst..dst + w].copy_from_slice(&self.data[src..src + w]);
            }
        }
        Ok(Tensor::from_raw(out, vec![n, c, hp, wp]))
    }

    /// Remove `pad` rows/columns from each side of the spatial axes
    pub fn strip_spatial_padding(&self, pad: usize) -> Result<Tensor> {
        let (n, c, hp, wp) = self.dims4("strip_spatial_padding")?;
        if pad == 0 {
            return Ok(self.clone());
        }
        if hp < 2 * pad || wp < 2 * pad {
            return Err(Error::config(format!(
                "cannot strip padding {pad} from spatial size {hp}x{wp}"
            )));
        }
        let (h, w) = (hp - 2 * pad, wp - 2 * pad);
        let mut out = vec![0.0; n * c * h * w];
        for plane in 0..n * c {
            for i in 0..h {
                let src = plane * hp * wp + (i + pad) * wp + pad;
                let dst = plane * h * w + i * w;
                out[dst..dst + w].copy_from_slice(&self.data[src..src + w]);
            }
        }
        Ok(Tensor::from_raw(out, vec![n, c, h, w]))
    }
}
