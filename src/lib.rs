//! Handgrad: Hand-Written Layer Kernels
//!
//! Forward and backward passes for the building blocks of small fully
//! connected and convolutional networks, written out by hand so every
//! gradient is explicit. There is no autograd: a network is composed by
//! calling forward kernels in order and their backward kernels in reverse.
//!
//! # Modules
//!
//! - [`tensor`] - Dense row-major `f64` tensor
//! - [`layers`] - Forward/backward kernel pairs
//! - [`config`] - Per-kernel option records
//! - [`gradient_check`] - Centered finite differences for verifying backward passes
//! - [`error`] - Error type shared by every kernel
//!
//! # Example
//!
//! ```rust
//! use handgrad::layers::{affine_backward, affine_forward, relu_backward, relu_forward, softmax_loss};
//! use handgrad::Tensor;
//!
//! let x = Tensor::new(vec![0.5, -1.0, 2.0, 0.0, 1.0, 1.5], vec![2, 3]).unwrap();
//! let w = Tensor::full(vec![3, 4], 0.1);
//! let b = Tensor::zeros(vec![4]);
//!
//! let (h, affine_cache) = affine_forward(&x, &w, &b).unwrap();
//! let (scores, relu_cache) = relu_forward(&h);
//! let (loss, dscores) = softmax_loss(&scores, &[1, 3]).unwrap();
//! assert!(loss > 0.0);
//!
//! let dh = relu_backward(&dscores, &relu_cache).unwrap();
//! let grads = affine_backward(&dh, &affine_cache).unwrap();
//! assert_eq!(grads.w.shape, vec![3, 4]);
//! ```

pub mod config;
pub mod error;
pub mod gradient_check;
pub mod layers;
pub mod tensor;

// Re-export main types for convenience
pub use config::{
    BatchNormOptions, ConvOptions, DropoutOptions, GroupNormOptions, LayerNormOptions, Mode,
    PoolOptions, DEFAULT_EPS, DEFAULT_MOMENTUM,
};
pub use error::{Error, Result};
pub use layers::RunningStats;
pub use tensor::Tensor;
