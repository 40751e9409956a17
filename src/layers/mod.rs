//! Layer Kernels
//!
//! This module contains every layer kernel in the library. Each kernel
//! provides both a forward and a backward pass.
//!
//! ## Layers
//!
//! - **affine**: Fully connected layer over flattened examples
//! - **activation**: ReLU
//! - **loss**: Softmax (cross-entropy) and multiclass SVM losses
//! - **batch_norm**: Batch normalization and the shared normalization core
//! - **layer_norm**: Layer normalization
//! - **spatial_norm**: Spatial batch norm and group norm for `[N, C, H, W]`
//! - **layout**: `[N, C, H, W]` to channel-last rows and back
//! - **dropout**: Inverted dropout
//! - **conv**: Naive strided, zero-padded convolution
//! - **pool**: Naive max pooling
//! - **sandwich**: Fixed compositions (affine-ReLU, conv-ReLU-pool)
//!
//! ## Design Pattern
//!
//! Every kernel is a pair of free functions:
//!
//! ```rust,ignore
//! pub fn layer_forward(x: &Tensor, params..., options: &Options) -> Result<(Tensor, Cache)> { }
//! pub fn layer_backward(grad_out: &Tensor, cache: &Cache) -> Result<Gradients> { }
//!
//! pub struct Cache {
//!     // Values needed for backward pass
//! }
//!
//! pub struct Gradients {
//!     // Gradients for parameters and input
//! }
//! ```
//!
//! Parameters are owned by the caller and passed in on every call, so a
//! network is just a sequence of forward calls followed by the matching
//! backward calls in reverse. This pattern makes backpropagation explicit
//! and educational.

pub mod activation;
pub mod affine;
pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod layer_norm;
pub mod layout;
pub mod loss;
pub mod pool;
pub mod sandwich;
pub mod spatial_norm;

// Re-export main types for convenience
pub use activation::{relu_backward, relu_forward, ReluCache};
pub use affine::{affine_backward, affine_forward, AffineCache, AffineGradients};
pub use batch_norm::{
    batchnorm_backward, batchnorm_backward_alt, batchnorm_forward, NormAxis, NormCache,
    NormGradients, RunningStats,
};
pub use conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvGradients};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache};
pub use layer_norm::{layernorm_backward, layernorm_forward};
pub use layout::{nchw_to_rows, rows_to_nchw};
pub use loss::{softmax_loss, svm_loss};
pub use pool::{max_pool_backward_naive, max_pool_forward_naive, PoolCache};
pub use sandwich::{
    affine_relu_backward, affine_relu_forward, conv_relu_pool_backward, conv_relu_pool_forward,
    AffineReluCache, ConvReluPoolCache,
};
pub use spatial_norm::{
    spatial_batchnorm_backward, spatial_batchnorm_forward, spatial_groupnorm_backward,
    spatial_groupnorm_forward, GroupNormCache,
};
