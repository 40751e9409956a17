//! Error Types
//!
//! Every kernel validates its inputs before touching any data and reports a
//! violation through [`Error`]. There is no partial result: a kernel either
//! returns a complete output (and cache) or an error.
//!
//! The variants fall into two groups:
//!
//! - **Invalid configuration**: unrecognized mode, indivisible group count,
//!   non-integral convolution/pooling output size, out-of-range options
//! - **Invalid input**: tensors whose rank or dimensions break a kernel's
//!   contract, and class labels outside `[0, C)`

/// All errors a kernel can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two tensors (or a tensor and a contract) disagree on dimensions.
    #[error("{op}: shape mismatch, expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// A kernel received a tensor of the wrong rank.
    #[error("{op}: expected rank {expected}, got rank {got} (shape {shape:?})")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
        shape: Vec<usize>,
    },

    /// Data length does not match the product of the shape.
    #[error("shape {shape:?} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    /// Inner dimensions of a matrix product disagree.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}]")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// A class label is outside `[0, classes)`.
    #[error("label {label} at row {row} is outside [0, {classes})")]
    LabelOutOfRange {
        row: usize,
        label: usize,
        classes: usize,
    },

    /// The label vector length differs from the number of score rows.
    #[error("{rows} score rows but {labels} labels")]
    LabelCountMismatch { rows: usize, labels: usize },

    /// A textual mode other than `train` or `test`.
    #[error("invalid forward mode {0:?}, expected \"train\" or \"test\"")]
    InvalidMode(String),

    /// Group norm channel count is not a multiple of the group count.
    #[error("{channels} channels cannot be split into {groups} equal groups")]
    IndivisibleGroups { channels: usize, groups: usize },

    /// A window/stride/pad combination does not tile the input exactly.
    #[error(
        "{op}: extent {extent} with pad {pad} and window {window} does not fit stride {stride}"
    )]
    FractionalOutput {
        op: &'static str,
        extent: usize,
        pad: usize,
        window: usize,
        stride: usize,
    },

    /// Any other out-of-range option value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an [`Error::InvalidConfig`] from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
