//! Kernel Options
//!
//! Each kernel family takes a small, immutable options record. Every record
//! implements [`Default`] with the documented defaults and derives
//! `Serialize`/`Deserialize` with `#[serde(default)]`, so a partial JSON
//! object such as `{"mode": "test"}` fills in the rest.
//!
//! | Record | Field | Default |
//! |---|---|---|
//! | [`BatchNormOptions`] | `mode`, `eps`, `momentum` | `train`, 1e-5, 0.9 |
//! | [`LayerNormOptions`] | `eps` | 1e-5 |
//! | [`GroupNormOptions`] | `eps` | 1e-5 |
//! | [`DropoutOptions`] | `p`, `mode`, `seed` | 0.5, `train`, none |
//! | [`ConvOptions`] | `stride`, `pad` | 1, 0 |
//! | [`PoolOptions`] | `pool_height`, `pool_width`, `stride` | 2, 2, 2 |
//!
//! Long-lived state (batch norm running statistics) is not part
//! of these records; see [`crate::layers::RunningStats`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default variance-stabilization floor for every normalization kernel.
pub const DEFAULT_EPS: f64 = 1e-5;

/// Default running-statistics decay for batch norm.
pub const DEFAULT_MOMENTUM: f64 = 0.9;

/// Forward mode for kernels that behave differently at evaluation time.
///
/// Parses from (and serializes to) `"train"` / `"test"`; any other string is
/// rejected with [`Error::InvalidMode`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    #[default]
    Train,
    Test,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => f.write_str("train"),
            Mode::Test => f.write_str("test"),
        }
    }
}

fn check_eps(eps: f64) -> Result<()> {
    if eps.is_finite() && eps > 0.0 {
        Ok(())
    } else {
        Err(Error::config(format!("eps must be positive and finite, got {eps}")))
    }
}

/// Options for [`crate::layers::batchnorm_forward`] and the spatial variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchNormOptions {
    pub mode: Mode,
    pub eps: f64,
    /// `0.0` discards old statistics every step, `1.0` never takes in new ones.
    pub momentum: f64,
}

impl Default for BatchNormOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Train,
            eps: DEFAULT_EPS,
            momentum: DEFAULT_MOMENTUM,
        }
    }
}

impl BatchNormOptions {
    /// Default options in the given mode.
    pub fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_eps(self.eps)?;
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(Error::config(format!(
                "momentum must lie in [0, 1], got {}",
                self.momentum
            )));
        }
        Ok(())
    }
}

/// Options for [`crate::layers::layernorm_forward`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerNormOptions {
    pub eps: f64,
}

impl Default for LayerNormOptions {
    fn default() -> Self {
        Self { eps: DEFAULT_EPS }
    }
}

impl LayerNormOptions {
    pub fn validate(&self) -> Result<()> {
        check_eps(self.eps)
    }
}

/// Options for [`crate::layers::spatial_groupnorm_forward`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupNormOptions {
    pub eps: f64,
}

impl Default for GroupNormOptions {
    fn default() -> Self {
        Self { eps: DEFAULT_EPS }
    }
}

impl GroupNormOptions {
    pub fn validate(&self) -> Result<()> {
        check_eps(self.eps)
    }
}

/// Options for [`crate::layers::dropout_forward`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropoutOptions {
    /// Probability of keeping each activation (not of dropping it).
    pub p: f64,
    pub mode: Mode,
    /// Fixed seed for a reproducible mask. `None` draws a fresh mask each call.
    pub seed: Option<u64>,
}

impl Default for DropoutOptions {
    fn default() -> Self {
        Self {
            p: 0.5,
            mode: Mode::Train,
            seed: None,
        }
    }
}

impl DropoutOptions {
    pub fn validate(&self) -> Result<()> {
        if self.p > 0.0 && self.p <= 1.0 {
            Ok(())
        } else {
            Err(Error::config(format!(
                "dropout keep probability must lie in (0, 1], got {}",
                self.p
            )))
        }
    }
}

/// Options for [`crate::layers::conv_forward_naive`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvOptions {
    /// Pixels between adjacent receptive fields, both axes.
    pub stride: usize,
    /// Zeros added symmetrically on each side of height and width.
    pub pad: usize,
}

impl Default for ConvOptions {
    fn default() -> Self {
        Self { stride: 1, pad: 0 }
    }
}

impl ConvOptions {
    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(Error::config("convolution stride must be at least 1"));
        }
        Ok(())
    }
}

/// Options for [`crate::layers::max_pool_forward_naive`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    pub pool_height: usize,
    pub pool_width: usize,
    pub stride: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        }
    }
}

impl PoolOptions {
    pub fn validate(&self) -> Result<()> {
        if self.pool_height == 0 || self.pool_width == 0 || self.stride == 0 {
            return Err(Error::config(format!(
                "pool window and stride must be at least 1, got {}x{} stride {}",
                self.pool_height, self.pool_width, self.stride
            )));
        }
        Ok(())
    }
}

/// Number of window positions along one axis: `1 + (extent + 2*pad - window) / stride`.
///
/// Fails when the window does not fit or the division is not exact.
pub(crate) fn output_extent(
    op: &'static str,
    extent: usize,
    pad: usize,
    window: usize,
    stride: usize,
) -> Result<usize> {
    let padded = extent + 2 * pad;
    if window > padded || (padded - window) % stride != 0 {
        return Err(Error::FractionalOutput {
            op,
            extent,
            pad,
            window,
            stride,
        });
    }
    Ok(1 + (padded - window) / stride)
}
