//! Dimension-Order Adapters
//!
//! Spatial normalization reuses the 2-D batch-norm core by moving channels
//! to the last axis and collapsing everything else into rows:
//!
//! ```text
//! [N, C, H, W] --permute(0,2,3,1)--> [N, H, W, C] --reshape--> [N*H*W, C]
//! ```
//!
//! [`rows_to_nchw`] is the exact inverse.

use crate::error::Result;
use crate::tensor::Tensor;

/// `[N, C, H, W]` to channel-last rows `[N*H*W, C]`.
pub fn nchw_to_rows(x: &Tensor) -> Result<Tensor> {
    let (n, c, h, w) = x.dims4("nchw_to_rows")?;
    x.permute(&[0, 2, 3, 1])?.reshape(&[n * h * w, c])
}

/// Channel-last rows `[N*H*W, C]` back to `[N, C, H, W]`.
pub fn rows_to_nchw(rows: &Tensor, shape: [usize; 4]) -> Result<Tensor> {
    let [n, c, h, w] = shape;
    rows.expect_shape("rows_to_nchw", &[n * h * w, c])?;
    rows.reshape(&[n, h, w, c])?.permute(&[0, 3, 1, 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_becomes_column() {
        // x[n, c, h, w] = 1000n + 100c + 10h + w
        let (n, c, h, w) = (2, 3, 2, 2);
        let mut data = Vec::new();
        for ni in 0..n {
            for ci in 0..c {
                for hi in 0..h {
                    for wi in 0..w {
                        data.push((1000 * ni + 100 * ci + 10 * hi + wi) as f64);
                    }
                }
            }
        }
        let x = Tensor::new(data, vec![n, c, h, w]).unwrap();
        let rows = nchw_to_rows(&x).unwrap();
        assert_eq!(rows.shape, vec![8, 3]);
        // row for (n=1, h=0, w=1) is index 1*4 + 0*2 + 1 = 5
        assert_eq!(&rows.data[5 * 3..6 * 3], &[1001.0, 1101.0, 1201.0]);

        let back = rows_to_nchw(&rows, [n, c, h, w]).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn test_rows_shape_checked() {
        let rows = Tensor::zeros(vec![7, 3]);
        assert!(rows_to_nchw(&rows, [2, 3, 2, 2]).is_err());
        assert!(nchw_to_rows(&Tensor::zeros(vec![2, 3])).is_err());
    }
}
