//! Margin ranking loss over displacement vectors.
//!
//! ```text
//! L = Σ_i max(0, γ + ||d⁺_i||_p - ||d⁻_i||_p)
//! ```
//!
//! where `d⁺` / `d⁻` are the displacements of the positive and corrupted
//! triples. The loss is summed over the batch, not averaged, so its magnitude
//! grows with batch size. Divide externally if a mean is wanted.

use crate::error::{Error, Result};
use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};

/// Norm used to measure displacement length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormOrder {
    /// Σ|x|
    L1,
    /// sqrt(Σx²)
    #[default]
    L2,
}

impl NormOrder {
    /// Parse `1` / `2`.
    pub fn from_order(p: u8) -> Option<Self> {
        match p {
            1 => Some(Self::L1),
            2 => Some(Self::L2),
            _ => None,
        }
    }

    pub fn order(self) -> u8 {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
        }
    }
}

/// Row-wise norm: `(N, D) -> (N)`.
///
/// The gradient of a zero row is zero for both orders.
pub fn norm(x: &Tensor, order: NormOrder) -> Result<Tensor> {
    let out = match order {
        NormOrder::L1 => x.abs()?.sum(D::Minus1)?,
        NormOrder::L2 => l2_norm(x)?,
    };
    Ok(out)
}

/// `sqrt(Σx²)` with zero rows masked out, so `d sqrt` is never taken at 0.
fn l2_norm(x: &Tensor) -> Result<Tensor> {
    let squares = x.sqr()?.sum(D::Minus1)?;
    let zeros = squares.zeros_like()?;
    let is_zero = squares.eq(&zeros)?;
    let safe = is_zero.where_cond(&squares.ones_like()?, &squares)?;
    Ok(is_zero.where_cond(&zeros, &safe.sqrt()?)?)
}

fn check_pair(pos: &Tensor, neg: &Tensor) -> Result<()> {
    let (pn, pd) = pos.dims2()?;
    let (nn, nd) = neg.dims2()?;
    if pn != nn {
        return Err(Error::ShapeMismatch {
            what: "negative batch size",
            expected: pn,
            got: nn,
        });
    }
    if pd != nd {
        return Err(Error::ShapeMismatch {
            what: "negative displacement width",
            expected: pd,
            got: nd,
        });
    }
    Ok(())
}

/// Clipped per-item contributions `max(0, γ + ||pos_i|| - ||neg_i||)`, shape `(N)`.
pub fn per_item_margin(pos: &Tensor, neg: &Tensor, gamma: f64, order: NormOrder) -> Result<Tensor> {
    check_pair(pos, neg)?;
    let diff = (norm(pos, order)? - norm(neg, order)?)?;
    Ok(diff.affine(1.0, gamma)?.relu()?)
}

/// Scalar batch loss: the sum of [`per_item_margin`].
///
/// The result stays attached to the autograd graph of `pos` / `neg`.
pub fn margin_ranking_loss(pos: &Tensor, neg: &Tensor, gamma: f64, order: NormOrder) -> Result<Tensor> {
    Ok(per_item_margin(pos, neg, gamma, order)?.sum_all()?)
}
