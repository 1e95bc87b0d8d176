//! Translational scoring with learned projections.
//!
//! Both models impose `h' + r ≈ t'` on projected head/tail vectors and differ
//! only in how the projection is parameterized:
//!
//! | Kind | Model | Parameters | Projection |
//! |------|-------|------------|------------|
//! | [`ScoringKind::Linear`] | TransE | `head_mapping`, `tail_mapping`: D×D | `h·W_h`, `t·W_t` |
//! | [`ScoringKind::LowRankRelational`] | TransD | `head_mapping`, `tail_mapping`: 1×D, `relation_mapping`: D×1 | `h·(r_p h_p + I)`, `t·(r_p t_p + I)` |
//!
//! The displacement is
//!
//! ```text
//! d = h·M_h + r - t·M_t
//! ```
//!
//! and its norm is the implausibility of the triple (0 = perfect fit).
//!
//! TransD builds its matrices from rank-1 outer products plus the identity,
//! so with `relation_mapping = 0` it degenerates to plain `h + r - t`.
//! The matrices are rebuilt on every call and always reflect the current
//! parameter values.

use crate::error::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameter name of the head projection.
pub const HEAD_MAPPING: &str = "head_mapping";
/// Parameter name of the tail projection.
pub const TAIL_MAPPING: &str = "tail_mapping";
/// Parameter name of the TransD relation vector.
pub const RELATION_MAPPING: &str = "relation_mapping";

/// Which projection geometry to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoringKind {
    /// TransE: global D×D linear maps for head and tail.
    #[default]
    Linear,
    /// TransD: `relation_mapping ⊗ entity_mapping + I`, recomputed per call.
    LowRankRelational,
}

impl ScoringKind {
    /// Model name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Linear => "TransE",
            Self::LowRankRelational => "TransD",
        }
    }

    /// Names and shapes of the learnable parameters for width `dim`.
    pub fn parameter_shapes(self, dim: usize) -> Vec<(&'static str, (usize, usize))> {
        match self {
            Self::Linear => vec![(HEAD_MAPPING, (dim, dim)), (TAIL_MAPPING, (dim, dim))],
            Self::LowRankRelational => vec![
                (HEAD_MAPPING, (1, dim)),
                (TAIL_MAPPING, (1, dim)),
                (RELATION_MAPPING, (dim, 1)),
            ],
        }
    }
}

impl fmt::Display for ScoringKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Xavier/Glorot uniform init for a `rows x cols` parameter.
///
/// Bound is `sqrt(6 / (fan_in + fan_out))` with `fan_in = cols`, `fan_out = rows`.
pub fn xavier_uniform(rows: usize, cols: usize) -> Init {
    let bound = (6.0 / (rows + cols) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Learned projection, one variant per [`ScoringKind`].
///
/// The tensors are views of variables owned by the module's `VarMap`; an
/// optimizer step updates them in place.
#[derive(Debug, Clone)]
pub enum Projection {
    Linear {
        head_mapping: Tensor,
        tail_mapping: Tensor,
    },
    LowRankRelational {
        head_mapping: Tensor,
        tail_mapping: Tensor,
        relation_mapping: Tensor,
        /// Constant D×D identity, never trained.
        identity: Tensor,
    },
}

impl Projection {
    /// Create (or fetch) the parameters of `kind` from `vb`.
    pub fn init(kind: ScoringKind, dim: usize, vb: &VarBuilder) -> Result<Self> {
        let param = |name: &str, rows: usize, cols: usize| {
            vb.get_with_hints((rows, cols), name, xavier_uniform(rows, cols))
        };

        let projection = match kind {
            ScoringKind::Linear => Self::Linear {
                head_mapping: param(HEAD_MAPPING, dim, dim)?,
                tail_mapping: param(TAIL_MAPPING, dim, dim)?,
            },
            ScoringKind::LowRankRelational => Self::LowRankRelational {
                head_mapping: param(HEAD_MAPPING, 1, dim)?,
                tail_mapping: param(TAIL_MAPPING, 1, dim)?,
                relation_mapping: param(RELATION_MAPPING, dim, 1)?,
                identity: Tensor::eye(dim, DType::F32, vb.device())?,
            },
        };
        Ok(projection)
    }

    pub fn kind(&self) -> ScoringKind {
        match self {
            Self::Linear { .. } => ScoringKind::Linear,
            Self::LowRankRelational { .. } => ScoringKind::LowRankRelational,
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            Self::Linear { head_mapping, .. } | Self::LowRankRelational { head_mapping, .. } => {
                head_mapping.device()
            }
        }
    }

    /// The D×D head and tail projection matrices `(M_h, M_t)`.
    ///
    /// For TransD these are built fresh from the current parameters.
    pub fn matrices(&self) -> Result<(Tensor, Tensor)> {
        match self {
            Self::Linear {
                head_mapping,
                tail_mapping,
            } => Ok((head_mapping.clone(), tail_mapping.clone())),
            Self::LowRankRelational {
                head_mapping,
                tail_mapping,
                relation_mapping,
                identity,
            } => {
                let m_rh = (relation_mapping.matmul(head_mapping)? + identity)?;
                let m_rt = (relation_mapping.matmul(tail_mapping)? + identity)?;
                Ok((m_rh, m_rt))
            }
        }
    }

    /// `h·M_h + r - t·M_t` for `(N, D)` inputs.
    pub fn displacement(&self, head: &Tensor, relation: &Tensor, tail: &Tensor) -> Result<Tensor> {
        let (m_h, m_t) = self.matrices()?;
        displace(head, relation, tail, &m_h, &m_t)
    }

    /// `[h·M_h | r | t·M_t]`, shape `(N, 3D)`.
    pub fn predict(&self, head: &Tensor, relation: &Tensor, tail: &Tensor) -> Result<Tensor> {
        let (m_h, m_t) = self.matrices()?;
        let h = head.matmul(&m_h)?;
        let t = tail.matmul(&m_t)?;
        Ok(Tensor::cat(&[&h, relation, &t], 1)?)
    }
}

/// Displacement for the positive and negative side of a step, sharing one
/// set of projection matrices.
pub(crate) fn displace(
    head: &Tensor,
    relation: &Tensor,
    tail: &Tensor,
    m_h: &Tensor,
    m_t: &Tensor,
) -> Result<Tensor> {
    let projected_head = head.matmul(m_h)?;
    let projected_tail = tail.matmul(m_t)?;
    Ok(((projected_head + relation)? - projected_tail)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn row(values: &[f32]) -> Tensor {
        Tensor::from_slice(values, (1, values.len()), &Device::Cpu).unwrap()
    }

    fn build(kind: ScoringKind, dim: usize) -> (VarMap, Projection) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let projection = Projection::init(kind, dim, &vb).unwrap();
        (varmap, projection)
    }

    #[test]
    fn test_parameter_shapes() {
        let (varmap, p) = build(ScoringKind::Linear, 4);
        assert_eq!(varmap.all_vars().len(), 2);
        assert_eq!(p.kind(), ScoringKind::Linear);

        let (varmap, p) = build(ScoringKind::LowRankRelational, 4);
        assert_eq!(varmap.all_vars().len(), 3);
        let (m_h, m_t) = p.matrices().unwrap();
        assert_eq!(m_h.dims(), &[4, 4]);
        assert_eq!(m_t.dims(), &[4, 4]);
    }

    #[test]
    fn test_xavier_bounds() {
        let (_varmap, p) = build(ScoringKind::Linear, 6);
        let bound = (6.0f32 / 12.0).sqrt();
        let (m_h, _) = p.matrices().unwrap();
        for x in m_h.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
            assert!(x.abs() <= bound + 1e-6);
        }
    }

    #[test]
    fn test_transd_zero_relation_mapping_is_plain_translation() {
        let (mut varmap, p) = build(ScoringKind::LowRankRelational, 3);
        varmap
            .set_one(RELATION_MAPPING, Tensor::zeros((3, 1), DType::F32, &Device::Cpu).unwrap())
            .unwrap();

        let h = row(&[1.0, 2.0, 3.0]);
        let r = row(&[0.5, 0.5, 0.5]);
        let t = row(&[1.0, 0.0, -1.0]);

        let d = p.displacement(&h, &r, &t).unwrap();
        assert_eq!(d.to_vec2::<f32>().unwrap(), vec![vec![0.5, 2.5, 4.5]]);
    }

    #[test]
    fn test_predict_concatenates() {
        let (mut varmap, p) = build(ScoringKind::Linear, 2);
        let eye = Tensor::eye(2, DType::F32, &Device::Cpu).unwrap();
        varmap.set_one(HEAD_MAPPING, &eye).unwrap();
        varmap.set_one(TAIL_MAPPING, (&eye * 2.0).unwrap()).unwrap();

        let out = p
            .predict(&row(&[1.0, 2.0]), &row(&[3.0, 4.0]), &row(&[5.0, 6.0]))
            .unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), vec![vec![1.0, 2.0, 3.0, 4.0, 10.0, 12.0]]);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ScoringKind::Linear.to_string(), "TransE");
        assert_eq!(ScoringKind::LowRankRelational.name(), "TransD");
    }
}
