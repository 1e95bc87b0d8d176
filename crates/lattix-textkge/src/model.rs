//! The embedding module: encoder + projection + margin loss.
//!
//! One type serves both TransE and TransD; the geometry is picked by
//! [`ScoringKind`] at construction and lives in a [`Projection`].
//!
//! # Lifecycle
//!
//! ```text
//! new (Xavier init) -> forward / backward / optimizer step (repeat) -> read out
//! ```
//!
//! The module never updates its own parameters. `forward` builds a
//! differentiable loss; whoever owns the optimizer applies the step, and must
//! finish it before the next `forward` reads the parameters.
//!
//! # Example
//!
//! ```rust,ignore
//! use lattix_textkge::{EmbeddingModule, ModelConfig, ScoringKind, TokenVectors};
//! use std::sync::Arc;
//!
//! let vectors = Arc::new(TokenVectors::load("GoogleNews-vectors-negative300.bin", Default::default(), Default::default())?);
//! let transe = EmbeddingModule::new(ModelConfig::default(), vectors.clone())?;
//! let transd = EmbeddingModule::new(
//!     ModelConfig::default().with_kind(ScoringKind::LowRankRelational),
//!     vectors,
//! )?;
//!
//! let d = transe.score_text("Apple", "acquired", "Beats")?;
//! ```

use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::export::ProjectionParameters;
use crate::loss::{self, NormOrder};
use crate::scoring::{self, Projection, ScoringKind};
use crate::vectors::{LoadOptions, TokenVectors, VectorFormat};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Where tensors live. Has no effect on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceChoice {
    #[default]
    Cpu,
    /// CUDA device ordinal; falls back to CPU when CUDA is unavailable.
    Cuda(usize),
}

impl DeviceChoice {
    pub fn to_device(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Ok(Device::cuda_if_available(ordinal)?),
        }
    }
}

/// Model hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Embedding width D; must equal the token vector width (default: 300).
    pub dim: usize,
    /// Norm for displacement length (default: L2).
    pub norm: NormOrder,
    /// Margin γ (default: 1.0).
    pub gamma: f64,
    /// Projection geometry (default: TransE).
    pub kind: ScoringKind,
    /// Compute target (default: CPU).
    pub device: DeviceChoice,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dim: 300,
            norm: NormOrder::L2,
            gamma: 1.0,
            kind: ScoringKind::Linear,
            device: DeviceChoice::Cpu,
        }
    }
}

impl ModelConfig {
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    pub fn with_norm(mut self, norm: NormOrder) -> Self {
        self.norm = norm;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_kind(mut self, kind: ScoringKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_device(mut self, device: DeviceChoice) -> Self {
        self.device = device;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidConfig("dim must be positive".into()));
        }
        if !self.gamma.is_finite() || self.gamma < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "gamma must be finite and non-negative, got {}",
                self.gamma
            )));
        }
        Ok(())
    }
}

/// TransE / TransD embedding module over text-derived vectors.
pub struct EmbeddingModule {
    config: ModelConfig,
    encoder: Encoder,
    varmap: VarMap,
    projection: Projection,
    device: Device,
}

impl std::fmt::Debug for EmbeddingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingModule")
            .field("config", &self.config)
            .field("vocab", &self.encoder.vectors().len())
            .field("device", &self.device)
            .finish()
    }
}

impl EmbeddingModule {
    /// Build a module around a shared token vector table.
    ///
    /// Fails if the table width differs from `config.dim`.
    pub fn new(config: ModelConfig, vectors: Arc<TokenVectors>) -> Result<Self> {
        config.validate()?;
        if vectors.dim() != config.dim {
            return Err(Error::ShapeMismatch {
                what: "token vector width",
                expected: config.dim,
                got: vectors.dim(),
            });
        }

        let device = config.device.to_device()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let projection = Projection::init(config.kind, config.dim, &vb)?;

        tracing::debug!(
            model = config.kind.name(),
            dim = config.dim,
            gamma = config.gamma,
            norm = config.norm.order(),
            "initialized embedding module"
        );

        Ok(Self {
            config,
            encoder: Encoder::new(vectors),
            varmap,
            projection,
            device,
        })
    }

    /// Load the token vectors from disk, then build the module.
    ///
    /// A missing or corrupt vectors file is fatal.
    pub fn from_path(config: ModelConfig, path: impl AsRef<Path>, format: VectorFormat) -> Result<Self> {
        let vectors = TokenVectors::load(path, format, LoadOptions::default())?;
        Self::new(config, Arc::new(vectors))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn kind(&self) -> ScoringKind {
        self.config.kind
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Trainable variables, for handing to an optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Check rank 2, width D, and a common batch size. Returns the batch size.
    fn check_inputs(&self, inputs: &[(&'static str, &Tensor)]) -> Result<usize> {
        let mut batch = None;
        for &(what, t) in inputs {
            let dims = t.dims();
            if dims.len() != 2 {
                return Err(Error::ShapeMismatch {
                    what,
                    expected: 2,
                    got: dims.len(),
                });
            }
            if dims[1] != self.config.dim {
                return Err(Error::ShapeMismatch {
                    what,
                    expected: self.config.dim,
                    got: dims[1],
                });
            }
            match batch {
                None => batch = Some(dims[0]),
                Some(n) if n != dims[0] => {
                    return Err(Error::ShapeMismatch {
                        what,
                        expected: n,
                        got: dims[0],
                    })
                }
                Some(_) => {}
            }
        }
        Ok(batch.unwrap_or(0))
    }

    /// Displacement `h·M_h + r - t·M_t`, shape `(N, D)`.
    pub fn displacement(&self, head: &Tensor, relation: &Tensor, tail: &Tensor) -> Result<Tensor> {
        self.check_inputs(&[("head", head), ("relation", relation), ("tail", tail)])?;
        self.projection.displacement(head, relation, tail)
    }

    /// Displacement norm per row, shape `(N)`. Lower is more plausible.
    pub fn distance(&self, head: &Tensor, relation: &Tensor, tail: &Tensor) -> Result<Tensor> {
        loss::norm(&self.displacement(head, relation, tail)?, self.config.norm)
    }

    /// Scalar margin loss for a batch of positive and corrupted triples.
    ///
    /// All six inputs are `(N, D)`. The loss is summed over the batch and can
    /// be back-propagated into every projection parameter.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        pos_head: &Tensor,
        pos_relation: &Tensor,
        pos_tail: &Tensor,
        neg_head: &Tensor,
        neg_relation: &Tensor,
        neg_tail: &Tensor,
    ) -> Result<Tensor> {
        self.check_inputs(&[
            ("pos_head", pos_head),
            ("pos_relation", pos_relation),
            ("pos_tail", pos_tail),
            ("neg_head", neg_head),
            ("neg_relation", neg_relation),
            ("neg_tail", neg_tail),
        ])?;

        let (m_h, m_t) = self.projection.matrices()?;
        let pos = scoring::displace(pos_head, pos_relation, pos_tail, &m_h, &m_t)?;
        let neg = scoring::displace(neg_head, neg_relation, neg_tail, &m_h, &m_t)?;
        loss::margin_ranking_loss(&pos, &neg, self.config.gamma, self.config.norm)
    }

    /// `[h·M_h | r | t·M_t]`, shape `(N, 3D)`.
    pub fn predict(&self, head: &Tensor, relation: &Tensor, tail: &Tensor) -> Result<Tensor> {
        self.check_inputs(&[("head", head), ("relation", relation), ("tail", tail)])?;
        self.projection.predict(head, relation, tail)
    }

    fn encode_triple(&self, head: &str, relation: &str, tail: &str) -> Result<Option<[Tensor; 3]>> {
        let enc = |text: &str| self.encoder.encode_tensor(text, &self.device);
        match (enc(head)?, enc(relation)?, enc(tail)?) {
            (Some(h), Some(r), Some(t)) => Ok(Some([h, r, t])),
            _ => Ok(None),
        }
    }

    /// [`predict`](Self::predict) on text labels. `None` if any label has no vector.
    pub fn predict_text(&self, head: &str, relation: &str, tail: &str) -> Result<Option<Vec<f32>>> {
        match self.encode_triple(head, relation, tail)? {
            Some([h, r, t]) => Ok(Some(self.predict(&h, &r, &t)?.squeeze(0)?.to_vec1::<f32>()?)),
            None => Ok(None),
        }
    }

    /// [`distance`](Self::distance) on text labels. `None` if any label has no vector.
    pub fn score_text(&self, head: &str, relation: &str, tail: &str) -> Result<Option<f32>> {
        match self.encode_triple(head, relation, tail)? {
            Some([h, r, t]) => Ok(Some(self.distance(&h, &r, &t)?.squeeze(0)?.to_scalar::<f32>()?)),
            None => Ok(None),
        }
    }

    /// Snapshot of the current parameter values.
    pub fn parameters(&self) -> Result<ProjectionParameters> {
        ProjectionParameters::from_projection(&self.projection, self.config.dim)
    }

    /// Overwrite one parameter (`head_mapping`, `tail_mapping`, `relation_mapping`).
    pub fn set_parameter(&mut self, name: &str, value: &Tensor) -> Result<()> {
        self.varmap.set_one(name, value)?;
        Ok(())
    }

    /// Write the parameters as safetensors.
    pub fn save_parameters(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "saved projection parameters");
        Ok(())
    }

    /// Load parameters previously written by [`save_parameters`](Self::save_parameters).
    ///
    /// The file must hold every parameter of this module's kind with matching shapes.
    pub fn load_parameters(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "loaded projection parameters");
        Ok(())
    }
}
