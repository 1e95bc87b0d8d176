//! Training loop for the embedding module.
//!
//! Each step is strictly sequential:
//!
//! 1. Gather the vectors of a batch of positive triples and their corruptions
//! 2. `forward` -> scalar margin loss
//! 3. Backward pass and optimizer step on the projection parameters
//!
//! The learning rate follows an explicit step-decay [`LrSchedule`] evaluated
//! at the start of every epoch, so nothing outside the config influences it.
//!
//! # Example
//!
//! ```rust,ignore
//! use lattix_textkge::training::{Trainer, TrainingConfig};
//!
//! let config = TrainingConfig::default()
//!     .with_epochs(120)
//!     .with_batch_size(32)
//!     .with_learning_rate(1e-2);
//!
//! let report = Trainer::new(config).fit(&module, &dataset)?;
//! println!("final loss {:.4}", report.loss_history.last().unwrap());
//! ```
//!
//! # Loss scale
//!
//! The reported epoch loss is the mean over batches of the *summed* batch
//! loss. Because the batch loss is a sum, the effective step size depends on
//! the batch size; keep `batch_size` fixed when comparing learning rates.

use crate::dataset::{DatasetStats, NegativeSampler, TripleDataset};
use crate::error::{Error, Result};
use crate::model::EmbeddingModule;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Step-decay learning-rate schedule: `base / factor^(epoch / every)`.
///
/// Pure and stateless; `every == 0` means constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    pub base: f64,
    pub every: usize,
    pub factor: f64,
}

impl LrSchedule {
    pub fn constant(base: f64) -> Self {
        Self {
            base,
            every: 0,
            factor: 1.0,
        }
    }

    /// Learning rate for a zero-based `epoch`.
    pub fn lr(&self, epoch: usize) -> f64 {
        if self.every == 0 {
            return self.base;
        }
        let decays = (epoch / self.every) as i32;
        self.base / self.factor.powi(decays)
    }
}

/// Which optimizer updates the projection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Adam (AdamW with zero weight decay).
    #[default]
    Adam,
    /// Plain stochastic gradient descent.
    Sgd,
}

/// Training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the data (default: 120).
    pub epochs: usize,
    /// Positive triples per step (default: 32).
    pub batch_size: usize,
    /// Initial learning rate (default: 0.01).
    pub learning_rate: f64,
    /// Decay the learning rate every this many epochs; 0 disables (default: 30).
    pub decay_every: usize,
    /// Divide the learning rate by this at each decay (default: 5.0).
    pub decay_factor: f64,
    /// Optimizer (default: Adam).
    pub optimizer: OptimizerKind,
    /// Seed for shuffling and negative sampling (default: 42).
    pub seed: u64,
    /// Shuffle triples every epoch (default: true).
    pub shuffle: bool,
    /// Draws per negative before accepting a known fact (default: 10).
    pub max_negative_attempts: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 120,
            batch_size: 32,
            learning_rate: 1e-2,
            decay_every: 30,
            decay_factor: 5.0,
            optimizer: OptimizerKind::Adam,
            seed: 42,
            shuffle: true,
            max_negative_attempts: 10,
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_decay(mut self, every: usize, factor: f64) -> Self {
        self.decay_every = every;
        self.decay_factor = factor;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Read a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn schedule(&self) -> LrSchedule {
        LrSchedule {
            base: self.learning_rate,
            every: self.decay_every,
            factor: self.decay_factor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.decay_factor.is_finite() && self.decay_factor > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "decay_factor must be positive, got {}",
                self.decay_factor
            )));
        }
        Ok(())
    }
}

/// Metrics from one epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochMetrics {
    /// Mean over batches of the summed batch loss.
    pub loss: f32,
    /// Learning rate used for this epoch.
    pub learning_rate: f64,
    /// Steps taken.
    pub num_batches: usize,
}

/// Callback for training progress.
pub type ProgressCallback = Box<dyn Fn(usize, &EpochMetrics) + Send + Sync>;

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Epoch loss, one entry per epoch run.
    pub loss_history: Vec<f32>,
    /// Epoch with the lowest loss.
    pub best_epoch: usize,
    pub best_loss: f32,
    /// Learning rate of the last epoch.
    pub final_lr: f64,
    pub dataset: DatasetStats,
}

/// Wrapper to use either Adam or SGD uniformly.
enum OptimizerWrapper {
    Adam(AdamW),
    Sgd(SGD),
}

impl OptimizerWrapper {
    fn new(kind: OptimizerKind, vars: Vec<Var>, lr: f64) -> Result<Self> {
        let opt = match kind {
            OptimizerKind::Adam => {
                let params = ParamsAdamW {
                    lr,
                    weight_decay: 0.0,
                    ..Default::default()
                };
                Self::Adam(AdamW::new(vars, params)?)
            }
            OptimizerKind::Sgd => Self::Sgd(SGD::new(vars, lr)?),
        };
        Ok(opt)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Adam(opt) => opt.set_learning_rate(lr),
            Self::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }

    fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::Adam(opt) => opt.backward_step(loss)?,
            Self::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }
}

/// Runs the epoch loop.
pub struct Trainer {
    config: TrainingConfig,
    callback: Option<ProgressCallback>,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    /// Called after every epoch with its zero-based index.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `module`'s projection parameters on `dataset`.
    ///
    /// Parameters are updated in place; the module stays usable afterwards
    /// for `predict` and export.
    pub fn fit(&self, module: &EmbeddingModule, dataset: &TripleDataset) -> Result<TrainingReport> {
        self.config.validate()?;

        let schedule = self.config.schedule();
        let mut optimizer = OptimizerWrapper::new(self.config.optimizer, module.vars(), schedule.lr(0))?;
        let mut sampler =
            NegativeSampler::new(self.config.seed).with_max_attempts(self.config.max_negative_attempts);

        tracing::info!(
            model = module.kind().name(),
            triples = dataset.len(),
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            lr = self.config.learning_rate,
            "starting training"
        );

        let mut loss_history = Vec::with_capacity(self.config.epochs);
        let mut best_loss = f32::INFINITY;
        let mut best_epoch = 0;
        let mut lr = schedule.lr(0);

        for epoch in 0..self.config.epochs {
            lr = schedule.lr(epoch);
            optimizer.set_learning_rate(lr);

            let batches = dataset.batches(self.config.batch_size, &mut sampler, self.config.shuffle)?;
            let mut total_loss = 0.0f64;

            for batch in &batches {
                let x = batch.gather(dataset)?;
                let loss = module.forward(
                    &x.pos_head,
                    &x.pos_relation,
                    &x.pos_tail,
                    &x.neg_head,
                    &x.neg_relation,
                    &x.neg_tail,
                )?;
                let value = loss.to_scalar::<f32>()?;
                if !value.is_finite() {
                    return Err(Error::Training(format!("non-finite loss {value} at epoch {epoch}")));
                }
                optimizer.backward_step(&loss)?;
                total_loss += f64::from(value);
            }

            let avg_loss = if batches.is_empty() {
                0.0
            } else {
                (total_loss / batches.len() as f64) as f32
            };
            loss_history.push(avg_loss);

            if avg_loss < best_loss {
                best_loss = avg_loss;
                best_epoch = epoch;
            }

            tracing::info!(epoch, loss = avg_loss, lr, "epoch finished");

            if let Some(callback) = &self.callback {
                let metrics = EpochMetrics {
                    loss: avg_loss,
                    learning_rate: lr,
                    num_batches: batches.len(),
                };
                callback(epoch, &metrics);
            }
        }

        Ok(TrainingReport {
            loss_history,
            best_epoch,
            best_loss,
            final_lr: lr,
            dataset: dataset.stats(),
        })
    }
}
