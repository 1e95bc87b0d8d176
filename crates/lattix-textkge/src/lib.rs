//! Knowledge graph embeddings seeded from pretrained word vectors.
//!
//! Entities and relations are not given free embedding tables. Each label is
//! read as text, tokenized, and mapped to the mean of its tokens' word vectors
//! (word2vec format). Only the projection parameters are learned.
//!
//! ```text
//! "Steve Jobs" -> [steve, jobs] -> mean(v_steve, v_jobs) -> h
//! ```
//!
//! ## Models
//!
//! | Model | Kind | Projection |
//! |-------|------|------------|
//! | TransE | [`ScoringKind::Linear`] | `h·W_h + r ≈ t·W_t` |
//! | TransD | [`ScoringKind::LowRankRelational`] | `h·(r_p h_p + I) + r ≈ t·(r_p t_p + I)` |
//!
//! Both are trained with a margin ranking loss against corrupted triples:
//!
//! ```text
//! L = Σ max(0, γ + ||d⁺|| - ||d⁻||)
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! TokenVectors ─> Encoder ─> TripleDataset ─> Trainer::fit ─> export_embeddings
//!                              │                    │
//!                              └── NegativeSampler  └── EmbeddingModule::forward
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lattix_textkge::{
//!     dataset, EmbeddingModule, ModelConfig, Trainer, TrainingConfig, TripleDataset,
//! };
//!
//! let module = EmbeddingModule::from_path(ModelConfig::default(), "vectors.bin", Default::default())?;
//! let records = dataset::load_tsv("triples.tsv")?;
//! let data = TripleDataset::build(&records, module.encoder(), module.device())?;
//!
//! let report = Trainer::new(TrainingConfig::default()).fit(&module, &data)?;
//! let d = module.score_text("Apple", "acquired", "Beats")?;
//! ```
//!
//! ## References
//!
//! - Bordes et al. (2013). "Translating Embeddings for Modeling Multi-relational Data"
//! - Ji et al. (2015). "Knowledge Graph Embedding via Dynamic Mapping Matrix"
//! - Mikolov et al. (2013). "Distributed Representations of Words and Phrases"

pub mod dataset;
pub mod encoder;
mod error;
pub mod export;
pub mod loss;
pub mod model;
pub mod scoring;
pub mod training;
pub mod vectors;

pub use dataset::{
    BatchTensors, DatasetStats, IndexedTriple, NegativeSampler, TripleBatch, TripleDataset, TripleRecord,
};
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use export::{export_embeddings, EmbeddingExport, Matrix, ProjectionParameters, TripleEmbedding};
pub use loss::{margin_ranking_loss, NormOrder};
pub use model::{DeviceChoice, EmbeddingModule, ModelConfig};
pub use scoring::{Projection, ScoringKind};
pub use training::{
    EpochMetrics, LrSchedule, OptimizerKind, ProgressCallback, Trainer, TrainingConfig, TrainingReport,
};
pub use vectors::{LoadOptions, TokenVectors, VectorFormat};
