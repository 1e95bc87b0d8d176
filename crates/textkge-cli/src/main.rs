//! textkge - train and query text-seeded KG embeddings from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Train TransD on a TSV of (head, relation, tail) facts
//! textkge train --vectors GoogleNews-vectors-negative300.bin --triples facts.tsv \
//!     --output out/ --model transd --epochs 120
//!
//! # Distance of one triple under trained parameters
//! textkge score --vectors vectors.bin --parameters out/parameters.safetensors \
//!     --model transd "Apple" "acquired" "Beats"
//!
//! # Inspect how a label is encoded
//! textkge encode --vectors vectors.bin "Federal Reserve"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use lattix_textkge::export::write_json;
use lattix_textkge::{
    dataset, export_embeddings, DeviceChoice, EmbeddingModule, Encoder, LoadOptions, ModelConfig, NormOrder,
    ScoringKind, TokenVectors, Trainer, TrainingConfig, TripleDataset, VectorFormat,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "textkge")]
#[command(about = "Text-seeded TransE / TransD knowledge graph embeddings", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train projection parameters on a triple file
    Train {
        /// Pretrained word vectors (word2vec format)
        #[arg(long)]
        vectors: PathBuf,

        /// Vectors file is in text format instead of binary
        #[arg(long)]
        text_vectors: bool,

        /// Only load the first N words
        #[arg(long)]
        limit: Option<usize>,

        /// Tab-separated head / relation / tail file
        #[arg(long)]
        triples: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Projection model
        #[arg(long, default_value = "transe")]
        model: ModelKind,

        /// Training config (JSON); flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Initial learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Margin
        #[arg(long, default_value = "1.0")]
        gamma: f64,

        /// Distance norm (1 or 2)
        #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=2))]
        norm: u8,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Use CUDA device 0 if available
        #[arg(long)]
        cuda: bool,
    },

    /// Score a single triple (lower is more plausible)
    Score {
        #[arg(long)]
        vectors: PathBuf,

        #[arg(long)]
        text_vectors: bool,

        /// Parameters written by `train` (.safetensors)
        #[arg(long)]
        parameters: PathBuf,

        #[arg(long, default_value = "transe")]
        model: ModelKind,

        #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=2))]
        norm: u8,

        head: String,
        relation: String,
        tail: String,
    },

    /// Show how a piece of text is encoded
    Encode {
        #[arg(long)]
        vectors: PathBuf,

        #[arg(long)]
        text_vectors: bool,

        text: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelKind {
    /// Global linear head / tail maps
    Transe,
    /// Relation-specific rank-1 maps plus identity
    Transd,
}

impl From<ModelKind> for ScoringKind {
    fn from(kind: ModelKind) -> Self {
        match kind {
            ModelKind::Transe => ScoringKind::Linear,
            ModelKind::Transd => ScoringKind::LowRankRelational,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Train {
            vectors,
            text_vectors,
            limit,
            triples,
            output,
            model,
            config,
            epochs,
            batch_size,
            lr,
            gamma,
            norm,
            seed,
            cuda,
        } => {
            let vectors = load_vectors(&vectors, text_vectors, limit)?;
            let model_config = ModelConfig::default()
                .with_dim(vectors.dim())
                .with_kind(model.into())
                .with_gamma(gamma)
                .with_norm(norm_order(norm)?)
                .with_device(if cuda { DeviceChoice::Cuda(0) } else { DeviceChoice::Cpu });

            let mut training = match config {
                Some(path) => TrainingConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?,
                None => TrainingConfig::default(),
            };
            if let Some(epochs) = epochs {
                training = training.with_epochs(epochs);
            }
            if let Some(batch_size) = batch_size {
                training = training.with_batch_size(batch_size);
            }
            if let Some(lr) = lr {
                training = training.with_learning_rate(lr);
            }
            if let Some(seed) = seed {
                training = training.with_seed(seed);
            }

            cmd_train(vectors, model_config, training, &triples, &output)
        }
        Commands::Score {
            vectors,
            text_vectors,
            parameters,
            model,
            norm,
            head,
            relation,
            tail,
        } => {
            let vectors = load_vectors(&vectors, text_vectors, None)?;
            let config = ModelConfig::default()
                .with_dim(vectors.dim())
                .with_kind(model.into())
                .with_norm(norm_order(norm)?);
            cmd_score(vectors, config, &parameters, &head, &relation, &tail)
        }
        Commands::Encode {
            vectors,
            text_vectors,
            text,
        } => {
            let vectors = load_vectors(&vectors, text_vectors, None)?;
            cmd_encode(vectors, &text)
        }
    }
}

fn norm_order(p: u8) -> Result<NormOrder> {
    NormOrder::from_order(p).with_context(|| format!("Unsupported norm {p}"))
}

fn load_vectors(path: &Path, text: bool, limit: Option<usize>) -> Result<Arc<TokenVectors>> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", path.display()));

    let format = if text { VectorFormat::Text } else { VectorFormat::Binary };
    let options = LoadOptions { limit };
    let vectors = TokenVectors::load(path, format, options)
        .with_context(|| format!("Failed to load vectors {}", path.display()))?;

    pb.finish_with_message(format!(
        "Loaded {} words (dim {}) in {:.2?}",
        vectors.len(),
        vectors.dim(),
        start.elapsed()
    ));
    Ok(Arc::new(vectors))
}

fn cmd_train(
    vectors: Arc<TokenVectors>,
    model_config: ModelConfig,
    training: TrainingConfig,
    triples: &Path,
    output: &Path,
) -> Result<()> {
    let module = EmbeddingModule::new(model_config, vectors)?;

    let records = dataset::load_tsv(triples).with_context(|| format!("Failed to read triples {}", triples.display()))?;
    let data = TripleDataset::build(&records, module.encoder(), module.device())
        .with_context(|| format!("No usable triples in {}", triples.display()))?;

    std::fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;

    let pb = ProgressBar::new(training.epochs as u64);
    pb.set_style(ProgressStyle::default_bar().template("{bar:40} {pos}/{len} epochs {msg}")?);
    let bar = pb.clone();

    let start = Instant::now();
    let report = Trainer::new(training)
        .with_callback(Box::new(move |_epoch, metrics| {
            bar.set_message(format!("loss {:.4} lr {:.2e}", metrics.loss, metrics.learning_rate));
            bar.inc(1);
        }))
        .fit(&module, &data)?;
    pb.finish_and_clear();

    let params_path = output.join("parameters.safetensors");
    module.save_parameters(&params_path)?;

    let export = export_embeddings(&module, &data)?;
    let embeddings_path = output.join("embeddings.json");
    write_json(&embeddings_path, &export).with_context(|| format!("Failed to write {}", embeddings_path.display()))?;

    let report_path = output.join("report.json");
    write_json(&report_path, &report).with_context(|| format!("Failed to write {}", report_path.display()))?;
    tracing::info!(output = %output.display(), triples = export.triples.len(), "wrote training outputs");

    let stats = report.dataset;
    println!("{} Training Summary", module.kind());
    println!("==========================");
    println!("Triples:        {} kept, {} skipped, {} duplicate", stats.kept, stats.skipped, stats.duplicates);
    println!("Entities:       {}", stats.entities);
    println!("Relations:      {}", stats.relations);
    println!("Epochs:         {}", report.loss_history.len());
    if let Some(last) = report.loss_history.last() {
        println!("Final loss:     {:.4}", last);
        println!("Best loss:      {:.4} (epoch {})", report.best_loss, report.best_epoch);
    }
    println!("Time:           {:.2?}", start.elapsed());
    println!("Output:         {}", output.display());

    Ok(())
}

fn cmd_score(
    vectors: Arc<TokenVectors>,
    config: ModelConfig,
    parameters: &Path,
    head: &str,
    relation: &str,
    tail: &str,
) -> Result<()> {
    let mut module = EmbeddingModule::new(config, vectors)?;
    module
        .load_parameters(parameters)
        .with_context(|| format!("Failed to load parameters {}", parameters.display()))?;

    match module.score_text(head, relation, tail)? {
        Some(distance) => println!("{distance:.6}"),
        None => println!("unembeddable"),
    }
    Ok(())
}

fn cmd_encode(vectors: Arc<TokenVectors>, text: &str) -> Result<()> {
    let kept: Vec<String> = Encoder::tokenize(text)
        .into_iter()
        .filter(|tok| vectors.contains(tok))
        .collect();
    let encoder = Encoder::new(vectors);

    match encoder.encode(text) {
        Some(v) => {
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            println!("Tokens: {}", kept.join(" "));
            println!("Dim:    {}", v.len());
            println!("Norm:   {norm:.6}");
        }
        None => println!("no vector"),
    }
    Ok(())
}
