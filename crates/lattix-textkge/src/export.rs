//! Read-out of trained parameters and per-triple embeddings as JSON.

use crate::dataset::TripleDataset;
use crate::error::{Error, Result};
use crate::model::EmbeddingModule;
use crate::scoring::{Projection, ScoringKind};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Triples per `predict` call during export.
const EXPORT_CHUNK: usize = 256;

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl Matrix {
    pub fn from_tensor(t: &Tensor) -> Result<Self> {
        let (rows, cols) = t.dims2()?;
        let data = t.flatten_all()?.to_vec1::<f32>()?;
        Ok(Self { rows, cols, data })
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        if self.data.len() != self.rows * self.cols {
            return Err(Error::ShapeMismatch {
                what: "matrix data length",
                expected: self.rows * self.cols,
                got: self.data.len(),
            });
        }
        Ok(Tensor::from_slice(&self.data, (self.rows, self.cols), device)?)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// Snapshot of a module's learnable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionParameters {
    pub kind: ScoringKind,
    pub dim: usize,
    pub head_mapping: Matrix,
    pub tail_mapping: Matrix,
    /// Only present for TransD.
    pub relation_mapping: Option<Matrix>,
}

impl ProjectionParameters {
    pub fn from_projection(projection: &Projection, dim: usize) -> Result<Self> {
        let params = match projection {
            Projection::Linear {
                head_mapping,
                tail_mapping,
            } => Self {
                kind: ScoringKind::Linear,
                dim,
                head_mapping: Matrix::from_tensor(head_mapping)?,
                tail_mapping: Matrix::from_tensor(tail_mapping)?,
                relation_mapping: None,
            },
            Projection::LowRankRelational {
                head_mapping,
                tail_mapping,
                relation_mapping,
                ..
            } => Self {
                kind: ScoringKind::LowRankRelational,
                dim,
                head_mapping: Matrix::from_tensor(head_mapping)?,
                tail_mapping: Matrix::from_tensor(tail_mapping)?,
                relation_mapping: Some(Matrix::from_tensor(relation_mapping)?),
            },
        };
        Ok(params)
    }

    /// Copy these values into `module`. Kind, width and shapes must match.
    pub fn apply(&self, module: &mut EmbeddingModule) -> Result<()> {
        if self.kind != module.kind() {
            return Err(Error::InvalidConfig(format!(
                "parameters are for {}, module is {}",
                self.kind,
                module.kind()
            )));
        }
        if self.dim != module.dim() {
            return Err(Error::ShapeMismatch {
                what: "parameter width",
                expected: module.dim(),
                got: self.dim,
            });
        }

        let device = module.device().clone();
        let mut named = vec![
            (crate::scoring::HEAD_MAPPING, &self.head_mapping),
            (crate::scoring::TAIL_MAPPING, &self.tail_mapping),
        ];
        match (self.kind, &self.relation_mapping) {
            (ScoringKind::LowRankRelational, Some(m)) => named.push((crate::scoring::RELATION_MAPPING, m)),
            (ScoringKind::LowRankRelational, None) => {
                return Err(Error::Format("TransD parameters without relation_mapping".into()))
            }
            (ScoringKind::Linear, _) => {}
        }
        for ((name, (rows, cols)), (_, matrix)) in self.kind.parameter_shapes(self.dim).into_iter().zip(named) {
            if matrix.rows != rows {
                return Err(Error::ShapeMismatch {
                    what: name,
                    expected: rows,
                    got: matrix.rows,
                });
            }
            if matrix.cols != cols {
                return Err(Error::ShapeMismatch {
                    what: name,
                    expected: cols,
                    got: matrix.cols,
                });
            }
            module.set_parameter(name, &matrix.to_tensor(&device)?)?;
        }
        Ok(())
    }
}

/// `predict` output for one dataset triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripleEmbedding {
    pub head: String,
    pub relation: String,
    pub tail: String,
    /// `[h·M_h | r | t·M_t]`, length `3 * dim`.
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingExport {
    /// "TransE" or "TransD".
    pub model: String,
    pub dim: usize,
    pub parameters: ProjectionParameters,
    pub triples: Vec<TripleEmbedding>,
}

/// Run `predict` over every triple of `dataset`.
pub fn export_embeddings(module: &EmbeddingModule, dataset: &TripleDataset) -> Result<EmbeddingExport> {
    let mut triples = Vec::with_capacity(dataset.len());

    for chunk in dataset.triples().chunks(EXPORT_CHUNK) {
        let [h, r, t] = dataset.gather(chunk)?;
        let rows = module.predict(&h, &r, &t)?.to_vec2::<f32>()?;
        for (triple, vector) in chunk.iter().zip(rows) {
            let label = |l: Option<&str>| l.unwrap_or_default().to_string();
            triples.push(TripleEmbedding {
                head: label(dataset.entity_label(triple.head)),
                relation: label(dataset.relation_label(triple.relation)),
                tail: label(dataset.entity_label(triple.tail)),
                vector,
            });
        }
    }

    tracing::debug!(triples = triples.len(), "exported triple embeddings");

    Ok(EmbeddingExport {
        model: module.kind().name().to_string(),
        dim: module.dim(),
        parameters: module.parameters()?,
        triples,
    })
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TripleRecord;
    use crate::model::ModelConfig;
    use crate::vectors::TokenVectors;
    use std::sync::Arc;

    fn vectors() -> Arc<TokenVectors> {
        let pairs = vec![
            ("paris", vec![1.0, 0.0, 0.0]),
            ("france", vec![0.0, 1.0, 0.0]),
            ("capital", vec![0.0, 0.0, 1.0]),
            ("berlin", vec![1.0, 1.0, 0.0]),
            ("germany", vec![0.0, 1.0, 1.0]),
        ];
        Arc::new(TokenVectors::from_pairs(3, pairs).unwrap())
    }

    fn records() -> Vec<TripleRecord> {
        vec![
            TripleRecord::new("Paris", "capital", "France"),
            TripleRecord::new("Berlin", "capital", "Germany"),
        ]
    }

    #[test]
    fn test_parameter_shapes() {
        let m = EmbeddingModule::new(ModelConfig::default().with_dim(3), vectors()).unwrap();
        let p = m.parameters().unwrap();
        assert_eq!(p.head_mapping.shape(), (3, 3));
        assert!(p.relation_mapping.is_none());

        let m = EmbeddingModule::new(
            ModelConfig::default()
                .with_dim(3)
                .with_kind(ScoringKind::LowRankRelational),
            vectors(),
        )
        .unwrap();
        let p = m.parameters().unwrap();
        assert_eq!(p.head_mapping.shape(), (1, 3));
        assert_eq!(p.relation_mapping.map(|r| r.shape()), Some((3, 1)));
    }

    #[test]
    fn test_export_every_triple() {
        let m = EmbeddingModule::new(ModelConfig::default().with_dim(3), vectors()).unwrap();
        let ds = TripleDataset::build(&records(), m.encoder(), m.device()).unwrap();

        let export = export_embeddings(&m, &ds).unwrap();
        assert_eq!(export.model, "TransE");
        assert_eq!(export.triples.len(), 2);
        assert_eq!(export.triples[0].head, "Paris");
        assert_eq!(export.triples[1].tail, "Germany");
        assert!(export.triples.iter().all(|t| t.vector.len() == 9));
        // middle third is the untouched relation vector
        assert_eq!(&export.triples[0].vector[3..6], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_json_file_roundtrip_and_apply() {
        let src = EmbeddingModule::new(ModelConfig::default().with_dim(3), vectors()).unwrap();
        let params = src.parameters().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        write_json(&path, &params).unwrap();
        let loaded: ProjectionParameters = read_json(&path).unwrap();
        assert_eq!(loaded, params);

        let mut dst = EmbeddingModule::new(ModelConfig::default().with_dim(3), vectors()).unwrap();
        loaded.apply(&mut dst).unwrap();
        assert_eq!(dst.parameters().unwrap(), params);
    }

    #[test]
    fn test_apply_rejects_other_kind() {
        let src = EmbeddingModule::new(ModelConfig::default().with_dim(3), vectors()).unwrap();
        let mut dst = EmbeddingModule::new(
            ModelConfig::default()
                .with_dim(3)
                .with_kind(ScoringKind::LowRankRelational),
            vectors(),
        )
        .unwrap();
        let err = src.parameters().unwrap().apply(&mut dst).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_apply_reports_differing_dimension() {
        let transd = || {
            EmbeddingModule::new(
                ModelConfig::default()
                    .with_dim(3)
                    .with_kind(ScoringKind::LowRankRelational),
                vectors(),
            )
            .unwrap()
        };
        let mut params = transd().parameters().unwrap();
        // 1x3 stored as 3x1
        params.head_mapping = Matrix {
            rows: 3,
            cols: 1,
            data: params.head_mapping.data.clone(),
        };

        let err = params.apply(&mut transd()).unwrap_err();
        assert!(
            matches!(err, Error::ShapeMismatch { what: "head_mapping", expected: 1, got: 3 }),
            "{err}"
        );
    }

    #[test]
    fn test_matrix_bad_length() {
        let m = Matrix {
            rows: 2,
            cols: 2,
            data: vec![1.0; 3],
        };
        assert!(m.to_tensor(&Device::Cpu).is_err());
    }
}
