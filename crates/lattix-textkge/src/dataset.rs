//! Training triples: loading, encoding, negative sampling and batching.
//!
//! # Input
//!
//! One fact per line, tab-separated, labels as free text:
//!
//! ```text
//! # head<TAB>relation<TAB>tail
//! Apple Inc	acquired	Beats Electronics
//! Federal Reserve	raised	interest rates
//! ```
//!
//! # Encoding policy
//!
//! Every distinct entity and relation label is encoded once. A triple with
//! any label that has no vector is dropped and counted in
//! [`DatasetStats::skipped`]; training continues with the rest.
//!
//! # Negative sampling
//!
//! Each positive gets one corrupted partner: head or tail (coin flip) is
//! replaced by a uniformly drawn entity, retrying a few times to avoid
//! producing a known fact.

use crate::encoder::Encoder;
use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A fact as text labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripleRecord {
    pub head: String,
    pub relation: String,
    pub tail: String,
}

impl TripleRecord {
    pub fn new(head: impl Into<String>, relation: impl Into<String>, tail: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            relation: relation.into(),
            tail: tail.into(),
        }
    }
}

/// Parse tab-separated triples. Blank lines and `#` comments are skipped.
pub fn read_tsv<R: BufRead>(reader: R) -> Result<Vec<TripleRecord>> {
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() != 3 {
            return Err(Error::Format(format!(
                "line {}: expected 3 tab-separated fields, found {}",
                lineno + 1,
                fields.len()
            )));
        }
        records.push(TripleRecord::new(fields[0].trim(), fields[1].trim(), fields[2].trim()));
    }
    Ok(records)
}

/// [`read_tsv`] from a file.
pub fn load_tsv(path: impl AsRef<Path>) -> Result<Vec<TripleRecord>> {
    let file = File::open(path.as_ref())?;
    read_tsv(BufReader::new(file))
}

/// A fact as row indices into the dataset's entity / relation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexedTriple {
    pub head: usize,
    pub relation: usize,
    pub tail: usize,
}

/// Counts from [`TripleDataset::build`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Records given to `build`.
    pub records: usize,
    /// Distinct triples kept for training.
    pub kept: usize,
    /// Records dropped because a label had no vector.
    pub skipped: usize,
    /// Records dropped as exact duplicates.
    pub duplicates: usize,
    /// Embeddable entities.
    pub entities: usize,
    /// Embeddable relations.
    pub relations: usize,
}

/// Encoded triples ready for training.
#[derive(Debug, Clone)]
pub struct TripleDataset {
    entity_labels: Vec<String>,
    relation_labels: Vec<String>,
    /// `(E, D)`
    entity_vectors: Tensor,
    /// `(R, D)`
    relation_vectors: Tensor,
    triples: Vec<IndexedTriple>,
    known: HashSet<IndexedTriple>,
    stats: DatasetStats,
}

/// Label -> row index, encoding each label at most once.
struct LabelTable<'a> {
    encoder: &'a Encoder,
    index: HashMap<String, Option<usize>>,
    labels: Vec<String>,
    data: Vec<f32>,
}

impl<'a> LabelTable<'a> {
    fn new(encoder: &'a Encoder) -> Self {
        Self {
            encoder,
            index: HashMap::new(),
            labels: Vec::new(),
            data: Vec::new(),
        }
    }

    fn lookup(&mut self, label: &str) -> Option<usize> {
        if let Some(&slot) = self.index.get(label) {
            return slot;
        }
        let slot = self.encoder.encode(label).map(|v| {
            self.data.extend_from_slice(&v);
            self.labels.push(label.to_string());
            self.labels.len() - 1
        });
        if slot.is_none() {
            tracing::debug!(label, "label has no known tokens");
        }
        self.index.insert(label.to_string(), slot);
        slot
    }

    fn into_parts(self, device: &Device) -> Result<(Vec<String>, Tensor)> {
        let rows = self.labels.len();
        let tensor = Tensor::from_vec(self.data, (rows, self.encoder.dim()), device)?;
        Ok((self.labels, tensor))
    }
}

impl TripleDataset {
    /// Encode `records` and index the embeddable ones.
    ///
    /// Returns [`Error::EmptyDataset`] if nothing survives.
    pub fn build(records: &[TripleRecord], encoder: &Encoder, device: &Device) -> Result<Self> {
        let mut entities = LabelTable::new(encoder);
        let mut relations = LabelTable::new(encoder);
        let mut triples = Vec::new();
        let mut known = HashSet::new();
        let mut stats = DatasetStats {
            records: records.len(),
            ..Default::default()
        };

        for record in records {
            let head = entities.lookup(&record.head);
            let relation = relations.lookup(&record.relation);
            let tail = entities.lookup(&record.tail);

            let (Some(head), Some(relation), Some(tail)) = (head, relation, tail) else {
                stats.skipped += 1;
                continue;
            };
            let triple = IndexedTriple { head, relation, tail };
            if known.insert(triple) {
                triples.push(triple);
            } else {
                stats.duplicates += 1;
            }
        }

        if triples.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let (entity_labels, entity_vectors) = entities.into_parts(device)?;
        let (relation_labels, relation_vectors) = relations.into_parts(device)?;
        stats.kept = triples.len();
        stats.entities = entity_labels.len();
        stats.relations = relation_labels.len();

        tracing::info!(
            kept = stats.kept,
            skipped = stats.skipped,
            duplicates = stats.duplicates,
            entities = stats.entities,
            relations = stats.relations,
            "built triple dataset"
        );

        Ok(Self {
            entity_labels,
            relation_labels,
            entity_vectors,
            relation_vectors,
            triples,
            known,
            stats,
        })
    }

    pub fn stats(&self) -> DatasetStats {
        self.stats
    }

    pub fn triples(&self) -> &[IndexedTriple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn num_entities(&self) -> usize {
        self.entity_labels.len()
    }

    pub fn num_relations(&self) -> usize {
        self.relation_labels.len()
    }

    pub fn entity_label(&self, idx: usize) -> Option<&str> {
        self.entity_labels.get(idx).map(String::as_str)
    }

    pub fn relation_label(&self, idx: usize) -> Option<&str> {
        self.relation_labels.get(idx).map(String::as_str)
    }

    /// Whether `triple` is one of the training facts.
    pub fn is_known(&self, triple: &IndexedTriple) -> bool {
        self.known.contains(triple)
    }

    /// Head, relation and tail vectors for `triples`, each `(N, D)`.
    pub fn gather(&self, triples: &[IndexedTriple]) -> Result<[Tensor; 3]> {
        let device = self.entity_vectors.device();
        let select = |table: &Tensor, ids: Vec<u32>| -> Result<Tensor> {
            let n = ids.len();
            let ids = Tensor::from_vec(ids, n, device)?;
            Ok(table.index_select(&ids, 0)?)
        };
        let heads = triples.iter().map(|t| t.head as u32).collect();
        let relations = triples.iter().map(|t| t.relation as u32).collect();
        let tails = triples.iter().map(|t| t.tail as u32).collect();
        Ok([
            select(&self.entity_vectors, heads)?,
            select(&self.relation_vectors, relations)?,
            select(&self.entity_vectors, tails)?,
        ])
    }

    /// Split the facts into batches, each paired with fresh negatives.
    pub fn batches(
        &self,
        batch_size: usize,
        sampler: &mut NegativeSampler,
        shuffle: bool,
    ) -> Result<Vec<TripleBatch>> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        let mut order: Vec<usize> = (0..self.triples.len()).collect();
        if shuffle {
            order.shuffle(&mut sampler.rng);
        }

        let batches = order
            .chunks(batch_size)
            .map(|chunk| {
                let positive: Vec<IndexedTriple> = chunk.iter().map(|&i| self.triples[i]).collect();
                let negative = positive.iter().map(|&t| sampler.corrupt(t, self)).collect();
                TripleBatch { positive, negative }
            })
            .collect();
        Ok(batches)
    }
}

/// Draws corrupted triples.
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    rng: XorShiftRng,
    max_attempts: usize,
}

impl NegativeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: XorShiftRng::seed_from_u64(seed),
            max_attempts: 10,
        }
    }

    /// Draws per negative before accepting a known fact.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Replace head or tail of `triple` with a random entity.
    ///
    /// Avoids facts in `dataset` when it can; after `max_attempts` the last
    /// draw is returned as is (tiny graphs may have no valid corruption).
    pub fn corrupt(&mut self, triple: IndexedTriple, dataset: &TripleDataset) -> IndexedTriple {
        let n = dataset.num_entities();
        let mut candidate = triple;
        for _ in 0..self.max_attempts {
            let replacement = self.rng.random_range(0..n);
            candidate = if self.rng.random_bool(0.5) {
                IndexedTriple {
                    head: replacement,
                    ..triple
                }
            } else {
                IndexedTriple {
                    tail: replacement,
                    ..triple
                }
            };
            if !dataset.is_known(&candidate) {
                break;
            }
        }
        candidate
    }
}

/// Aligned positive and negative index triples for one step.
#[derive(Debug, Clone)]
pub struct TripleBatch {
    pub positive: Vec<IndexedTriple>,
    pub negative: Vec<IndexedTriple>,
}

impl TripleBatch {
    pub fn len(&self) -> usize {
        self.positive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positive.is_empty()
    }

    /// Look up the vectors for this batch.
    pub fn gather(&self, dataset: &TripleDataset) -> Result<BatchTensors> {
        let [pos_head, pos_relation, pos_tail] = dataset.gather(&self.positive)?;
        let [neg_head, neg_relation, neg_tail] = dataset.gather(&self.negative)?;
        Ok(BatchTensors {
            pos_head,
            pos_relation,
            pos_tail,
            neg_head,
            neg_relation,
            neg_tail,
        })
    }
}

/// The six `(N, D)` inputs of `EmbeddingModule::forward`.
#[derive(Debug, Clone)]
pub struct BatchTensors {
    pub pos_head: Tensor,
    pub pos_relation: Tensor,
    pub pos_tail: Tensor,
    pub neg_head: Tensor,
    pub neg_relation: Tensor,
    pub neg_tail: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::TokenVectors;
    use std::sync::Arc;

    fn encoder() -> Encoder {
        let words = ["apple", "acquired", "beats", "fed", "raised", "rates", "google", "owns", "youtube"];
        let pairs = words
            .iter()
            .enumerate()
            .map(|(i, w)| (*w, vec![i as f32, 1.0, -(i as f32)]));
        Encoder::new(Arc::new(TokenVectors::from_pairs(3, pairs).unwrap()))
    }

    fn records() -> Vec<TripleRecord> {
        vec![
            TripleRecord::new("Apple", "acquired", "Beats"),
            TripleRecord::new("Fed", "raised", "rates"),
            TripleRecord::new("Google", "owns", "YouTube"),
            TripleRecord::new("Google", "owns", "Zzyzx"),
            TripleRecord::new("Apple", "acquired", "Beats"),
        ]
    }

    #[test]
    fn test_read_tsv() {
        let input = "# comment\nApple Inc\tacquired\tBeats\n\n Fed \traised\trates\r\n";
        let records = read_tsv(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], TripleRecord::new("Apple Inc", "acquired", "Beats"));
        assert_eq!(records[1].head, "Fed");
        assert_eq!(records[1].tail, "rates");
    }

    #[test]
    fn test_read_tsv_bad_line() {
        let err = read_tsv("a\tb\tc\nonly two\tfields\n".as_bytes()).unwrap_err();
        match err {
            Error::Format(msg) => assert!(msg.starts_with("line 2"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_build_skips_unembeddable() {
        let ds = TripleDataset::build(&records(), &encoder(), &Device::Cpu).unwrap();
        let stats = ds.stats();
        assert_eq!(stats.records, 5);
        assert_eq!(stats.kept, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(ds.num_relations(), 3);
        // apple, beats, fed, rates, google, youtube
        assert_eq!(ds.num_entities(), 6);
    }

    #[test]
    fn test_build_empty() {
        let records = vec![TripleRecord::new("x", "y", "z")];
        let err = TripleDataset::build(&records, &encoder(), &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::EmptyDataset));
    }

    #[test]
    fn test_gather_rows() {
        let ds = TripleDataset::build(&records(), &encoder(), &Device::Cpu).unwrap();
        let [h, r, t] = ds.gather(&ds.triples()[..2]).unwrap();
        assert_eq!(h.dims(), &[2, 3]);
        assert_eq!(r.dims(), &[2, 3]);
        // "Beats" is word 2 in the table
        assert_eq!(t.to_vec2::<f32>().unwrap()[0], vec![2.0, 1.0, -2.0]);
    }

    #[test]
    fn test_negatives_differ_from_positives() {
        let ds = TripleDataset::build(&records(), &encoder(), &Device::Cpu).unwrap();
        let mut sampler = NegativeSampler::new(7);
        let batches = ds.batches(2, &mut sampler, true).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches.iter().map(TripleBatch::len).sum::<usize>(), 3);
        for batch in &batches {
            assert_eq!(batch.positive.len(), batch.negative.len());
            for (pos, neg) in batch.positive.iter().zip(&batch.negative) {
                assert_eq!(pos.relation, neg.relation);
                assert!(pos.head == neg.head || pos.tail == neg.tail);
            }
        }

        let tensors = batches[0].gather(&ds).unwrap();
        assert_eq!(tensors.neg_tail.dims(), tensors.pos_tail.dims());
    }

    #[test]
    fn test_sampler_is_deterministic() {
        let ds = TripleDataset::build(&records(), &encoder(), &Device::Cpu).unwrap();
        let a = ds.batches(3, &mut NegativeSampler::new(1), true).unwrap();
        let b = ds.batches(3, &mut NegativeSampler::new(1), true).unwrap();
        assert_eq!(a[0].positive, b[0].positive);
        assert_eq!(a[0].negative, b[0].negative);
    }

    #[test]
    fn test_zero_batch_size() {
        let ds = TripleDataset::build(&records(), &encoder(), &Device::Cpu).unwrap();
        assert!(ds.batches(0, &mut NegativeSampler::new(1), false).is_err());
    }
}
