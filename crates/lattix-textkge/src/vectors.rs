//! Pretrained token vectors (word2vec format).
//!
//! The table is loaded once and then shared read-only between every model
//! that needs it (`Arc<TokenVectors>`). A GoogleNews-sized table is several
//! gigabytes, so nothing in this crate clones it.
//!
//! # Formats
//!
//! | Format | Layout |
//! |--------|--------|
//! | [`VectorFormat::Binary`] | `"<count> <dim>\n"`, then per word: `<word> <dim x f32 LE>` (optional `\n`) |
//! | [`VectorFormat::Text`] | `"<count> <dim>\n"`, then per line: `word v1 v2 ... vD` |
//!
//! Duplicate words keep their first occurrence.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

/// On-disk layout of a word-vector file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorFormat {
    /// word2vec C binary format.
    #[default]
    Binary,
    /// word2vec text format.
    Text,
}

/// Options for loading a vector table.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Read at most this many words (most frequent first in word2vec dumps).
    pub limit: Option<usize>,
}

impl LoadOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Immutable token -> vector lookup table.
#[derive(Debug, Clone)]
pub struct TokenVectors {
    dim: usize,
    index: HashMap<String, usize>,
    /// Row-major `len() x dim` storage.
    data: Vec<f32>,
}

impl TokenVectors {
    /// Create an empty table of the given width.
    pub fn with_dim(dim: usize) -> Self {
        Self {
            dim,
            index: HashMap::new(),
            data: Vec::new(),
        }
    }

    /// Build a table from `(token, vector)` pairs.
    ///
    /// Every vector must have width `dim`.
    pub fn from_pairs<I, S>(dim: usize, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut table = Self::with_dim(dim);
        for (token, vector) in pairs {
            table.insert(token.into(), &vector)?;
        }
        Ok(table)
    }

    /// Load a table from disk.
    pub fn load(path: impl AsRef<Path>, format: VectorFormat, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let table = Self::read(BufReader::new(file), format, options)?;
        tracing::info!(
            path = %path.display(),
            words = table.len(),
            dim = table.dim(),
            "loaded token vectors"
        );
        Ok(table)
    }

    /// Parse a table from any buffered reader.
    pub fn read<R: BufRead>(reader: R, format: VectorFormat, options: LoadOptions) -> Result<Self> {
        match format {
            VectorFormat::Binary => read_binary(reader, options),
            VectorFormat::Text => read_text(reader, options),
        }
    }

    /// Write the table in word2vec binary format.
    pub fn write_binary<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "{} {}", self.len(), self.dim)?;
        for (word, row) in self.iter() {
            writer.write_all(word.as_bytes())?;
            writer.write_all(b" ")?;
            for x in row {
                writer.write_all(&x.to_le_bytes())?;
            }
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Vector width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    /// Vector for `token`, if present. Lookup is exact (case-sensitive).
    pub fn get(&self, token: &str) -> Option<&[f32]> {
        self.index.get(token).map(|&row| self.row(row))
    }

    /// Iterate over `(token, vector)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        let mut rows: Vec<(&str, usize)> = self.index.iter().map(|(k, &v)| (k.as_str(), v)).collect();
        rows.sort_by_key(|&(_, row)| row);
        rows.into_iter().map(move |(word, row)| (word, self.row(row)))
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.dim..(row + 1) * self.dim]
    }

    /// Returns `false` if the token was already present (first one wins).
    fn insert(&mut self, token: String, vector: &[f32]) -> Result<bool> {
        if vector.len() != self.dim {
            return Err(Error::ShapeMismatch {
                what: "token vector",
                expected: self.dim,
                got: vector.len(),
            });
        }
        if self.index.contains_key(&token) {
            return Ok(false);
        }
        self.index.insert(token, self.index.len());
        self.data.extend_from_slice(vector);
        Ok(true)
    }
}

/// Largest vector size accepted from a file header.
const MAX_VECTOR_SIZE: usize = 1 << 16;

fn parse_header(line: &str) -> Result<(usize, usize)> {
    let mut parts = line.split_whitespace();
    let mut field = |name: &str| -> Result<usize> {
        parts
            .next()
            .ok_or_else(|| Error::Format(format!("header is missing {name}")))?
            .parse::<usize>()
            .map_err(|e| Error::Format(format!("bad {name} in header: {e}")))
    };
    let count = field("word count")?;
    let dim = field("vector size")?;
    if dim == 0 {
        return Err(Error::Format("vector size in header is zero".into()));
    }
    if dim > MAX_VECTOR_SIZE {
        return Err(Error::Format(format!(
            "vector size {dim} in header exceeds {MAX_VECTOR_SIZE}"
        )));
    }
    Ok((count, dim))
}

fn truncated(e: io::Error, what: &str) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Format(format!("file truncated while reading {what}"))
    } else {
        Error::Io(e)
    }
}

/// Read bytes up to the next space, skipping leading newlines.
fn read_word<R: Read>(reader: &mut R, scratch: &mut Vec<u8>) -> Result<String> {
    scratch.clear();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).map_err(|e| truncated(e, "a word"))?;
        match byte[0] {
            b' ' if !scratch.is_empty() => break,
            b'\n' | b'\r' | b' ' => continue,
            b => scratch.push(b),
        }
    }
    Ok(String::from_utf8_lossy(scratch).into_owned())
}

fn read_binary<R: BufRead>(mut reader: R, options: LoadOptions) -> Result<TokenVectors> {
    let mut header = String::new();
    reader.read_line(&mut header)?;
    let (count, dim) = parse_header(&header)?;
    let take = options.limit.map_or(count, |limit| limit.min(count));

    let record_bytes = dim
        .checked_mul(4)
        .ok_or_else(|| Error::Format(format!("vector size {dim} overflows")))?;

    let mut table = TokenVectors::with_dim(dim);
    let mut raw = vec![0u8; record_bytes];
    let mut vector = vec![0f32; dim];
    let mut scratch = Vec::new();

    for _ in 0..take {
        let word = read_word(&mut reader, &mut scratch)?;
        reader
            .read_exact(&mut raw)
            .map_err(|e| truncated(e, "a vector"))?;
        for (dst, chunk) in vector.iter_mut().zip(raw.chunks_exact(4)) {
            *dst = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        if !table.insert(word, &vector)? {
            tracing::debug!("duplicate word in vector file, keeping first");
        }
    }
    Ok(table)
}

fn read_text<R: BufRead>(reader: R, options: LoadOptions) -> Result<TokenVectors> {
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| Error::Format("empty vector file".into()))??;
    let (count, dim) = parse_header(&header)?;
    let take = options.limit.map_or(count, |limit| limit.min(count));

    let mut table = TokenVectors::with_dim(dim);
    let mut vector = Vec::new();
    let mut records = 0usize;
    for (lineno, line) in lines.enumerate() {
        if records >= take {
            break;
        }
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };
        vector.clear();
        for field in fields {
            let x = field
                .parse::<f32>()
                .map_err(|e| Error::Format(format!("line {}: {e}", lineno + 2)))?;
            vector.push(x);
        }
        records += 1;
        if !table.insert(word.to_string(), &vector)? {
            tracing::debug!(word, "duplicate word in vector file, keeping first");
        }
    }
    if records < take {
        return Err(Error::Format(format!("header promised {take} words, found {records}")));
    }
    Ok(table)
}
