//! Text-to-vector encoding.
//!
//! A label such as `"Federal Reserve"` becomes the mean of the pretrained
//! vectors of its words:
//!
//! ```text
//! "Federal Reserve!" -> ["federal", "reserve"] -> mean(v_federal, v_reserve)
//! ```
//!
//! Only purely alphabetic tokens are kept, lowercased. Tokens missing from the
//! table are dropped. When nothing survives the label has no vector and
//! [`Encoder::encode`] returns `None`; deciding what to do with such a label is
//! the caller's business.

use crate::error::Result;
use crate::vectors::TokenVectors;
use candle_core::{Device, Tensor};
use std::sync::Arc;

/// Averages pretrained token vectors over the words of a label.
#[derive(Debug, Clone)]
pub struct Encoder {
    vectors: Arc<TokenVectors>,
}

impl Encoder {
    pub fn new(vectors: Arc<TokenVectors>) -> Self {
        Self { vectors }
    }

    /// Output width.
    pub fn dim(&self) -> usize {
        self.vectors.dim()
    }

    /// The shared table.
    pub fn vectors(&self) -> &Arc<TokenVectors> {
        &self.vectors
    }

    /// Split `text` into lowercased alphabetic tokens.
    ///
    /// Apostrophes and hyphens stay inside a word. A clitic (`"Apple's"`,
    /// `"don't"`) is cut off and only the stem is kept. Any other word
    /// containing a non-alphabetic character (`"2019"`, `"b52"`,
    /// `"co-founder"`) is discarded.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !(c.is_alphanumeric() || is_joiner(c)))
            .map(|run| run.trim_matches(is_joiner))
            .map(strip_clitic)
            .filter(|tok| !tok.is_empty() && tok.chars().all(char::is_alphabetic))
            .map(str::to_lowercase)
            .collect()
    }

    /// Mean vector of the known tokens of `text`, or `None` if there are none.
    pub fn encode(&self, text: &str) -> Option<Vec<f32>> {
        let mut sum = vec![0f32; self.dim()];
        let mut found = 0usize;

        for token in Self::tokenize(text) {
            if let Some(v) = self.vectors.get(&token) {
                for (acc, x) in sum.iter_mut().zip(v) {
                    *acc += x;
                }
                found += 1;
            }
        }

        if found == 0 {
            tracing::trace!(text, "no known tokens, label has no vector");
            return None;
        }

        let n = found as f32;
        sum.iter_mut().for_each(|x| *x /= n);
        Some(sum)
    }

    /// [`encode`](Self::encode) as a `(1, dim)` row tensor on `device`.
    pub fn encode_tensor(&self, text: &str, device: &Device) -> Result<Option<Tensor>> {
        match self.encode(text) {
            Some(v) => Ok(Some(Tensor::from_vec(v, (1, self.dim()), device)?)),
            None => Ok(None),
        }
    }
}

fn is_joiner(c: char) -> bool {
    matches!(c, '\'' | '’' | '-')
}

/// `"Apple's"` -> `"Apple"`, `"don't"` -> `"do"`.
fn strip_clitic(word: &str) -> &str {
    let Some(pos) = word.find(['\'', '’']) else {
        return word;
    };
    let stem = &word[..pos];
    let rest = &word[pos..];
    if rest.chars().count() == 2 && rest.ends_with(['t', 'T']) && stem.ends_with(['n', 'N']) {
        &stem[..stem.len() - 1]
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> Encoder {
        let table = TokenVectors::from_pairs(
            2,
            vec![
                ("apple", vec![1.0, 2.0]),
                ("stock", vec![3.0, 0.0]),
                ("Fed", vec![9.0, 9.0]),
            ],
        )
        .unwrap();
        Encoder::new(Arc::new(table))
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            Encoder::tokenize("Apple's stock, 2019 B52 up!"),
            vec!["apple", "stock", "up"]
        );
        assert_eq!(Encoder::tokenize("co-founder of Apple"), vec!["of", "apple"]);
        assert_eq!(Encoder::tokenize("they don't 'sell'"), vec!["they", "do", "sell"]);
        assert!(Encoder::tokenize("  ... 42 ").is_empty());
    }

    #[test]
    fn test_single_token_is_unchanged() {
        assert_eq!(encoder().encode("APPLE").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_mean_of_tokens() {
        let v = encoder().encode("apple unknown stock").unwrap();
        assert_eq!(v, vec![2.0, 1.0]);
    }

    #[test]
    fn test_absence() {
        let enc = encoder();
        assert!(enc.encode("").is_none());
        assert!(enc.encode("unknown words only").is_none());
        assert!(enc.encode("1234 !!").is_none());
        // tokens are lowercased before lookup, so a capitalized key never matches
        assert!(enc.encode("Fed").is_none());
    }

    #[test]
    fn test_encode_tensor_shape() {
        let t = encoder()
            .encode_tensor("stock", &Device::Cpu)
            .unwrap()
            .unwrap();
        assert_eq!(t.dims(), &[1, 2]);
        assert!(encoder().encode_tensor("zzz", &Device::Cpu).unwrap().is_none());
    }
}
