//! Deterministic, dependency-free embedding backend.
//!
//! Layout of the 256-wide vector (see `primitives`):
//! character frequencies for a-z and 0-9, hashed word buckets weighted by
//! position, four length statistics, hashed character bigrams. The result
//! is L2-normalized; text with no content yields the zero vector.

use super::EmbeddingProvider;
use crate::LoomError;
use crate::primitives::{
    BIGRAM_BUCKETS, CHAR_BUCKETS, SIMPLE_EMBEDDING_DIMENSIONS, STAT_BUCKETS, WORD_BUCKETS,
};
use std::collections::BTreeSet;

pub const SIMPLE_PROVIDER_NAME: &str = "simple";
pub const SIMPLE_MODEL: &str = "simple-v1";

const WORD_OFFSET: usize = CHAR_BUCKETS;
const STAT_OFFSET: usize = WORD_OFFSET + WORD_BUCKETS;
const BIGRAM_OFFSET: usize = STAT_OFFSET + STAT_BUCKETS;

/// Always-available local embedding backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEmbeddingProvider;

impl SimpleEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Embed `text` without model checks.
    #[must_use]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; SIMPLE_EMBEDDING_DIMENSIONS];
        let text = text.trim().to_lowercase();
        if text.is_empty() {
            return vector;
        }

        for c in text.chars() {
            if c.is_ascii_lowercase() {
                vector[(c as u8 - b'a') as usize] += 1.0;
            } else if let Some(d) = c.to_digit(10) {
                vector[26 + d as usize] += 1.0;
            }
        }

        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        for (position, word) in words.iter().enumerate() {
            let bucket = bucket_for(word.as_bytes(), WORD_BUCKETS);
            vector[WORD_OFFSET + bucket] += 1.0 / (1.0 + position as f32 * 0.1);

            let chars: Vec<char> = word.chars().collect();
            for pair in chars.windows(2) {
                let mut buf = [0u8; 8];
                let first = pair[0].encode_utf8(&mut buf[..4]).len();
                let second = pair[1].encode_utf8(&mut buf[first..]).len();
                let bucket = bucket_for(&buf[..first + second], BIGRAM_BUCKETS);
                vector[BIGRAM_OFFSET + bucket] += 1.0;
            }
        }

        let char_count = text.chars().count() as f32;
        let word_count = words.len() as f32;
        let unique: BTreeSet<&str> = words.iter().copied().collect();
        vector[STAT_OFFSET] = char_count.ln_1p();
        vector[STAT_OFFSET + 1] = word_count.ln_1p();
        if !words.is_empty() {
            let letters: usize = words.iter().map(|w| w.chars().count()).sum();
            vector[STAT_OFFSET + 2] = letters as f32 / word_count / 10.0;
            vector[STAT_OFFSET + 3] = unique.len() as f32 / word_count;
        }

        normalize(&mut vector);
        vector
    }
}

impl EmbeddingProvider for SimpleEmbeddingProvider {
    fn name(&self) -> &str {
        SIMPLE_PROVIDER_NAME
    }

    fn generate_embedding(&self, text: &str, model: &str) -> Result<Vec<f32>, LoomError> {
        if model != SIMPLE_MODEL {
            return Err(LoomError::UnsupportedModel {
                provider: SIMPLE_PROVIDER_NAME.to_string(),
                model: model.to_string(),
            });
        }
        Ok(self.embed(text))
    }

    fn is_available(&self) -> Result<bool, LoomError> {
        Ok(true)
    }

    fn default_model(&self) -> &str {
        SIMPLE_MODEL
    }

    fn supported_models(&self) -> Vec<String> {
        vec![SIMPLE_MODEL.to_string()]
    }
}

/// 64-bit FNV-1a, reduced to a bucket index.
fn bucket_for(bytes: &[u8], buckets: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % buckets as u64) as usize
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    #[test]
    fn identical_text_is_bit_identical() {
        let provider = SimpleEmbeddingProvider::new();
        let a = provider.embed("Login form component");
        let b = provider.embed("Login form component");
        assert_eq!(a.len(), SIMPLE_EMBEDDING_DIMENSIONS);
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn output_is_unit_length() {
        let v = SimpleEmbeddingProvider::new().embed("user authentication service");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn blank_text_is_zero_vector() {
        let provider = SimpleEmbeddingProvider::new();
        for text in ["", "   \t\n"] {
            let v = provider.embed(text);
            assert_eq!(v.len(), SIMPLE_EMBEDDING_DIMENSIONS);
            assert!(v.iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn lexical_overlap_scores_higher() {
        let provider = SimpleEmbeddingProvider::new();
        let base = provider.embed("login form component");
        let overlapping = provider.embed("login form button");
        let disjoint = provider.embed("quarterly tax export");

        let close = cosine_similarity(&base, &overlapping);
        let far = cosine_similarity(&base, &disjoint);
        assert!(close > far, "close={close} far={far}");
    }

    #[test]
    fn rejects_unknown_model() {
        let result = SimpleEmbeddingProvider::new().generate_embedding("x", "nomic-embed-text");
        assert!(matches!(
            result,
            Err(LoomError::UnsupportedModel { ref model, .. }) if model == "nomic-embed-text"
        ));
    }

    #[test]
    fn handles_non_ascii_text() {
        let v = SimpleEmbeddingProvider::new().embed("Größe café 東京");
        assert!(v.iter().any(|x| *x != 0.0));
    }
}
