// Copyright 2025 The Brainy Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Text embedding seam.
//!
//! Text queries and text payloads need a vector; the strategy is injected at
//! store construction so embedders with real models can be plugged in without
//! the core depending on one. The default is a deterministic feature-hashing
//! embedder: stable across processes, adequate for exact re-retrieval of
//! previously embedded text.

use std::fmt::Debug;

use sha2::Digest as _;
use sha2::Sha256;

/// Turns text into a dense vector of the store's configured dimension.
pub trait Embedder: Send + Sync + Debug {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature hashing with the signed-bucket trick: each token adds ±1 to the
/// bucket chosen by its digest, and the result is L2-normalized. Identical
/// text always embeds identically.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        assert!(dimensions > 0, "embedding dimension must be positive");
        Self { dimensions }
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap());
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[(bucket % self.dimensions as u64) as usize] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("the quick brown fox"), embedder.embed("the quick brown fox"));
    }

    #[test]
    fn test_case_and_punctuation_insensitive_tokens() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("Hello, World"), embedder.embed("hello world"));
    }

    #[test]
    fn test_normalized() {
        let embedder = HashingEmbedder::new(64);
        let vector = embedder.embed("some text to embed");
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_different_text_differs() {
        let embedder = HashingEmbedder::new(64);
        assert_ne!(embedder.embed("alpha"), embedder.embed("omega"));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert_eq!(embedder.embed(""), vec![0.0; 8]);
    }
}
