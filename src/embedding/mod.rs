/// Text embedding
///
/// - EmbeddingProvider trait for abstraction over embedding backends
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - embed_in_batches for bounded-size calls during ingestion
mod provider;

pub use provider::{EmbeddingProvider, FastEmbedProvider};

use crate::error::{Result, SourcegateError};

/// Embed `texts` in slices of at most `batch_size`, preserving order
pub fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let embedded = provider.embed_batch(batch)?;
        if embedded.len() != batch.len() {
            return Err(SourcegateError::Embedding(format!(
                "Provider returned {} embeddings for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
    }

    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthEmbedder {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for LengthEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    struct ShortEmbedder;

    impl EmbeddingProvider for ShortEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }

        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]])
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "short"
        }
    }

    #[test]
    fn test_batches_preserve_order() {
        let provider = LengthEmbedder {
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = embed_in_batches(&provider, &texts, 2).unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_zero_batch_size_treated_as_one() {
        let provider = LengthEmbedder {
            calls: AtomicUsize::new(0),
        };
        let texts = vec!["a".to_string(), "b".to_string()];
        embed_in_batches(&provider, &texts, 0).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_short_response_is_an_error() {
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            embed_in_batches(&ShortEmbedder, &texts, 8),
            Err(SourcegateError::Embedding(_))
        ));
    }
}
