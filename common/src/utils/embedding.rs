use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tracing::debug;

use super::config::{AppConfig, EmbeddingBackendKind};

/// Embedding function behind the knowledge base store.
///
/// The `Hashed` backend is a deterministic, offline token-bucket embedding
/// used when no API key is configured and throughout the test suite.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn new_openai(
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        })
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }

    pub fn from_config(
        config: &AppConfig,
        client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackendKind::OpenAI => {
                let client = client
                    .ok_or_else(|| anyhow!("OpenAI embedding backend requires a client"))?;
                Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                )
            }
            EmbeddingBackendKind::Hashed => {
                Self::new_hashed(config.embedding_dimensions as usize)
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::OpenAI { model, .. } => Some(model.clone()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| anyhow!("No embedding data received from OpenAI API"))?
                    .embedding
                    .clone();

                debug!(dimensions = embedding.len(), "Generated embedding");

                Ok(embedding)
            }
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                Ok(response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect())
            }
        }
    }
}

/// L2-normalized bag-of-tokens vector: each lower-cased alphanumeric token
/// hashes into a bucket. Identical text always maps to the identical vector.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    let tokens = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty());

    let mut seen_any = false;
    for token in tokens {
        seen_any = true;
        let mut hasher = DefaultHasher::new();
        token.to_ascii_lowercase().hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % dim;
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += 1.0;
        }
    }

    if !seen_any {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashed_embedding_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(32).expect("failed to build provider");

        let first = provider.embed("the termination clause").await.expect("embed failed");
        let second = provider.embed("the termination clause").await.expect("embed failed");

        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[tokio::test]
    async fn test_hashed_embedding_is_normalized() {
        let provider = EmbeddingProvider::new_hashed(32).expect("failed to build provider");

        let vector = provider.embed("some words here").await.expect("embed failed");
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();

        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashed_embedding_empty_text_is_zero_vector() {
        let provider = EmbeddingProvider::new_hashed(8).expect("failed to build provider");

        let vector = provider.embed("").await.expect("embed failed");

        assert_eq!(vector, vec![0.0; 8]);
    }

    #[tokio::test]
    async fn test_embed_batch_matches_single_embeddings() {
        let provider = EmbeddingProvider::new_hashed(16).expect("failed to build provider");

        let batch = provider
            .embed_batch(vec!["alpha".to_string(), "beta".to_string()])
            .await
            .expect("batch embed failed");
        let single = provider.embed("alpha").await.expect("embed failed");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], single);
    }

    #[test]
    fn test_from_config_defaults_to_hashed() {
        let provider = EmbeddingProvider::from_config(&AppConfig::default(), None)
            .expect("failed to build provider");

        assert_eq!(provider.backend_label(), "hashed");
        assert_eq!(provider.dimension(), 1536);
        assert!(provider.model_code().is_none());
    }
}
