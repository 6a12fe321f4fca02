use anyhow::{anyhow, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::{debug, info};
use serde::{Deserialize, Serialize};

const EMBEDDING_BATCH_SIZE: usize = 32;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding { values }
    }
}

/// Turns text into vectors; documents and queries must share one model
pub trait Embedder {
    /// Generate embeddings for a batch of document chunks
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Generate the embedding for a single question
    fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed_documents(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding generated"))
    }

    /// Length of every vector this embedder produces
    fn dimension(&self) -> u64;
}

/// Resolve a configured model name to a fastembed model and its dimension
pub fn resolve_model(name: &str) -> Result<(EmbeddingModel, u64)> {
    let short_name = name
        .trim()
        .trim_start_matches("sentence-transformers/")
        .trim_start_matches("BAAI/")
        .trim_start_matches("nomic-ai/");

    let resolved = match short_name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "all-minilm-l12-v2" => (EmbeddingModel::AllMiniLML12V2, 384),
        "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        "nomic-embed-text-v1.5" => (EmbeddingModel::NomicEmbedTextV15, 768),
        _ => {
            return Err(anyhow!(
                "Unknown embedding model: {}. Supported: all-MiniLM-L6-v2, all-MiniLM-L12-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
                name
            ))
        }
    };

    Ok(resolved)
}

/// Local embedding model running on the CPU via fastembed
pub struct LocalEmbedder {
    model: TextEmbedding,
    model_name: String,
    dimension: u64,
}

impl LocalEmbedder {
    /// Load the named model, downloading it on first use
    pub fn new(model_name: &str) -> Result<Self> {
        let (model_type, dimension) = resolve_model(model_name)?;
        info!("Loading embedding model: {} ({} dims)", model_name, dimension);

        let model =
            TextEmbedding::try_new(InitOptions::new(model_type).with_show_download_progress(true))
                .map_err(|e| anyhow!("Failed to load embedding model {}: {}", model_name, e))?;

        Ok(LocalEmbedder {
            model,
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl Embedder for LocalEmbedder {
    fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with {}", texts.len(), self.model_name);
        let vectors = self
            .model
            .embed(texts.to_vec(), Some(EMBEDDING_BATCH_SIZE))
            .map_err(|e| anyhow!("Embedding generation failed: {}", e))?;

        Ok(vectors.into_iter().map(Embedding::from).collect())
    }

    fn dimension(&self) -> u64 {
        self.dimension
    }
}
