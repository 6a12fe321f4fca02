use crate::chunking::TextChunk;
use crate::embeddings::Embedding;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use qdrant_client::qdrant::{
    vectors::VectorsOptions, Condition, CreateCollectionBuilder, Distance, Filter, PointStruct,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParams, Vectors,
};
use qdrant_client::{Payload, Qdrant};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use uuid::Uuid;

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection_name: String,
}

impl From<&crate::config::AppConfig> for QdrantConfig {
    fn from(config: &crate::config::AppConfig) -> Self {
        QdrantConfig {
            url: config.qdrant_url.clone(),
            api_key: config.qdrant_api_key.clone(),
            collection_name: config.collection_name.clone(),
        }
    }
}

/// A stored chunk returned by similarity search
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    /// Similarity to the query, higher is closer
    pub score: f32,
    /// Stored embedding, when the store returned it
    pub vector: Option<Vec<f32>>,
}

/// Collection statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectionInfo {
    pub collection_name: String,
    /// Number of stored chunks
    pub document_count: u64,
    pub store_url: String,
}

/// Persistent nearest-neighbour index over chunk embeddings
pub trait VectorStore {
    /// Create the collection if it does not exist yet
    fn ensure_collection(&self, dimension: u64) -> impl Future<Output = Result<()>> + Send;

    /// Whether any chunk of the document with this hash is stored
    fn document_exists(&self, document_hash: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Store chunks with their embeddings, returning how many were written
    fn add_chunks(
        &self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Return up to `limit` chunks closest to the query
    fn search(
        &self,
        query: &Embedding,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<ScoredChunk>>> + Send;

    fn collection_info(&self) -> impl Future<Output = Result<CollectionInfo>> + Send;

    /// Drop every stored chunk
    fn delete_collection(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Client for interacting with Qdrant
pub struct QdrantStore {
    client: Qdrant,
    config: QdrantConfig,
}

impl QdrantStore {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key.clone() {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .with_context(|| format!("Failed to connect to Qdrant at {}", config.url))?;

        Ok(QdrantStore { client, config })
    }

    fn collection_name(&self) -> &str {
        &self.config.collection_name
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        self.client
            .collection_exists(self.collection_name())
            .await
            .with_context(|| {
                format!(
                    "Failed to check collection existence: {}",
                    self.collection_name()
                )
            })
    }
}

impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dimension: u64) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }

        let collection_name = self.collection_name();
        info!(
            "Creating collection {} ({} dims, cosine)",
            collection_name, dimension
        );

        let create_collection =
            CreateCollectionBuilder::new(collection_name).vectors_config(VectorParams {
                size: dimension,
                distance: Distance::Cosine.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", collection_name))?;

        Ok(())
    }

    async fn document_exists(&self, document_hash: &str) -> Result<bool> {
        if !self.collection_exists().await? {
            return Ok(false);
        }

        let scroll = ScrollPointsBuilder::new(self.collection_name())
            .filter(Filter::must([Condition::matches(
                "document_hash",
                document_hash.to_string(),
            )]))
            .limit(1)
            .with_payload(false);

        let response = self
            .client
            .scroll(scroll)
            .await
            .with_context(|| format!("Failed to look up document {}", document_hash))?;

        Ok(!response.result.is_empty())
    }

    async fn add_chunks(
        &self,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            bail!(
                "Got {} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            );
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let collection_name = self.collection_name();

        let points = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let id = point_id(&chunk.document_hash, chunk.chunk_index);
                let payload = Payload::try_from(json!({
                    "text": chunk.text,
                    "source": chunk.source,
                    "file_path": chunk.file_path,
                    "chunk_index": chunk.chunk_index,
                    "total_chunks": chunk.total_chunks,
                    "document_hash": chunk.document_hash,
                }))
                .context("Failed to build point payload")?;

                Ok(PointStruct::new(id, embedding.values, payload))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        let count = points.len();
        let upsert_request = UpsertPointsBuilder::new(collection_name, points).wait(true);

        // Upsert points in batch
        self.client
            .upsert_points(upsert_request)
            .await
            .with_context(|| {
                format!("Failed to upsert points in collection {}", collection_name)
            })?;

        debug!("Stored {} points in {}", count, collection_name);
        Ok(count)
    }

    async fn search(&self, query: &Embedding, limit: u64) -> Result<Vec<ScoredChunk>> {
        // Nothing uploaded yet
        if !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let collection_name = self.collection_name();

        let search_request =
            SearchPointsBuilder::new(collection_name, query.values.clone(), limit)
                .with_payload(true)
                .with_vectors(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", collection_name))?;

        let chunks = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let chunk = chunk_from_payload(&scored_point.payload)?;
                Some(ScoredChunk {
                    chunk,
                    score: scored_point.score,
                    vector: scored_point.vectors.and_then(dense_vector),
                })
            })
            .collect();

        Ok(chunks)
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let document_count = if self.collection_exists().await? {
            self.client
                .collection_info(self.collection_name())
                .await
                .with_context(|| {
                    format!("Failed to read collection {}", self.collection_name())
                })?
                .result
                .and_then(|info| info.points_count)
                .unwrap_or(0)
        } else {
            0
        };

        Ok(CollectionInfo {
            collection_name: self.collection_name().to_string(),
            document_count,
            store_url: self.config.url.clone(),
        })
    }

    async fn delete_collection(&self) -> Result<()> {
        if !self.collection_exists().await? {
            return Ok(());
        }

        let collection_name = self.collection_name();
        self.client
            .delete_collection(collection_name)
            .await
            .with_context(|| format!("Failed to delete collection {}", collection_name))?;

        info!("Deleted collection {}", collection_name);
        Ok(())
    }
}

/// Deterministic point id so re-uploading a document overwrites its points
pub fn point_id(document_hash: &str, chunk_index: usize) -> String {
    let key = format!("{}:{}", document_hash, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// The unnamed dense vector of a point, if it has one
fn dense_vector(vectors: Vectors) -> Option<Vec<f32>> {
    match vectors.vectors_options? {
        VectorsOptions::Vector(vector) => Some(vector.data),
        VectorsOptions::Vectors(_) => None,
    }
}

/// Rebuild a chunk from a point payload; points without text are skipped
fn chunk_from_payload(payload: &HashMap<String, Value>) -> Option<TextChunk> {
    let text = payload.get("text")?.as_str()?.to_string();
    let string_field = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .cloned()
            .unwrap_or_default()
    };
    let index_field = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(0)
    };

    let source = payload
        .get("source")
        .and_then(|v| v.as_str())
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());

    Some(TextChunk {
        text,
        source,
        file_path: string_field("file_path"),
        chunk_index: index_field("chunk_index"),
        total_chunks: index_field("total_chunks"),
        document_hash: string_field("document_hash"),
    })
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    fn chunk(hash: &str, index: usize, text: &str) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            source: "math.pdf".to_string(),
            file_path: "math.pdf".to_string(),
            chunk_index: index,
            total_chunks: 2,
            document_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_point_id_is_deterministic() {
        assert_eq!(point_id("abc", 0), point_id("abc", 0));
        assert_ne!(point_id("abc", 0), point_id("abc", 1));
        assert_ne!(point_id("abc", 0), point_id("abd", 0));
        assert!(Uuid::parse_str(&point_id("abc", 3)).is_ok());
    }

    #[test]
    fn test_chunk_from_payload() {
        let payload: Payload = Payload::try_from(json!({
            "text": "Midterm is in week 7",
            "source": "math.pdf",
            "chunk_index": 4,
            "total_chunks": 9,
            "document_hash": "ff00",
        }))
        .unwrap();
        let payload: HashMap<String, Value> = payload.into();

        let chunk = chunk_from_payload(&payload).unwrap();
        assert_eq!(chunk.text, "Midterm is in week 7");
        assert_eq!(chunk.source, "math.pdf");
        assert_eq!(chunk.chunk_index, 4);
        assert_eq!(chunk.total_chunks, 9);
        assert_eq!(chunk.document_hash, "ff00");
        assert_eq!(chunk.file_path, "");
    }

    #[test]
    fn test_chunk_from_payload_negative_index() {
        let payload: HashMap<String, Value> = Payload::try_from(json!({
            "text": "Quiz dates",
            "chunk_index": -3,
            "total_chunks": 2,
        }))
        .unwrap()
        .into();

        let chunk = chunk_from_payload(&payload).unwrap();
        assert_eq!(chunk.chunk_index, 0);
        assert_eq!(chunk.total_chunks, 2);
        assert_eq!(chunk.source, "Unknown");
    }

    #[test]
    fn test_dense_vector() {
        let vectors = Vectors::from(vec![0.5, 0.25]);
        assert_eq!(dense_vector(vectors), Some(vec![0.5, 0.25]));
        assert_eq!(dense_vector(Vectors { vectors_options: None }), None);
    }

    #[test]
    fn test_chunk_from_payload_without_text() {
        let payload: HashMap<String, Value> =
            Payload::try_from(json!({ "source": "x.pdf" })).unwrap().into();
        assert!(chunk_from_payload(&payload).is_none());
    }

    #[tokio::test]
    async fn test_memory_store_upsert_overwrites_same_chunk() {
        let store = MemoryStore::default();
        store.ensure_collection(2).await.unwrap();
        store
            .add_chunks(
                vec![chunk("h1", 0, "a"), chunk("h1", 1, "b")],
                vec![vec![1.0, 0.0].into(), vec![0.0, 1.0].into()],
            )
            .await
            .unwrap();
        store
            .add_chunks(vec![chunk("h1", 0, "a")], vec![vec![1.0, 0.0].into()])
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.document_exists("h1").await.unwrap());
        assert!(!store.document_exists("h2").await.unwrap());

        let hits = store.search(&vec![0.1, 1.0].into(), 1).await.unwrap();
        assert_eq!(hits[0].chunk.text, "b");
        assert_eq!(hits[0].vector, Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_mismatched_lengths() {
        let store = MemoryStore::default();
        let result = store.add_chunks(vec![chunk("h", 0, "a")], vec![]).await;
        assert!(result.is_err());
    }
}
