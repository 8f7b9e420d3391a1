use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

/// An unembedded chunk as produced by the chunker, before it is bound to a
/// collection. Embedding and persistence happen in the knowledge base store.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChunkDraft {
    pub text: String,
    pub source_id: String,
    pub page: Option<u32>,
    pub start_offset: usize,
    pub metadata: Map<String, Value>,
}

impl ChunkDraft {
    pub fn new(text: String, source_id: String, page: Option<u32>, start_offset: usize) -> Self {
        Self {
            text,
            source_id,
            page,
            start_offset,
            metadata: Map::new(),
        }
    }
}

stored_object!(DocumentChunk, "document_chunk", {
    collection_key: String,
    source_id: String,
    text: String,
    page: Option<u32>,
    start_offset: usize,
    embedding: Vec<f32>,
    metadata: Map<String, Value>
});

impl DocumentChunk {
    pub fn from_draft(draft: ChunkDraft, collection_key: &str, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            collection_key: collection_key.to_string(),
            source_id: draft.source_id,
            text: draft.text,
            page: draft.page,
            start_offset: draft.start_offset,
            embedding,
            metadata: draft.metadata,
        }
    }

    /// Runs a KNN search scoped to one collection, ordered by distance.
    ///
    /// Uses the brute-force KNN operator: the index-backed variant selects
    /// its k candidates before the collection filter applies, which would
    /// under-return for collections sharing the table.
    pub async fn find_by_vector_similarity(
        take: u8,
        query_embedding: &[f32],
        collection_key: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let closest_query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {} WHERE collection_key = '{}' AND embedding <|{},COSINE|> {:?} ORDER BY distance",
            Self::table_name(),
            collection_key,
            take,
            query_embedding
        );

        let closest_chunks: Vec<Self> = db_client.query(closest_query).await?.take(0)?;

        Ok(closest_chunks)
    }
}
