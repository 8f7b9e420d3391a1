use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use thiserror::Error;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document_chunk::{ChunkDraft, DocumentChunk},
            knowledge_base::{display_name_from_key, sanitize_collection_key, KnowledgeBase},
            StoredObject,
        },
    },
    utils::embedding::EmbeddingProvider,
};

#[derive(Error, Debug)]
pub enum KnowledgeBaseError {
    #[error("Knowledge base name cannot be empty")]
    InvalidName,

    #[error("Knowledge base '{0}' already exists")]
    AlreadyExists(String),

    #[error("Cannot create a knowledge base with no documents")]
    NoDocuments,

    #[error("Knowledge base '{0}' does not exist")]
    NotFound(String),

    #[error("SurrealDB error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStats {
    pub name: String,
    pub collection_key: String,
    pub chunk_count: usize,
    pub persist_path: String,
}

/// Named, persistent collections of embedded chunks.
///
/// Each collection is a `knowledge_base` metadata record (keyed by the
/// sanitized collection key, carrying the display name and chunk count) plus
/// its `document_chunk` rows. The count is written in the same transaction
/// as every chunk mutation, so a collection with `chunk_count == 0` never
/// coexists with live chunks and "empty" and "absent" stay the same thing.
pub struct KnowledgeBaseStore {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    persist_path: String,
}

impl KnowledgeBaseStore {
    pub async fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        persist_path: impl Into<String>,
    ) -> Result<Self, KnowledgeBaseError> {
        db.ensure_initialized().await?;

        Ok(Self {
            db,
            embedder,
            persist_path: persist_path.into(),
        })
    }

    /// Creates a new knowledge base from the given drafts, embedding and
    /// persisting them in a single transaction.
    ///
    /// The `CREATE` of the metadata record is the serialization point for
    /// concurrent creates on the same key: the loser's transaction fails on
    /// the duplicate record instead of silently merging.
    pub async fn create(
        &self,
        name: &str,
        drafts: &[ChunkDraft],
    ) -> Result<KnowledgeBaseHandle, KnowledgeBaseError> {
        if name.trim().is_empty() {
            return Err(KnowledgeBaseError::InvalidName);
        }

        let key = sanitize_collection_key(name);

        if self.exists(name).await? {
            return Err(KnowledgeBaseError::AlreadyExists(name.trim().to_string()));
        }

        if drafts.is_empty() {
            return Err(KnowledgeBaseError::NoDocuments);
        }

        info!(
            knowledge_base = %name,
            collection_key = %key,
            chunks = drafts.len(),
            "Creating knowledge base"
        );

        let chunks = self.embed_drafts(&key, drafts).await?;
        let record = KnowledgeBase::new(name, chunks.len());

        const CREATE_MUTATION: &str = r#"
            BEGIN TRANSACTION;
            FOR $chunk IN $chunks {
                CREATE type::thing('document_chunk', $chunk.id) CONTENT $chunk;
            };
            CREATE type::thing('knowledge_base', $record.id) CONTENT $record;
            COMMIT TRANSACTION;
        "#;

        self.db
            .client
            .query(CREATE_MUTATION)
            .bind(("chunks", chunks))
            .bind(("record", record))
            .await?
            .check()?;

        Ok(self.handle(key, name.trim().to_string()))
    }

    /// Opens an existing knowledge base without touching its stored data.
    /// Returns `None` when the collection is absent.
    pub async fn open(&self, name: &str) -> Result<Option<KnowledgeBaseHandle>, KnowledgeBaseError> {
        let key = sanitize_collection_key(name);

        match self.db.get_item::<KnowledgeBase>(&key).await? {
            Some(record) if record.chunk_count > 0 => {
                Ok(Some(self.handle(key, record.name)))
            }
            _ => {
                warn!(knowledge_base = %name, "Knowledge base does not exist");
                Ok(None)
            }
        }
    }

    /// Appends chunks to an existing knowledge base. Fails with `NotFound`
    /// when the collection is absent.
    pub async fn append(
        &self,
        name: &str,
        drafts: &[ChunkDraft],
    ) -> Result<usize, KnowledgeBaseError> {
        let key = sanitize_collection_key(name);

        if !self.exists(name).await? {
            warn!(knowledge_base = %name, "Cannot append to non-existent knowledge base");
            return Err(KnowledgeBaseError::NotFound(name.trim().to_string()));
        }

        if drafts.is_empty() {
            return Ok(0);
        }

        let chunks = self.embed_drafts(&key, drafts).await?;
        let added = chunks.len();

        const APPEND_MUTATION: &str = r#"
            BEGIN TRANSACTION;
            FOR $chunk IN $chunks {
                CREATE type::thing('document_chunk', $chunk.id) CONTENT $chunk;
            };
            UPDATE type::thing('knowledge_base', $key) SET chunk_count += $added, updated_at = time::now();
            COMMIT TRANSACTION;
        "#;

        self.db
            .client
            .query(APPEND_MUTATION)
            .bind(("chunks", chunks))
            .bind(("key", key.clone()))
            .bind(("added", added))
            .await?
            .check()?;

        info!(
            knowledge_base = %name,
            collection_key = %key,
            added,
            "Appended chunks to knowledge base"
        );

        Ok(added)
    }

    /// A collection with a zero chunk count is treated as absent. Stale
    /// zero-count records are removed on the spot so probing never leaves
    /// artifacts behind.
    pub async fn exists(&self, name: &str) -> Result<bool, KnowledgeBaseError> {
        let key = sanitize_collection_key(name);

        match self.db.get_item::<KnowledgeBase>(&key).await? {
            Some(record) if record.chunk_count > 0 => Ok(true),
            Some(_) => {
                self.db.delete_item::<KnowledgeBase>(&key).await?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Lists non-empty knowledge bases, sorted by display name.
    pub async fn list(&self) -> Result<Vec<KnowledgeBase>, KnowledgeBaseError> {
        let mut records: Vec<KnowledgeBase> = self
            .db
            .client
            .query("SELECT * FROM type::table($table) WHERE chunk_count > 0 ORDER BY name ASC")
            .bind(("table", KnowledgeBase::table_name()))
            .await?
            .take(0)?;

        // Records written without a display name fall back to their key
        for record in &mut records {
            if record.name.is_empty() {
                record.name = display_name_from_key(&record.id);
            }
        }

        Ok(records)
    }

    /// Removes a knowledge base and its chunks. Returns `false` (not an
    /// error) when the collection did not exist, so deletes are idempotent.
    pub async fn delete(&self, name: &str) -> Result<bool, KnowledgeBaseError> {
        let key = sanitize_collection_key(name);

        if !self.exists(name).await? {
            warn!(knowledge_base = %name, "Cannot delete knowledge base - it doesn't exist");
            return Ok(false);
        }

        const DELETE_MUTATION: &str = r#"
            BEGIN TRANSACTION;
            DELETE document_chunk WHERE collection_key = $key;
            DELETE type::thing('knowledge_base', $key);
            COMMIT TRANSACTION;
        "#;

        self.db
            .client
            .query(DELETE_MUTATION)
            .bind(("key", key.clone()))
            .await?
            .check()?;

        info!(knowledge_base = %name, collection_key = %key, "Deleted knowledge base");

        Ok(true)
    }

    pub async fn stats(
        &self,
        name: &str,
    ) -> Result<Option<KnowledgeBaseStats>, KnowledgeBaseError> {
        let key = sanitize_collection_key(name);

        match self.db.get_item::<KnowledgeBase>(&key).await? {
            Some(record) if record.chunk_count > 0 => Ok(Some(KnowledgeBaseStats {
                name: record.name,
                collection_key: key,
                chunk_count: record.chunk_count,
                persist_path: self.persist_path.clone(),
            })),
            _ => Ok(None),
        }
    }

    async fn embed_drafts(
        &self,
        key: &str,
        drafts: &[ChunkDraft],
    ) -> Result<Vec<DocumentChunk>, KnowledgeBaseError> {
        let texts: Vec<String> = drafts.iter().map(|draft| draft.text.clone()).collect();

        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let embeddings =
            Retry::spawn(retry_strategy, || self.embedder.embed_batch(texts.clone())).await?;

        if embeddings.len() != drafts.len() {
            return Err(KnowledgeBaseError::Embedding(anyhow!(
                "embedding backend returned {} vectors for {} chunks",
                embeddings.len(),
                drafts.len()
            )));
        }

        Ok(drafts
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(draft, embedding)| DocumentChunk::from_draft(draft, key, embedding))
            .collect())
    }

    fn handle(&self, collection_key: String, name: String) -> KnowledgeBaseHandle {
        KnowledgeBaseHandle {
            name,
            collection_key,
            db: Arc::clone(&self.db),
            embedder: Arc::clone(&self.embedder),
        }
    }
}

/// Retrieval handle bound to one collection. Cheap to clone; the engine
/// holds one for its lifetime and swaps it on rebind.
#[derive(Clone)]
pub struct KnowledgeBaseHandle {
    name: String,
    collection_key: String,
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
}

impl KnowledgeBaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_key(&self) -> &str {
        &self.collection_key
    }

    /// Embeds the question and returns the `take` nearest chunks of this
    /// collection, best match first.
    pub async fn query(&self, question: &str, take: u8) -> Result<Vec<DocumentChunk>, AppError> {
        let embedding = self.embedder.embed(question).await?;

        DocumentChunk::find_by_vector_similarity(
            take,
            &embedding,
            &self.collection_key,
            &self.db,
        )
        .await
    }

    pub async fn count(&self) -> Result<usize, AppError> {
        match self
            .db
            .get_item::<KnowledgeBase>(&self.collection_key)
            .await?
        {
            Some(record) => Ok(record.chunk_count),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn store() -> KnowledgeBaseStore {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory(namespace, database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let embedder = Arc::new(
            EmbeddingProvider::new_hashed(16).expect("Failed to build hashed embedder"),
        );

        KnowledgeBaseStore::new(db, embedder, "/tmp/kb-test")
            .await
            .expect("Failed to build store")
    }

    fn drafts(texts: &[&str]) -> Vec<ChunkDraft> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                ChunkDraft::new(
                    (*text).to_string(),
                    "doc.pdf".to_string(),
                    Some(1),
                    i * 10,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_exists_list_round_trip() {
        let store = store().await;
        let chunks = drafts(&["alpha text", "beta text", "gamma text"]);

        let handle = store
            .create("KB1", &chunks)
            .await
            .expect("Failed to create knowledge base");
        assert_eq!(handle.collection_key(), "kb1");

        assert!(store.exists("KB1").await.expect("exists failed"));

        let listed = store.list().await.expect("list failed");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "KB1");
        assert_eq!(listed[0].chunk_count, chunks.len());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let store = store().await;

        assert!(matches!(
            store.create("   ", &drafts(&["a"])).await,
            Err(KnowledgeBaseError::InvalidName)
        ));
        assert!(matches!(
            store.create("KB1", &[]).await,
            Err(KnowledgeBaseError::NoDocuments)
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_key() {
        let store = store().await;
        store
            .create("Test KB", &drafts(&["some text"]))
            .await
            .expect("Failed to create knowledge base");

        // "test kb" sanitizes to the same key as "Test KB"
        let result = store.create("test kb", &drafts(&["other text"])).await;
        assert!(matches!(result, Err(KnowledgeBaseError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = store().await;
        let chunks = drafts(&["one", "two"]);
        store
            .create("KB1", &chunks)
            .await
            .expect("Failed to create knowledge base");

        let first = store
            .open("KB1")
            .await
            .expect("open failed")
            .expect("handle missing");
        let second = store
            .open("KB1")
            .await
            .expect("open failed")
            .expect("handle missing");

        assert_eq!(first.count().await.expect("count failed"), chunks.len());
        assert_eq!(second.count().await.expect("count failed"), chunks.len());
    }

    #[tokio::test]
    async fn test_open_missing_returns_none() {
        let store = store().await;
        assert!(store.open("nope").await.expect("open failed").is_none());
    }

    #[tokio::test]
    async fn test_append_updates_count_transactionally() {
        let store = store().await;
        store
            .create("KB1", &drafts(&["first"]))
            .await
            .expect("Failed to create knowledge base");

        let added = store
            .append("KB1", &drafts(&["second", "third"]))
            .await
            .expect("append failed");
        assert_eq!(added, 2);

        let stats = store
            .stats("KB1")
            .await
            .expect("stats failed")
            .expect("stats missing");
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.collection_key, "kb1");
        assert_eq!(stats.persist_path, "/tmp/kb-test");
    }

    #[tokio::test]
    async fn test_append_to_missing_fails() {
        let store = store().await;
        let result = store.append("missing", &drafts(&["text"])).await;
        assert!(matches!(result, Err(KnowledgeBaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store().await;
        store
            .create("KB1", &drafts(&["text"]))
            .await
            .expect("Failed to create knowledge base");

        assert!(store.delete("KB1").await.expect("delete failed"));
        assert!(!store.exists("KB1").await.expect("exists failed"));
        assert!(!store.delete("KB1").await.expect("second delete failed"));
    }

    #[tokio::test]
    async fn test_delete_removes_chunks() {
        let store = store().await;
        store
            .create("KB1", &drafts(&["text one", "text two"]))
            .await
            .expect("Failed to create knowledge base");
        let handle = store
            .open("KB1")
            .await
            .expect("open failed")
            .expect("handle missing");

        store.delete("KB1").await.expect("delete failed");

        let results = handle.query("text", 4).await.expect("query failed");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_exists_cleans_up_stale_zero_count_record() {
        let store = store().await;
        let stale = KnowledgeBase::new("Ghost", 0);
        store
            .db
            .store_item(stale)
            .await
            .expect("Failed to store stale record");

        assert!(!store.exists("Ghost").await.expect("exists failed"));
        // The zero-count marker is gone after the probe
        let record = store
            .db
            .get_item::<KnowledgeBase>("ghost")
            .await
            .expect("get failed");
        assert!(record.is_none());
        // Name is free for a real create again
        store
            .create("Ghost", &drafts(&["real content"]))
            .await
            .expect("create after cleanup failed");
    }

    #[tokio::test]
    async fn test_list_sorted_and_excludes_empty() {
        let store = store().await;
        store
            .create("Zebra Docs", &drafts(&["z"]))
            .await
            .expect("create failed");
        store
            .create("Alpha Docs", &drafts(&["a"]))
            .await
            .expect("create failed");
        store
            .db
            .store_item(KnowledgeBase::new("Empty", 0))
            .await
            .expect("store failed");

        let listed = store.list().await.expect("list failed");
        let names: Vec<&str> = listed.iter().map(|kb| kb.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha Docs", "Zebra Docs"]);
    }

    #[tokio::test]
    async fn test_list_falls_back_to_key_derived_name() {
        let store = store().await;
        let mut legacy = KnowledgeBase::new("legacy docs", 2);
        legacy.name = String::new();
        store
            .db
            .store_item(legacy)
            .await
            .expect("Failed to store record");

        let listed = store.list().await.expect("list failed");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Legacy Docs");
    }

    #[tokio::test]
    async fn test_query_returns_at_most_k() {
        let store = store().await;
        let texts: Vec<String> = (0..6).map(|i| format!("chunk number {i} text")).collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        store
            .create("KB1", &drafts(&text_refs))
            .await
            .expect("create failed");

        let handle = store
            .open("KB1")
            .await
            .expect("open failed")
            .expect("handle missing");
        let results = handle
            .query("chunk number text", 4)
            .await
            .expect("query failed");

        assert!(results.len() <= 4);
        assert!(!results.is_empty());
    }
}
