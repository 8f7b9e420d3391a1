use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{kb_store::KnowledgeBaseStore, types::document_chunk::ChunkDraft},
    utils::{config::AppConfig, upload::validate_upload},
};

use crate::{chunker::DocumentChunker, extract};

/// One uploaded file: name plus raw payload, as handed over by the ingress.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIngestReport {
    pub file_name: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIngestFailure {
    pub file_name: String,
    pub reason: String,
}

/// Per-file outcome of one upload batch. A failed file is reported and
/// skipped; it never aborts the rest of the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchIngestReport {
    pub knowledge_base: String,
    pub created: bool,
    pub ingested: Vec<FileIngestReport>,
    pub failed: Vec<FileIngestFailure>,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub total_chars: usize,
    pub average_chunk_size: usize,
    pub chunk_size_config: usize,
    pub chunk_overlap_config: usize,
}

/// Upload-to-knowledge-base pipeline: validate, extract, chunk, then commit
/// the surviving chunks with a single create-or-append store call.
pub struct IngestionPipeline {
    store: Arc<KnowledgeBaseStore>,
    chunker: DocumentChunker,
    config: AppConfig,
}

impl IngestionPipeline {
    pub fn new(store: Arc<KnowledgeBaseStore>, config: AppConfig) -> Result<Self, AppError> {
        let chunker = DocumentChunker::new(config.chunk_size, config.chunk_overlap)?;

        Ok(Self {
            store,
            chunker,
            config,
        })
    }

    /// Processes every upload in the batch and commits the surviving chunks
    /// to the named knowledge base, creating it when absent.
    pub async fn ingest_batch(
        &self,
        kb_name: &str,
        uploads: &[FileUpload],
    ) -> Result<BatchIngestReport, AppError> {
        let mut report = BatchIngestReport {
            knowledge_base: kb_name.trim().to_string(),
            ..Default::default()
        };
        let mut drafts: Vec<ChunkDraft> = Vec::new();

        for upload in uploads {
            match self.process_upload(upload).await {
                Ok(file_drafts) => {
                    report.ingested.push(FileIngestReport {
                        file_name: upload.file_name.clone(),
                        chunk_count: file_drafts.len(),
                    });
                    drafts.extend(file_drafts);
                }
                Err(err) => {
                    warn!(
                        file = %upload.file_name,
                        error = %err,
                        "Skipping file in ingestion batch"
                    );
                    report.failed.push(FileIngestFailure {
                        file_name: upload.file_name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if drafts.is_empty() {
            info!(knowledge_base = %kb_name, "No chunks survived the ingestion batch");
            return Ok(report);
        }

        report.total_chunks = drafts.len();

        if self.store.exists(kb_name).await.map_err(AppError::from)? {
            self.store.append(kb_name, &drafts).await?;
        } else {
            self.store.create(kb_name, &drafts).await?;
            report.created = true;
        }

        info!(
            knowledge_base = %kb_name,
            files_ok = report.ingested.len(),
            files_failed = report.failed.len(),
            chunks = report.total_chunks,
            created = report.created,
            "Ingestion batch committed"
        );

        Ok(report)
    }

    async fn process_upload(&self, upload: &FileUpload) -> Result<Vec<ChunkDraft>, AppError> {
        validate_upload(&self.config, &upload.file_name, upload.bytes.len())?;

        let pages = extract::extract_pages_from_mem(upload.bytes.clone()).await?;
        let mut drafts = self.chunker.chunk(&upload.file_name, &pages)?;

        let processed_at = Utc::now().to_rfc3339();
        for draft in &mut drafts {
            draft
                .metadata
                .insert("original_filename".to_string(), upload.file_name.clone().into());
            draft
                .metadata
                .insert("file_size_bytes".to_string(), (upload.bytes.len() as u64).into());
            draft
                .metadata
                .insert("processed_at".to_string(), processed_at.clone().into());
        }

        Ok(drafts)
    }

    pub fn chunk_stats(&self, drafts: &[ChunkDraft]) -> ChunkStats {
        let total_chars: usize = drafts.iter().map(|draft| draft.text.chars().count()).sum();

        ChunkStats {
            total_chunks: drafts.len(),
            total_chars,
            average_chunk_size: if drafts.is_empty() {
                0
            } else {
                total_chars / drafts.len()
            },
            chunk_size_config: self.chunker.chunk_size(),
            chunk_overlap_config: self.chunker.chunk_overlap(),
        }
    }
}
