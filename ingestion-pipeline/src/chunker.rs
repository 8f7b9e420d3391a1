use text_splitter::{Characters, ChunkConfig, TextSplitter};
use tracing::debug;

use common::{error::AppError, storage::types::document_chunk::ChunkDraft};

use crate::extract::PageText;

/// Splits extracted page text into overlapping windows sized in characters,
/// keeping page number and character start offset with every chunk.
pub struct DocumentChunker {
    splitter: TextSplitter<Characters>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentChunker {
    /// Fails when `chunk_overlap` is not strictly smaller than `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, AppError> {
        if chunk_overlap >= chunk_size {
            return Err(AppError::Validation(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }

        let config = ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap)
            .map_err(|err| {
                AppError::Validation(format!(
                    "Invalid chunking configuration (size {chunk_size}, overlap {chunk_overlap}): {err}"
                ))
            })?;

        Ok(Self {
            splitter: TextSplitter::new(config),
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits the pages of one source document into drafts, in page order.
    /// The same input always produces the same drafts in the same order.
    pub fn chunk(&self, source_id: &str, pages: &[PageText]) -> Result<Vec<ChunkDraft>, AppError> {
        let mut drafts = Vec::new();

        for page in pages {
            for (byte_offset, chunk_text) in self.splitter.chunk_indices(&page.text) {
                let start_offset = page
                    .text
                    .get(..byte_offset)
                    .map(|prefix| prefix.chars().count())
                    .unwrap_or(0);

                drafts.push(ChunkDraft::new(
                    chunk_text.to_string(),
                    source_id.to_string(),
                    Some(page.page_number),
                    start_offset,
                ));
            }
        }

        if drafts.is_empty() {
            return Err(AppError::Validation(format!(
                "No extractable text across {} pages of '{source_id}'",
                pages.len()
            )));
        }

        debug!(
            source_id,
            pages = pages.len(),
            chunks = drafts.len(),
            "Chunked document"
        );

        Ok(drafts)
    }
}
