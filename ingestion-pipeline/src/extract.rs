use std::path::Path;

use lopdf::Document;
use tracing::debug;

use common::{error::AppError, utils::upload::is_pdf};

/// One page of extracted text. Page numbers are 1-based, as reported by the
/// document itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    pub page_number: u32,
}

/// Extracts page-level text from a PDF on disk.
pub async fn extract_pages(path: &Path) -> Result<Vec<PageText>, AppError> {
    if !path.exists() {
        return Err(AppError::NotFound(format!(
            "PDF file not found: {}",
            path.display()
        )));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !is_pdf(&file_name) {
        return Err(AppError::Validation(format!(
            "File must be a PDF: {}",
            path.display()
        )));
    }

    let bytes = tokio::fs::read(path).await?;
    extract_pages_from_mem(bytes).await
}

/// Extracts page-level text from an uploaded PDF payload. Parsing runs on a
/// blocking worker so the async executor stays free.
pub async fn extract_pages_from_mem(bytes: Vec<u8>) -> Result<Vec<PageText>, AppError> {
    let pages = tokio::task::spawn_blocking(move || -> Result<Vec<PageText>, AppError> {
        let document = Document::load_mem(&bytes)
            .map_err(|err| AppError::Extraction(format!("Failed to parse PDF: {err}")))?;
        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();
        drop(document);

        let texts = pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|err| {
            AppError::Extraction(format!("Failed to extract text from PDF: {err}"))
        })?;

        Ok(page_numbers
            .into_iter()
            .zip(texts)
            .map(|(page_number, text)| PageText {
                text: text.trim().to_string(),
                page_number,
            })
            .collect())
    })
    .await??;

    debug!(pages = pages.len(), "Extracted PDF text layer");

    Ok(pages)
}
