use mime_guess::from_path;
use thiserror::Error;

use super::config::AppConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadValidationError {
    #[error("File name missing")]
    MissingFileName,

    #[error("Only PDF files are supported: {0}")]
    UnsupportedFormat(String),

    #[error("File too large: {actual_mb}MB. Maximum allowed: {limit_mb}MB")]
    PayloadTooLarge { actual_mb: u64, limit_mb: u64 },
}

/// Validates an upload before any I/O happens: recognized extension and a
/// payload below the configured ceiling.
pub fn validate_upload(
    config: &AppConfig,
    file_name: &str,
    payload_len: usize,
) -> Result<(), UploadValidationError> {
    if file_name.trim().is_empty() {
        return Err(UploadValidationError::MissingFileName);
    }

    if !is_pdf(file_name) {
        return Err(UploadValidationError::UnsupportedFormat(
            file_name.to_string(),
        ));
    }

    let limit_bytes = config.max_file_size_mb.saturating_mul(1024 * 1024);
    if payload_len as u64 > limit_bytes {
        return Err(UploadValidationError::PayloadTooLarge {
            actual_mb: (payload_len as u64) / (1024 * 1024),
            limit_mb: config.max_file_size_mb,
        });
    }

    Ok(())
}

/// Extension-based check, case-insensitive via the mime registry.
pub fn is_pdf(file_name: &str) -> bool {
    from_path(file_name).first_or(mime::APPLICATION_OCTET_STREAM) == mime::APPLICATION_PDF
}
