pub mod chunker;
pub mod extract;
pub mod pipeline;

#[cfg(any(test, feature = "test-utils"))]
pub mod pdf_fixtures;
