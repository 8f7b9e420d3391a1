use common::storage::types::document_chunk::DocumentChunk;

/// Stands in for the context block when retrieval returned nothing, so the
/// prompt shape stays identical.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant context found in the knowledge base.";

/// The exact phrase the model is instructed to emit when the context cannot
/// answer the question.
pub const INSUFFICIENT_CONTEXT_PHRASE: &str = "No relevant information found.";

/// Concatenates retrieved chunks into the context block, each prefixed with
/// its 1-based source index and page number when present.
pub fn assemble_context(chunks: &[DocumentChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let page_info = chunk
                .page
                .map(|page| format!(" (Page {page})"))
                .unwrap_or_default();

            format!(
                "[Source {} - {}{}]:\n{}\n",
                index + 1,
                chunk.source_id,
                page_info,
                chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Formats the single generation prompt: fixed instructions, context block,
/// conversation window, question.
pub fn build_prompt(context: &str, history: &str, question: &str) -> String {
    format!(
        r#"You are a helpful AI assistant that answers questions based on the provided context and conversation history.

Context from documents:
{context}

Conversation history:
{history}

Current question: {question}

Instructions:
1. Use the provided context to answer the question accurately
2. If the context doesn't contain relevant information, output the following verbatim: "{INSUFFICIENT_CONTEXT_PHRASE}"
3. Maintain conversation context from the history
4. Be concise but comprehensive in your response
5. If asked about previous parts of the conversation, refer to the chat history

Answer:"#
    )
}
