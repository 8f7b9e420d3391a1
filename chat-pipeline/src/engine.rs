use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use common::{
    error::AppError,
    storage::{kb_store::KnowledgeBaseHandle, types::document_chunk::DocumentChunk},
    utils::completion::CompletionProvider,
};

use crate::{
    context::{assemble_context, build_prompt},
    memory::ConversationMemory,
    state,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub model: String,
    pub knowledge_base: String,
    pub indexed_chunks: usize,
    pub retrieval_k: u8,
    pub conversation_active: bool,
    pub total_session_messages: usize,
    pub memory_limit: usize,
}

/// Retrieve-then-generate engine for one session.
///
/// Bound to exactly one knowledge base handle and one conversation memory
/// for its lifetime; `rebind` swaps the retrieval target without touching
/// memory. Every question runs the answer flow `Retrieving ->
/// ContextAssembled -> Streaming -> Committed`; collaborator failures land
/// in `Errored` but still commit the exchange, so the transcript never
/// loses a question.
pub struct ChatEngine {
    handle: KnowledgeBaseHandle,
    memory: Arc<Mutex<ConversationMemory>>,
    completion: Arc<CompletionProvider>,
    retrieval_k: u8,
}

impl ChatEngine {
    pub fn new(
        handle: KnowledgeBaseHandle,
        memory: Arc<Mutex<ConversationMemory>>,
        completion: Arc<CompletionProvider>,
        retrieval_k: u8,
    ) -> Self {
        info!(
            knowledge_base = handle.name(),
            retrieval_k, "Initialized chat engine"
        );

        Self {
            handle,
            memory,
            completion,
            retrieval_k,
        }
    }

    /// Swaps the retrieval target. Memory is keyed by session, not by
    /// knowledge base, so it stays as it is.
    pub fn rebind(&mut self, handle: KnowledgeBaseHandle) {
        info!(knowledge_base = handle.name(), "Rebound chat engine");
        self.handle = handle;
    }

    pub fn memory(&self) -> Arc<Mutex<ConversationMemory>> {
        Arc::clone(&self.memory)
    }

    /// Synchronous retrieval only, for inspecting what the engine would
    /// ground an answer on.
    pub async fn source_documents(&self, question: &str) -> Result<Vec<DocumentChunk>, AppError> {
        self.handle.query(question, self.retrieval_k).await
    }

    pub async fn stats(&self) -> EngineStats {
        let indexed_chunks = match self.handle.count().await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "Failed to read indexed chunk count");
                0
            }
        };

        let summary = self.memory.lock().await.summary();

        EngineStats {
            model: self.completion.model_code(),
            knowledge_base: self.handle.name().to_string(),
            indexed_chunks,
            retrieval_k: self.retrieval_k,
            conversation_active: summary.conversation_active,
            total_session_messages: summary.total_session_messages,
            memory_limit: summary.memory_limit,
        }
    }

    /// Answers one question, yielding response fragments in generation
    /// order. Once the stream is exhausted the full exchange has been
    /// committed to memory exactly once, also when generation failed.
    pub fn answer_stream(&self, question: &str) -> impl Stream<Item = String> + Send + 'static {
        let handle = self.handle.clone();
        let memory = self.memory();
        let completion = Arc::clone(&self.completion);
        let retrieval_k = self.retrieval_k;
        let question = question.to_string();

        stream! {
            let machine = state::begin();

            // Retrieving: a failed query degrades to an empty result set so
            // context assembly still runs
            let retrieved = match handle.query(&question, retrieval_k).await {
                Ok(chunks) => chunks,
                Err(err) => {
                    warn!(error = %err, "Retrieval failed; continuing with empty context");
                    Vec::new()
                }
            };
            let source_count = retrieved.len();
            debug!(source_count, "Retrieved context chunks");

            // ContextAssembled
            let context = assemble_context(&retrieved);
            let history = memory.lock().await.window_as_text();
            let prompt = build_prompt(&context, &history, &question);
            let machine = match machine.assemble() {
                Ok(machine) => machine,
                Err((machine, guard)) => {
                    error!(guard = %guard.guard, event = %guard.event, "Answer flow rejected context assembly");
                    let _ = machine.fail();
                    let message = error_reply("internal state error");
                    memory.lock().await.add_exchange(&question, &message);
                    yield message;
                    return;
                }
            };

            // Streaming
            let mut fragments = match completion.stream(prompt).await {
                Ok(fragments) => fragments,
                Err(err) => {
                    error!(error = %err, "Failed to open completion stream");
                    let _ = machine.fail();
                    let message = error_reply(&err);
                    memory.lock().await.add_exchange(&question, &message);
                    yield message;
                    return;
                }
            };
            let machine = match machine.begin_streaming() {
                Ok(machine) => machine,
                Err((machine, guard)) => {
                    error!(guard = %guard.guard, event = %guard.event, "Answer flow rejected streaming");
                    let _ = machine.fail();
                    let message = error_reply("internal state error");
                    memory.lock().await.add_exchange(&question, &message);
                    yield message;
                    return;
                }
            };

            let mut full_response = String::new();
            let mut errored = false;
            while let Some(next) = fragments.next().await {
                match next {
                    Ok(fragment) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        full_response.push_str(&fragment);
                        yield fragment;
                    }
                    Err(err) => {
                        error!(error = %err, "Completion stream failed mid-answer");
                        let message = error_reply(&err);
                        full_response.push_str(&message);
                        yield message;
                        errored = true;
                        break;
                    }
                }
            }

            // Committed: exactly one exchange per question, error text
            // included, strictly after the fragment stream is exhausted
            memory.lock().await.add_exchange(&question, &full_response);
            if errored {
                let _ = machine.fail();
            } else {
                let _ = machine.commit();
                debug!(
                    source_count,
                    response_chars = full_response.len(),
                    "Committed answer exchange"
                );
            }
        }
    }
}

fn error_reply(err: impl fmt::Display) -> String {
    format!("I apologize, but I encountered an error while generating a response: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        storage::{
            db::SurrealDbClient,
            kb_store::KnowledgeBaseStore,
            types::document_chunk::ChunkDraft,
        },
        utils::embedding::EmbeddingProvider,
    };
    use uuid::Uuid;

    async fn store() -> Arc<KnowledgeBaseStore> {
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

        Arc::new(
            KnowledgeBaseStore::new(db, embedder, "/tmp/kb-test")
                .await
                .expect("Failed to build store"),
        )
    }

    fn contract_drafts() -> Vec<ChunkDraft> {
        [
            ("The agreement begins on the first of March.", 1u32),
            ("Either party may terminate with thirty days notice.", 1),
            ("The termination clause covers material breach.", 1),
            ("Renewal happens automatically every twelve months.", 2),
            ("Payment is due within fourteen days of invoicing.", 2),
        ]
        .iter()
        .enumerate()
        .map(|(i, (text, page))| {
            ChunkDraft::new(
                (*text).to_string(),
                "contract.pdf".to_string(),
                Some(*page),
                i * 50,
            )
        })
        .collect()
    }

    fn scripted_reply() -> Vec<String> {
        vec![
            "The termination".to_string(),
            " clause requires".to_string(),
            " thirty days notice.".to_string(),
        ]
    }

    fn engine(
        handle: KnowledgeBaseHandle,
        completion: CompletionProvider,
    ) -> ChatEngine {
        ChatEngine::new(
            handle,
            Arc::new(Mutex::new(ConversationMemory::new(3))),
            Arc::new(completion),
            4,
        )
    }

    #[tokio::test]
    async fn test_answer_stream_end_to_end() {
        let store = store().await;
        let handle = store
            .create("Contracts", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        let engine = engine(handle, CompletionProvider::new_scripted(scripted_reply()));

        let retrieved = engine
            .source_documents("What is the termination clause?")
            .await
            .expect("retrieval failed");
        assert!(!retrieved.is_empty());
        assert!(retrieved.len() <= 4);

        let answer_stream = engine.answer_stream("What is the termination clause?");
        futures::pin_mut!(answer_stream);
        let fragments: Vec<String> = answer_stream.collect().await;

        assert_eq!(fragments, scripted_reply());

        let summary = engine.memory().lock().await.summary();
        assert_eq!(summary.total_session_messages, 2);
        let window = engine.memory().lock().await.window_as_text();
        assert!(window.contains("Human: What is the termination clause?"));
        assert!(window.contains("Assistant: The termination clause requires thirty days notice."));
    }

    #[tokio::test]
    async fn test_fragments_arrive_in_generation_order() {
        let store = store().await;
        let handle = store
            .create("KB", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        let engine = engine(handle, CompletionProvider::new_scripted(scripted_reply()));

        let answer_stream = engine.answer_stream("anything");
        futures::pin_mut!(answer_stream);
        let fragments: Vec<String> = answer_stream.collect().await;

        assert_eq!(fragments.join(""), "The termination clause requires thirty days notice.");
    }

    #[tokio::test]
    async fn test_zero_retrieval_still_generates_and_commits() {
        let store = store().await;
        let handle = store
            .create("Ephemeral", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        // Drop the collection so retrieval comes back empty
        store.delete("Ephemeral").await.expect("delete failed");

        let engine = engine(handle, CompletionProvider::new_scripted(scripted_reply()));

        let answer_stream = engine.answer_stream("What now?");
        futures::pin_mut!(answer_stream);
        let fragments: Vec<String> = answer_stream.collect().await;

        assert!(!fragments.is_empty());
        assert_eq!(engine.memory().lock().await.summary().total_session_messages, 2);
    }

    #[tokio::test]
    async fn test_generation_failure_is_committed_as_answer() {
        let store = store().await;
        let handle = store
            .create("KB", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        let engine = engine(handle, CompletionProvider::broken("backend unavailable"));

        let answer_stream = engine.answer_stream("Will this fail?");
        futures::pin_mut!(answer_stream);
        let fragments: Vec<String> = answer_stream.collect().await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("I apologize"));
        assert!(fragments[0].contains("backend unavailable"));

        let memory = engine.memory();
        let guard = memory.lock().await;
        assert_eq!(guard.summary().total_session_messages, 2);
        let window = guard.window_as_text();
        assert!(window.contains("Will this fail?"));
        assert!(window.contains("I apologize"));
    }

    #[tokio::test]
    async fn test_memory_carries_across_questions() {
        let store = store().await;
        let handle = store
            .create("KB", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        let engine = engine(handle, CompletionProvider::new_scripted(scripted_reply()));

        for question in ["first question", "second question"] {
            let answer_stream = engine.answer_stream(question);
            futures::pin_mut!(answer_stream);
            let _: Vec<String> = answer_stream.collect().await;
        }

        let window = engine.memory().lock().await.window_as_text();
        assert!(window.contains("first question"));
        assert!(window.contains("second question"));
    }

    #[tokio::test]
    async fn test_rebind_swaps_retrieval_target_keeps_memory() {
        let store = store().await;
        let contracts = store
            .create("Contracts", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        let manuals = store
            .create(
                "Manuals",
                &[ChunkDraft::new(
                    "Press the red button to restart the machine.".to_string(),
                    "manual.pdf".to_string(),
                    Some(1),
                    0,
                )],
            )
            .await
            .expect("Failed to create knowledge base");

        let mut engine = engine(contracts, CompletionProvider::new_scripted(scripted_reply()));
        {
            let answer_stream = engine.answer_stream("warm up");
            futures::pin_mut!(answer_stream);
            let _: Vec<String> = answer_stream.collect().await;
        }

        engine.rebind(manuals);

        let sources = engine
            .source_documents("red button restart")
            .await
            .expect("retrieval failed");
        assert!(sources.iter().all(|chunk| chunk.source_id == "manual.pdf"));

        // Memory survived the rebind
        assert_eq!(engine.memory().lock().await.summary().total_session_messages, 2);
    }

    #[tokio::test]
    async fn test_stats_reports_binding_and_memory() {
        let store = store().await;
        let handle = store
            .create("Contracts", &contract_drafts())
            .await
            .expect("Failed to create knowledge base");
        let engine = engine(handle, CompletionProvider::new_scripted(scripted_reply()));

        let stats = engine.stats().await;

        assert_eq!(stats.model, "scripted");
        assert_eq!(stats.knowledge_base, "Contracts");
        assert_eq!(stats.indexed_chunks, 5);
        assert_eq!(stats.retrieval_k, 4);
        assert_eq!(stats.memory_limit, 3);
        assert!(!stats.conversation_active);
        assert_eq!(stats.total_session_messages, 0);
    }
}
