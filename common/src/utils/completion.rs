use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs},
    Client,
};
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use tracing::debug;

/// Ordered fragments of one generated answer. The stream terminates when the
/// backend is done; a mid-stream `Err` carries the collaborator failure.
pub type CompletionStream = BoxStream<'static, Result<String, OpenAIError>>;

/// Text generation collaborator behind the chat engine.
///
/// The `Scripted` backend replays a fixed fragment sequence, serving as the
/// offline mode when no API key is configured and as the deterministic
/// generator in tests.
#[derive(Clone)]
pub struct CompletionProvider {
    inner: CompletionInner,
}

#[derive(Clone)]
enum CompletionInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
    },
    Scripted {
        fragments: Vec<String>,
    },
    #[cfg(any(test, feature = "test-utils"))]
    Broken {
        message: String,
    },
}

impl CompletionProvider {
    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        CompletionProvider {
            inner: CompletionInner::OpenAI { client, model },
        }
    }

    pub fn new_scripted(fragments: Vec<String>) -> Self {
        CompletionProvider {
            inner: CompletionInner::Scripted { fragments },
        }
    }

    /// A backend whose stream fails immediately, for exercising the
    /// error-commit path.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn broken(message: impl Into<String>) -> Self {
        CompletionProvider {
            inner: CompletionInner::Broken {
                message: message.into(),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            CompletionInner::OpenAI { .. } => "openai",
            CompletionInner::Scripted { .. } => "scripted",
            #[cfg(any(test, feature = "test-utils"))]
            CompletionInner::Broken { .. } => "broken",
        }
    }

    pub fn model_code(&self) -> String {
        match &self.inner {
            CompletionInner::OpenAI { model, .. } => model.clone(),
            CompletionInner::Scripted { .. } => "scripted".to_string(),
            #[cfg(any(test, feature = "test-utils"))]
            CompletionInner::Broken { .. } => "broken".to_string(),
        }
    }

    /// Submits the prompt and returns the fragment stream. Fragments arrive
    /// in generation order; empty deltas are passed through for the caller
    /// to skip.
    pub async fn stream(&self, prompt: String) -> Result<CompletionStream, OpenAIError> {
        match &self.inner {
            CompletionInner::OpenAI { client, model } => {
                let request = CreateChatCompletionRequestArgs::default()
                    .model(model.clone())
                    .messages([ChatCompletionRequestUserMessage::from(prompt).into()])
                    .build()?;

                let response_stream = client.chat().create_stream(request).await?;
                debug!(model = %model, "OpenAI completion streaming started");

                Ok(response_stream
                    .map(|result| {
                        result.map(|response| {
                            response
                                .choices
                                .first()
                                .and_then(|choice| choice.delta.content.clone())
                                .unwrap_or_default()
                        })
                    })
                    .boxed())
            }
            CompletionInner::Scripted { fragments } => {
                let fragments = fragments.clone();
                Ok(stream::iter(fragments.into_iter().map(Ok)).boxed())
            }
            #[cfg(any(test, feature = "test-utils"))]
            CompletionInner::Broken { message } => {
                let message = message.clone();
                Ok(stream::once(async move { Err(OpenAIError::StreamError(message)) }).boxed())
            }
        }
    }
}
