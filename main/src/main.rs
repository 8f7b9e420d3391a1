use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use chat_pipeline::{engine::ChatEngine, memory::ConversationMemory};
use common::{
    storage::{db::SurrealDbClient, kb_store::KnowledgeBaseStore},
    utils::{
        completion::CompletionProvider,
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use futures::StreamExt;
use ingestion_pipeline::pipeline::{FileUpload, IngestionPipeline};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;
    config.validate()?;

    tokio::fs::create_dir_all(&config.persist_root_path).await?;

    let db = Arc::new(
        SurrealDbClient::new(
            &format!("surrealkv://{}", config.persist_root_path),
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    let openai_client = (!config.openai_api_key.is_empty()).then(|| {
        Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ))
    });

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(
        &config,
        openai_client.clone(),
    )?);
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let completion_provider = Arc::new(match openai_client {
        Some(client) => CompletionProvider::new_openai(client, config.chat_model.clone()),
        None => {
            warn!("No OpenAI API key configured; answers use the offline scripted backend");
            CompletionProvider::new_scripted(vec![
                "No language model is configured. ".to_string(),
                "Set OPENAI_API_KEY to enable generated answers.".to_string(),
            ])
        }
    });

    let store = Arc::new(
        KnowledgeBaseStore::new(
            Arc::clone(&db),
            Arc::clone(&embedding_provider),
            config.persist_root_path.clone(),
        )
        .await?,
    );
    let pipeline = IngestionPipeline::new(Arc::clone(&store), config.clone())?;

    run_repl(&config, &store, &pipeline, &completion_provider).await?;

    Ok(())
}

async fn run_repl(
    config: &AppConfig,
    store: &Arc<KnowledgeBaseStore>,
    pipeline: &IngestionPipeline,
    completion: &Arc<CompletionProvider>,
) -> Result<(), Box<dyn std::error::Error>> {
    let memory = Arc::new(Mutex::new(ConversationMemory::new(
        config.max_conversation_history,
    )));
    let mut engine: Option<ChatEngine> = None;

    println!("docqa - ask questions about your documents. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("help") => print_help(),
            Some("quit" | "exit") => break,
            Some("list") => match store.list().await {
                Ok(bases) if bases.is_empty() => println!("No knowledge bases yet."),
                Ok(bases) => {
                    for kb in bases {
                        println!("{} ({} chunks)", kb.name, kb.chunk_count);
                    }
                }
                Err(err) => eprintln!("Failed to list knowledge bases: {err}"),
            },
            Some("use") => {
                let name = parts.collect::<Vec<_>>().join(" ");
                match store.open(&name).await {
                    Ok(Some(handle)) => {
                        engine = Some(match engine.take() {
                            Some(mut existing) => {
                                existing.rebind(handle);
                                existing
                            }
                            None => ChatEngine::new(
                                handle,
                                Arc::clone(&memory),
                                Arc::clone(completion),
                                config.retrieval_k,
                            ),
                        });
                        println!("Using knowledge base '{name}'.");
                    }
                    Ok(None) => println!("Knowledge base '{name}' does not exist."),
                    Err(err) => eprintln!("Failed to open knowledge base: {err}"),
                }
            }
            Some("ingest") => {
                let args: Vec<&str> = parts.collect();
                let Some((name, paths)) = args.split_first() else {
                    println!("Usage: ingest <knowledge-base> <file.pdf> [more.pdf ...]");
                    continue;
                };
                if paths.is_empty() {
                    println!("Usage: ingest <knowledge-base> <file.pdf> [more.pdf ...]");
                    continue;
                }

                let mut uploads = Vec::new();
                for path in paths {
                    match tokio::fs::read(path).await {
                        Ok(bytes) => uploads.push(FileUpload {
                            file_name: Path::new(path)
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_else(|| (*path).to_string()),
                            bytes,
                        }),
                        Err(err) => eprintln!("Skipping {path}: {err}"),
                    }
                }

                match pipeline.ingest_batch(name, &uploads).await {
                    Ok(report) => {
                        for file in &report.ingested {
                            println!("  {} -> {} chunks", file.file_name, file.chunk_count);
                        }
                        for failure in &report.failed {
                            println!("  {} FAILED: {}", failure.file_name, failure.reason);
                        }
                        println!(
                            "{} '{}' with {} chunks.",
                            if report.created { "Created" } else { "Extended" },
                            report.knowledge_base,
                            report.total_chunks
                        );
                    }
                    Err(err) => eprintln!("Ingestion failed: {err}"),
                }
            }
            Some("delete") => {
                let name = parts.collect::<Vec<_>>().join(" ");
                match store.delete(&name).await {
                    Ok(true) => println!("Deleted '{name}'."),
                    Ok(false) => println!("'{name}' did not exist."),
                    Err(err) => eprintln!("Failed to delete: {err}"),
                }
            }
            Some("stats") => {
                let name = parts.collect::<Vec<_>>().join(" ");
                if name.is_empty() {
                    match &engine {
                        Some(engine) => {
                            println!("{}", serde_json::to_string_pretty(&engine.stats().await)?);
                        }
                        None => println!("No knowledge base selected. Try 'stats <name>'."),
                    }
                } else {
                    match store.stats(&name).await {
                        Ok(Some(stats)) => {
                            println!("{}", serde_json::to_string_pretty(&stats)?);
                        }
                        Ok(None) => println!("Knowledge base '{name}' does not exist."),
                        Err(err) => eprintln!("Failed to read stats: {err}"),
                    }
                }
            }
            Some("clear") => {
                memory.lock().await.clear();
                println!("Conversation cleared.");
            }
            Some(_) => {
                let Some(engine) = &engine else {
                    println!("Select a knowledge base first: 'use <name>' (see 'list').");
                    continue;
                };

                let answer = engine.answer_stream(line);
                futures::pin_mut!(answer);
                while let Some(fragment) = answer.next().await {
                    print!("{fragment}");
                    std::io::stdout().flush()?;
                }
                println!();
            }
            None => {}
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        "Commands:\n  \
         ingest <kb> <file.pdf> [...]  add PDFs to a knowledge base (created on first use)\n  \
         use <kb>                      select the knowledge base to ask questions against\n  \
         list                          show non-empty knowledge bases\n  \
         stats [kb]                    engine stats, or stats for a named knowledge base\n  \
         delete <kb>                   remove a knowledge base\n  \
         clear                         reset the conversation\n  \
         quit                          leave\n\
         Anything else is asked as a question against the selected knowledge base."
    );
}
