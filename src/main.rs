//! chatrag - CLI entry point

use anyhow::{Context, Result};
use chatrag::{
    cli::{split_passages, Args, ChatArgs, Commands, IndexCommand},
    config::Config,
    events::{ConsumerOutcome, DeletionConsumer},
    logging,
    memory::embedding::{BertEncoder, EmbeddingPool, HashingEncoder, TextEncoder},
    memory::vector_db::{InMemoryVectorStore, QdrantVectorStore, VectorStore},
    rag::{indexing::Passage, DocumentIndexer, RagPipeline, TurnRequest},
    session::{ConversationHistoryStore, FileSessionRepository},
    streaming::{OllamaClient, StreamTerminal},
    types::SessionMetadata,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Dimension of the hashing embedder used by `--in-memory` runs
const IN_MEMORY_DIMENSION: usize = 384;

/// Shared collaborators for every subcommand
struct Components {
    config: Config,
    history: Arc<ConversationHistoryStore>,
    store: Arc<dyn VectorStore>,
    pool: Arc<EmbeddingPool>,
}

impl Components {
    async fn build(config: Config, in_memory: bool) -> Result<Self> {
        let repository = FileSessionRepository::new(&config.history.storage_dir)?;
        let history = Arc::new(ConversationHistoryStore::new(
            Arc::new(repository),
            SessionMetadata {
                temperature: config.history.temperature,
                max_tokens: config.history.max_tokens,
            },
            Duration::from_secs(config.history.save_timeout_secs),
        ));

        let store: Arc<dyn VectorStore>;
        let encoder: Arc<dyn TextEncoder>;
        if in_memory {
            store = Arc::new(InMemoryVectorStore::new());
            encoder = Arc::new(HashingEncoder::new(IN_MEMORY_DIMENSION));
        } else {
            let model_id = config.embedding.model_id.clone();
            let bert = tokio::task::spawn_blocking(move || BertEncoder::load(&model_id))
                .await
                .context("Embedding model loader panicked")??;
            store = Arc::new(QdrantVectorStore::connect(&config.qdrant.url)?);
            encoder = Arc::new(bert);
        }

        let pool = Arc::new(EmbeddingPool::new(encoder, config.embedding.worker_count()));
        info!(workers = pool.workers(), in_memory, "Components ready");

        Ok(Self {
            config,
            history,
            store,
            pool,
        })
    }

    fn indexer(&self) -> DocumentIndexer {
        DocumentIndexer::new(
            Arc::clone(&self.store),
            self.pool.clone(),
            &self.config.retrieval,
            self.config.timeouts.clone(),
        )
    }

    /// Wait for scheduled history saves and in-flight encodes
    async fn shutdown(&self) {
        self.history.drain().await;
        self.pool.shutdown().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(level) = args.log_level() {
        config.logging.level = level.to_string();
    }
    logging::init(&config.logging);

    if let Commands::Config = &args.command {
        return show_config(&args, &config);
    }

    let components = Components::build(config, args.in_memory).await?;
    if !execute(&components, &args.command).await? {
        std::process::exit(1);
    }
    Ok(())
}

/// Run a subcommand, then shut down whatever its outcome
async fn execute(components: &Components, command: &Commands) -> Result<bool> {
    let result = dispatch(components, command).await;
    components.shutdown().await;
    result
}

async fn dispatch(components: &Components, command: &Commands) -> Result<bool> {
    match command {
        Commands::Chat(chat) => run_chat(components, chat).await,
        Commands::Article { owner, prompt } => {
            stream_turn(components, TurnRequest::article(owner, prompt)).await
        }
        Commands::History { session_id } => show_history(components, session_id.as_deref()).await,
        Commands::Delete { session_id } => delete_session(components, session_id).await,
        Commands::Consume => consume_events(components).await,
        Commands::Index(command) => run_index(components, command).await,
        Commands::Config => Ok(true),
    }
}

fn show_config(args: &Args, config: &Config) -> Result<()> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(config).context("Failed to render config")?);
    Ok(())
}

async fn run_chat(components: &Components, chat: &ChatArgs) -> Result<bool> {
    stream_turn(components, chat.to_request()).await
}

/// Stream one turn as SSE frames; returns false when the turn did not complete
async fn stream_turn(components: &Components, request: TurnRequest) -> Result<bool> {
    let config = &components.config;
    let completion = Arc::new(OllamaClient::with_config(&config.ollama.url, &config.ollama.model)?);
    if !completion.health_check().await {
        warn!(url = %config.ollama.url, "Ollama did not answer the health check");
    }

    let pipeline = Arc::new(RagPipeline::new(
        config,
        Arc::clone(&components.history),
        Arc::clone(&components.store),
        components.pool.clone(),
        completion,
    )?);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (mut events, task) = pipeline.stream_turn(request, cancel);
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let written = async {
            stdout.write_all(event.to_sse().as_bytes()).await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "Stdout closed; abandoning turn");
            break;
        }
    }
    drop(events);

    let outcome = task.await.context("Turn task panicked")?;
    ctrl_c.abort();

    info!(
        terminal = ?outcome.terminal,
        chars = outcome.full_response.len(),
        "Turn finished"
    );
    Ok(matches!(outcome.terminal, StreamTerminal::Completed))
}

async fn delete_session(components: &Components, session_id: &str) -> Result<bool> {
    components.history.delete(session_id).await?;
    println!("Deleted session {}", session_id);
    Ok(true)
}

async fn show_history(components: &Components, session_id: Option<&str>) -> Result<bool> {
    match session_id {
        Some(id) => {
            let session = components.history.fetch(id).await?;
            println!("{}", serde_json::to_string_pretty(&session.to_document())?);
        }
        None => {
            for id in components.history.list().await? {
                println!("{}", id);
            }
        }
    }
    Ok(true)
}

/// Returns false when any event was dead-lettered
async fn consume_events(components: &Components) -> Result<bool> {
    let consumer = DeletionConsumer::new(
        Arc::clone(&components.history),
        Some(Arc::new(components.indexer())),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut all_acknowledged = true;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match consumer.handle(line.as_bytes()).await {
            ConsumerOutcome::Acknowledged => println!("ack"),
            ConsumerOutcome::DeadLettered(reason) => {
                all_acknowledged = false;
                println!("dead-letter: {}", reason);
            }
        }
    }
    Ok(all_acknowledged)
}

async fn run_index(components: &Components, command: &IndexCommand) -> Result<bool> {
    let indexer = components.indexer();
    match command {
        IndexCommand::Create { collection } => {
            indexer.create_collection(collection).await?;
            println!("Created collection {}", collection);
        }
        IndexCommand::List => {
            for name in indexer.list_collections().await? {
                println!("{}", name);
            }
        }
        IndexCommand::Add {
            collection,
            scope_id,
            file,
        } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let passages = split_passages(&text).into_iter().map(Passage::new).collect();
            let ids = indexer.upsert_passages(collection, scope_id, passages).await?;
            println!("Indexed {} passages into {}", ids.len(), collection);
        }
        IndexCommand::Remove {
            collection,
            scope_id,
        } => {
            indexer.delete_document(collection, scope_id).await?;
            println!("Removed document {} from {}", scope_id, collection);
        }
    }
    Ok(true)
}
