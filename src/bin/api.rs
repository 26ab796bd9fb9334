use std::sync::Arc;
use std::time::Duration;
use trade_council::{
    agents::AgentInvoker,
    api::{start_server, ApiState},
    archive::{InMemoryArchive, SessionArchive},
    controller::PhaseController,
    memory::{EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider, MemoryStore},
    reasoning::HttpReasoningProvider,
    tools::ToolRegistry,
    Config,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables; fails fast on inconsistent settings.
    let config = Arc::new(Config::load()?);

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!(port = api_port, "Trade Council - API server");

    // Create components
    let embedder: Arc<dyn EmbeddingProvider> = if config.memory.embedded {
        Arc::new(HashEmbeddingProvider::default())
    } else {
        Arc::new(HttpEmbeddingProvider::new(
            config.memory.embedding_url.clone(),
            config.reasoning.api_key.clone(),
            config.memory.embedding_model.clone(),
        ))
    };

    let memory = Arc::new(MemoryStore::new(embedder, config.memory.clone()));
    let registry = Arc::new(ToolRegistry::new(&config));
    let archive: Arc<dyn SessionArchive> = Arc::new(InMemoryArchive::new());

    let provider = Arc::new(HttpReasoningProvider::new(
        config.reasoning.base_url.clone(),
        config.reasoning.api_key.clone(),
    ));
    let invoker = Arc::new(AgentInvoker::new(
        provider,
        Duration::from_secs(config.reasoning.timeout_seconds),
    ));

    let controller = Arc::new(PhaseController::new(
        invoker,
        memory,
        registry,
        Arc::clone(&archive),
        Arc::clone(&config),
    ));

    info!("controller initialized, starting API server");

    start_server(
        ApiState {
            controller,
            archive,
            config,
        },
        api_port,
    )
    .await?;

    Ok(())
}
