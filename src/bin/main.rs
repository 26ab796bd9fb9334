use std::sync::Arc;
use std::time::Duration;
use trade_council::{
    agents::AgentInvoker,
    archive::{InMemoryArchive, SessionArchive},
    controller::PhaseController,
    memory::{HashEmbeddingProvider, MemoryStore},
    models::{RoundLimits, SessionRequest, SessionResult},
    reasoning::CannedProvider,
    tools::ToolRegistry,
    Config,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Trade Council starting");

    let config = Arc::new(Config::default());

    // Create components. The canned provider keeps the demo runnable
    // without a reasoning backend.
    let memory = Arc::new(MemoryStore::new(
        Arc::new(HashEmbeddingProvider::default()),
        config.memory.clone(),
    ));
    let registry = Arc::new(ToolRegistry::new(&config));
    let archive: Arc<dyn SessionArchive> = Arc::new(InMemoryArchive::new());
    let invoker = Arc::new(AgentInvoker::new(
        Arc::new(CannedProvider::new()),
        Duration::from_secs(config.reasoning.timeout_seconds),
    ));

    let controller = PhaseController::new(
        invoker,
        memory,
        registry,
        archive,
        Arc::clone(&config),
    );

    let request = SessionRequest {
        ticker: "NVDA".to_string(),
        trade_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 10)
            .ok_or("invalid demo date")?,
        round_limits: RoundLimits {
            researcher: config.rounds.researcher,
            risk: config.rounds.risk,
        },
        models: config.models.clone(),
    };

    info!(
        ticker = %request.ticker,
        trade_date = %request.trade_date,
        "running deliberation"
    );

    match controller.run(request).await? {
        SessionResult::Decided(outcome) => {
            info!("deliberation decided");
            println!("\n=== DELIBERATION RESULT ===");
            println!("Session: {}", outcome.session_id);
            println!("Action: {} (magnitude {:.2})", outcome.action, outcome.magnitude);
            println!("Rationale:\n{}", outcome.rationale);
            println!("Transcript hash: {}", outcome.transcript_hash);
        }
        SessionResult::Failed(report) => {
            println!("\n=== DELIBERATION FAILED ===");
            println!("Phase reached: {}", report.phase_reached);
            println!("Error: {:?}: {}", report.error_kind, report.detail);
        }
    }

    Ok(())
}
