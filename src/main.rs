use std::sync::Arc;

use morvo::api::{AppState, api_routes};
use morvo::config::AppConfig;
use morvo::error::Result;
use morvo::llm::create_provider;
use morvo::onboarding::StageMachine;
use morvo::orchestrator::Orchestrator;
use morvo::retrieval::{ContextRetriever, KnowledgeBase};
use morvo::session::SessionHistory;
use morvo::store::{Database, LibSqlBackend};
use morvo::website::{HttpFetcher, WebsiteAnalyzer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    eprintln!("🤖 Morvo v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   API: http://0.0.0.0:{}/", config.port);

    let llm = create_provider(&config.llm)?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.database_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.database_path.display());

    // ── Knowledge ────────────────────────────────────────────────────────
    let knowledge = KnowledgeBase::load(&config.knowledge_dir).await?;
    eprintln!(
        "   Knowledge: {} ({} chunks)",
        config.knowledge_dir.display(),
        knowledge.len()
    );
    let retriever = ContextRetriever::new(Arc::new(knowledge), config.assistant.context_top_k);

    // ── Assistant ────────────────────────────────────────────────────────
    let fetcher = Arc::new(HttpFetcher::new()?);
    let analyzer = Arc::new(WebsiteAnalyzer::new(
        fetcher,
        llm.clone(),
        config.assistant.temperature,
    ));
    let machine = Arc::new(StageMachine::new(db.clone(), analyzer.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        machine.clone(),
        db.clone(),
        retriever,
        llm,
        config.assistant.clone(),
    ));

    let app = api_routes(AppState {
        db,
        machine,
        orchestrator,
        analyzer,
        sessions: Arc::new(SessionHistory::new()),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Morvo API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
