use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use crew_onboarding::config::{AppConfig, ServerConfig};
use crew_onboarding::llm::{LlmBackend, LlmConfig, create_provider};
use crew_onboarding::onboarding::{OnboardingRouteState, OnboardingService, onboarding_routes};
use crew_onboarding::store::{Database, LibSqlBackend};
use crew_onboarding::tools::OperationRegistry;
use crew_onboarding::tools::builtin::register_builtin_operations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let server = ServerConfig::from_env().context("Reading server configuration")?;
    let config = AppConfig::from_env();

    eprintln!("⛵ Crew Onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", server.model);
    eprintln!("   API: http://0.0.0.0:{}/api", server.port);

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm = create_provider(&LlmConfig {
        backend: LlmBackend::Anthropic,
        api_key: server.api_key.clone(),
        model: server.model.clone(),
    })?;

    // ── Database ────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&server.db_path))
            .await
            .with_context(|| format!("Opening database at {}", server.db_path))?,
    );
    eprintln!("   Database: {}", server.db_path);

    // ── Operations ──────────────────────────────────────────────────────
    let operations = Arc::new(OperationRegistry::new());
    register_builtin_operations(&operations, Arc::clone(&db));
    eprintln!("   Operations: {} registered", operations.count());

    // ── Service + HTTP ──────────────────────────────────────────────────
    let service = Arc::new(OnboardingService::new(llm, operations, db, &config));
    let app = onboarding_routes(OnboardingRouteState { service }).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("Binding port {}", server.port))?;
    tracing::info!(port = server.port, "Onboarding server started");
    axum::serve(listener, app).await?;

    Ok(())
}
