use mortgage_research_agent::{
    agent::ResearchAgent,
    api::start_server,
    config::AgentSettings,
    gemini::GeminiClient,
    learning::SqlitePatternStore,
    session::ResearchSession,
    sources::FredClient,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = AgentSettings::from_env()?;

    info!("🚀 Mortgage Research Agent - API Server");
    info!("📍 Port: {}", settings.api_port);

    let source = Arc::new(FredClient::new(&settings.fred_base_url)?);
    let mut session = ResearchSession::new(source, settings.clone());
    match &settings.gemini_api_key {
        Some(key) => {
            let client = GeminiClient::new(key.clone(), settings.model.clone())?;
            session = session.with_generator(Arc::new(client));
        }
        None => {
            warn!("⚠️  GEMINI_API_KEY not set; heuristic planning only, debates disabled");
        }
    }

    let store = Arc::new(SqlitePatternStore::connect(&settings.database_url).await?);
    let agent = Arc::new(Mutex::new(ResearchAgent::new(session, store)));

    info!("✅ Agent initialized");
    info!("📡 Starting API server...");

    start_server(agent, settings.api_port).await?;

    Ok(())
}
