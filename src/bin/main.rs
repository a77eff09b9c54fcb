use mortgage_research_agent::{
    agent::ResearchAgent,
    config::AgentSettings,
    gemini::GeminiClient,
    learning::SqlitePatternStore,
    session::ResearchSession,
    sources::FredClient,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = AgentSettings::from_env()?;
    let force = std::env::args().any(|arg| arg == "--force");

    let source = Arc::new(FredClient::new(&settings.fred_base_url)?);
    let mut session = ResearchSession::new(source, settings.clone());
    if let Some(key) = &settings.gemini_api_key {
        session = session.with_generator(Arc::new(GeminiClient::new(key.clone(), settings.model.clone())?));
    }
    let store = Arc::new(SqlitePatternStore::connect(&settings.database_url).await?);
    let mut agent = ResearchAgent::new(session, store);

    info!(session_id = %agent.session().id(), force, "Mortgage research starting");

    let plan = agent.plan(force).await?;
    println!("\n=== PLAN ({:?}) ===", plan.strategy);
    println!("Reasoning: {}", plan.reasoning);
    for (i, action) in plan.actions.iter().enumerate() {
        println!("  {}: {}", i + 1, action);
    }

    if let Some(summary) = agent.session().cache().summary() {
        println!("\n=== INSIGHTS ===\n{}", summary);
    }

    if settings.llm_enabled() {
        match agent.run_debate().await {
            Ok(consensus) => {
                println!("\n=== DEBATE CONSENSUS ===");
                println!("{}", consensus.recommendation());
                let id = agent.save_debate().await?;
                println!("Saved as debate #{}", id);
                println!(
                    "Estimated cost: ${:.4}",
                    agent.session().cache().debate().estimated_cost
                );
            }
            Err(e) => {
                warn!(error = %e, "Debate aborted");
                eprintln!("Debate aborted: {}", e);
            }
        }
    } else {
        println!("\nGEMINI_API_KEY not set; skipping the debate.");
    }

    if let Some(rec) = agent.recommendation().await? {
        println!("\n=== BLENDED RECOMMENDATION ===");
        println!(
            "{} (score {:.2}; market weight {:.2}, pattern weight {:.2})",
            rec.recommendation, rec.score, rec.market_weight, rec.pattern_weight
        );
        if let Some(pattern) = rec.pattern_used {
            println!("Pattern used: {}", pattern);
        }
    }

    println!("\n=== DECISION LOG ===");
    println!("{}", agent.session().log().render());

    Ok(())
}
