//! Action dispatcher
//!
//! Every unit of work the planner can schedule is an `ActionKind`. The
//! dispatcher logs the invocation and the outcome and propagates handler
//! errors to the caller.
//!
//! Collaborator failures are recovered inside the handlers: a failed fetch
//! reuses cached data or leaves the series absent, so derived actions store
//! an `Unavailable` placeholder; a failed LLM call falls back to a
//! deterministic text.

use crate::analysis::{analyze_rates, compare_with_home_prices};
use crate::debate::{MarketFacts, Role};
use crate::error::ResearchError;
use crate::knowledge::{FactKey, RolePerspective};
use crate::models::{Comparison, RateAnalysis, SeriesId};
use crate::session::ResearchSession;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

const SUMMARY_MAX_TOKENS: u32 = 400;
const PERSPECTIVE_MAX_TOKENS: u32 = 250;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FetchMortgageRates,
    AnalyzeRates,
    FetchHomePrices,
    CompareWithHomePrices,
    SummarizeInsights,
    GenerateRolePerspectives,
}

/// Name table, in planning order
const ACTIONS: [(ActionKind, &str, &str); 6] = [
    (
        ActionKind::FetchMortgageRates,
        "fetch_mortgage_rates",
        "Get latest 30-year mortgage rates from FRED",
    ),
    (
        ActionKind::AnalyzeRates,
        "analyze_rates",
        "Compute statistics on mortgage rates",
    ),
    (
        ActionKind::FetchHomePrices,
        "fetch_home_prices",
        "Get latest US home price index from FRED",
    ),
    (
        ActionKind::CompareWithHomePrices,
        "compare_with_home_prices",
        "Correlate rates with home prices",
    ),
    (
        ActionKind::SummarizeInsights,
        "summarize_insights",
        "Generate insights from all data",
    ),
    (
        ActionKind::GenerateRolePerspectives,
        "generate_role_perspectives",
        "Ask each panel role for its perspective on the data",
    ),
];

impl ActionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        ACTIONS
            .iter()
            .find(|(_, n, _)| *n == name.trim())
            .map(|(kind, _, _)| *kind)
    }

    pub fn name(&self) -> &'static str {
        ACTIONS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("unknown")
    }

    pub fn description(&self) -> &'static str {
        ACTIONS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, _, description)| *description)
            .unwrap_or("")
    }

    pub fn all() -> impl Iterator<Item = ActionKind> {
        ACTIONS.iter().map(|(kind, _, _)| *kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ===== Dispatch =====

/// Run one action by name; unknown names leave the cache untouched.
pub async fn dispatch_named(
    session: &mut ResearchSession,
    name: &str,
    force: bool,
) -> Result<String> {
    let kind = ActionKind::from_name(name).ok_or_else(|| {
        session
            .log
            .record(format!("Unknown action requested: {}", name));
        ResearchError::UnknownAction(name.to_string())
    })?;
    dispatch(session, kind, force).await
}

pub async fn dispatch(session: &mut ResearchSession, kind: ActionKind, force: bool) -> Result<String> {
    session
        .log
        .record(format!("Running action: {} (force={})", kind, force));
    let start = Instant::now();

    let result = match kind {
        ActionKind::FetchMortgageRates => fetch_series(session, SeriesId::MortgageRates, force).await,
        ActionKind::AnalyzeRates => analyze(session, force).await,
        ActionKind::FetchHomePrices => fetch_series(session, SeriesId::HomePrices, force).await,
        ActionKind::CompareWithHomePrices => compare(session, force).await,
        ActionKind::SummarizeInsights => summarize(session, force).await,
        ActionKind::GenerateRolePerspectives => role_perspectives(session).await,
    };

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(outcome) => {
            debug!(action = %kind, elapsed_ms, "Action completed");
            session.log.record(format!("Completed action: {} → {}", kind, outcome));
        }
        Err(e) => {
            warn!(action = %kind, error = %e, elapsed_ms, "Action failed");
            session.log.record(format!("Action {} failed: {}", kind, e));
        }
    }
    result
}

// ===== Handlers =====

async fn fetch_series(session: &mut ResearchSession, id: SeriesId, force: bool) -> Result<String> {
    let cached = session.cache.has(FactKey::from(id));
    if cached && !force {
        session.cache.mark_fetched(id, Utc::now());
        return Ok(format!("{} already loaded.", id));
    }

    match session.source().fetch(id).await {
        Ok(points) => {
            let count = points.len();
            session.cache.store_series(id, points, Utc::now());
            info!(series = %id, points = count, "Series fetched");
            Ok(format!("{} fetched ({} observations).", id, count))
        }
        Err(e) if cached => {
            warn!(series = %id, error = %e, "Fetch failed, reusing cached series");
            session
                .log
                .record(format!("⚠️ Fetch of {} failed ({}); using cached data", id, e));
            Ok(format!("{} fetch failed; cached data reused.", id))
        }
        Err(e) => {
            warn!(series = %id, error = %e, "Fetch failed with no cached series");
            session
                .log
                .record(format!("⚠️ Fetch of {} failed ({}); no data available", id, e));
            Ok(format!("{} unavailable.", id))
        }
    }
}

async fn analyze(session: &mut ResearchSession, force: bool) -> Result<String> {
    if force || !session.cache.has(FactKey::MortgageRates) {
        fetch_series(session, SeriesId::MortgageRates, force).await?;
    }

    let analysis = match session.cache.series(SeriesId::MortgageRates) {
        Some(rates) => analyze_rates(rates),
        None => RateAnalysis::Unavailable {
            reason: "mortgage rate data unavailable".to_string(),
        },
    };

    let outcome = match &analysis {
        RateAnalysis::Computed(i) => format!(
            "Mortgage rates analyzed: {:.2}% vs {:.2}% 12-month average ({}).",
            i.latest_rate, i.avg_12_month, i.trend_signal
        ),
        RateAnalysis::Unavailable { reason } => format!("Rate analysis unavailable: {}.", reason),
    };
    session.cache.set_rate_analysis(analysis)?;
    Ok(outcome)
}

async fn compare(session: &mut ResearchSession, force: bool) -> Result<String> {
    if force || !session.cache.has(FactKey::MortgageRates) {
        fetch_series(session, SeriesId::MortgageRates, force).await?;
    }
    if force || !session.cache.has(FactKey::HomePrices) {
        fetch_series(session, SeriesId::HomePrices, force).await?;
    }

    let comparison = match (
        session.cache.series(SeriesId::MortgageRates),
        session.cache.series(SeriesId::HomePrices),
    ) {
        (Some(rates), Some(prices)) => compare_with_home_prices(rates, prices),
        _ => Comparison::Unavailable {
            reason: "rate or price data unavailable".to_string(),
        },
    };

    let outcome = comparison.describe();
    session.cache.set_comparison(comparison)?;
    Ok(outcome)
}

async fn summarize(session: &mut ResearchSession, force: bool) -> Result<String> {
    if force || !session.cache.has(FactKey::RateInsights) {
        analyze(session, force).await?;
    }
    if force || !session.cache.has(FactKey::Comparison) {
        compare(session, force).await?;
    }

    let summary = match session.generator() {
        Some(generator) => {
            let prompt = summary_prompt(session);
            match generator.generate(&prompt, SUMMARY_MAX_TOKENS).await {
                Ok(text) if !text.trim().is_empty() => {
                    session.log.record("LLM-based insights generated.");
                    text.trim().to_string()
                }
                Ok(_) => {
                    session
                        .log
                        .record("LLM insights generation returned nothing. Using simple summary.");
                    simple_summary(session)
                }
                Err(e) => {
                    session.log.record(format!(
                        "LLM insights generation failed: {}. Using simple summary.",
                        e
                    ));
                    simple_summary(session)
                }
            }
        }
        None => simple_summary(session),
    };

    session.cache.set_summary(summary.clone())?;
    session.log.record("Insights summarized.");
    Ok(summary)
}

fn simple_summary(session: &ResearchSession) -> String {
    let comparison = session
        .cache
        .comparison()
        .map(|c| c.describe())
        .unwrap_or_default();

    match session.cache.rate_analysis() {
        Some(RateAnalysis::Computed(i)) => format!(
            "Current 30Y rate: {}% (12-mo avg: {}%).\nTrend: {}.\n\n{}",
            i.latest_rate, i.avg_12_month, i.trend_signal, comparison
        ),
        Some(RateAnalysis::Unavailable { reason }) => {
            format!("Mortgage rate data unavailable ({}).\n\n{}", reason, comparison)
        }
        None => comparison,
    }
}

fn summary_prompt(session: &ResearchSession) -> String {
    let facts = MarketFacts::from_cache(&session.cache);
    let data = facts
        .map(|f| f.render())
        .unwrap_or_else(|| "No market data available.".to_string());

    format!(
        "Analyze the following mortgage and housing data and provide actionable insights:\n\n{}\n\n\
         Based on this data, provide:\n\
         1. A brief assessment of the current mortgage market (2-3 sentences)\n\
         2. What this means for homebuyers (1-2 sentences)\n\
         3. One key insight or recommendation (1-2 sentences)\n\n\
         Keep the response concise and actionable.",
        data
    )
}

async fn role_perspectives(session: &mut ResearchSession) -> Result<String> {
    if !session.cache.has(FactKey::RateInsights) {
        analyze(session, false).await?;
    }
    let facts = MarketFacts::from_cache(&session.cache).ok_or_else(|| {
        ResearchError::ActionError("rate analysis missing after analyze_rates".to_string())
    })?;

    let generator = session.generator();
    let mut perspectives = Vec::with_capacity(Role::ALL.len());

    for role in Role::ALL {
        let text = match &generator {
            Some(generator) => {
                let prompt = crate::debate::prompts::perspective(role, &facts);
                match generator.generate(&prompt, PERSPECTIVE_MAX_TOKENS).await {
                    Ok(text) => text.trim().to_string(),
                    Err(e) => {
                        session.log.record(format!(
                            "{} {}: LLM perspective failed ({}); using data-only view",
                            role.tag(),
                            role.name(),
                            e
                        ));
                        fallback_perspective(role, &facts)
                    }
                }
            }
            None => fallback_perspective(role, &facts),
        };
        perspectives.push(RolePerspective { role, text });
    }

    session.cache.set_role_insights(perspectives)?;
    Ok(format!("{} role perspectives generated.", Role::ALL.len()))
}

fn fallback_perspective(role: Role, facts: &MarketFacts) -> String {
    match role {
        Role::Planner => format!(
            "At {}% against a {}% average ({}), buyers should plan around the current level rather than wait on a move.",
            facts.latest_rate, facts.avg_12_month, facts.trend_signal
        ),
        Role::MarketAnalyst => format!(
            "Rates are {} and {} recently. {}",
            facts.recent_direction, facts.recent_volatility, facts.housing
        ),
        Role::RiskOfficer => format!(
            "Recent movement is {}; budget for rates staying near {}% or higher.",
            facts.recent_volatility, facts.latest_rate
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::test_support::{ScriptedGenerator, StaticSource};
    use chrono::Duration;
    use std::sync::Arc;

    fn session(source: StaticSource) -> ResearchSession {
        ResearchSession::new(Arc::new(source), AgentSettings::default())
    }

    #[test]
    fn test_name_table() {
        for kind in ActionKind::all() {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ActionKind::from_name("drop_tables"), None);
    }

    #[tokio::test]
    async fn test_unknown_action_leaves_cache_untouched() {
        let mut session = session(StaticSource::new().with(SeriesId::MortgageRates, &[6.0, 6.1]));
        let before = crate::audit::knowledge_fingerprint(session.cache());

        let err = dispatch_named(&mut session, "launch_rockets", false).await.unwrap_err();
        assert!(matches!(err, ResearchError::UnknownAction(_)));
        assert_eq!(before, crate::audit::knowledge_fingerprint(session.cache()));
    }

    #[tokio::test]
    async fn test_loaded_series_skips_fetch_but_refreshes_timestamp() {
        let source = Arc::new(StaticSource::new().with(SeriesId::MortgageRates, &[6.0, 6.1]));
        let mut session = ResearchSession::new(source.clone(), AgentSettings::default());

        dispatch(&mut session, ActionKind::FetchMortgageRates, false).await.unwrap();
        let stale = Utc::now() - Duration::hours(30);
        session.cache.mark_fetched(SeriesId::MortgageRates, stale);

        let outcome = dispatch(&mut session, ActionKind::FetchMortgageRates, false)
            .await
            .unwrap();
        assert!(outcome.contains("already loaded"));
        assert_eq!(source.calls().len(), 1);
        assert!(session.cache.fetched_at(SeriesId::MortgageRates).unwrap() > stale);
    }

    #[tokio::test]
    async fn test_failed_refetch_reuses_cache_without_timestamp() {
        let source = Arc::new(StaticSource::new().with(SeriesId::MortgageRates, &[6.0, 6.1]));
        let mut session = ResearchSession::new(source.clone(), AgentSettings::default());
        dispatch(&mut session, ActionKind::FetchMortgageRates, false).await.unwrap();
        let stamped = session.cache.fetched_at(SeriesId::MortgageRates).unwrap();

        source.remove(SeriesId::MortgageRates);
        let outcome = dispatch(&mut session, ActionKind::FetchMortgageRates, true)
            .await
            .unwrap();

        assert!(outcome.contains("cached data reused"));
        assert_eq!(session.cache.series(SeriesId::MortgageRates).unwrap().len(), 2);
        assert_eq!(session.cache.fetched_at(SeriesId::MortgageRates), Some(stamped));
    }

    #[tokio::test]
    async fn test_missing_data_stores_placeholders() {
        let mut session = session(StaticSource::new());

        let summary = dispatch(&mut session, ActionKind::SummarizeInsights, false)
            .await
            .unwrap();

        assert!(!session.cache.has(FactKey::MortgageRates));
        assert!(matches!(
            session.cache.rate_analysis(),
            Some(RateAnalysis::Unavailable { .. })
        ));
        assert!(matches!(
            session.cache.comparison(),
            Some(Comparison::Unavailable { .. })
        ));
        assert!(summary.contains("unavailable"));
        assert!(session.log.render().contains("no data available"));
    }

    #[tokio::test]
    async fn test_simple_summary_without_generator() {
        let mut session = session(
            StaticSource::new()
                .with(SeriesId::MortgageRates, &[6.0, 6.2, 6.4])
                .with(SeriesId::HomePrices, &[300.0, 310.0, 320.0]),
        );

        let summary = dispatch(&mut session, ActionKind::SummarizeInsights, false)
            .await
            .unwrap();

        assert!(summary.starts_with("Current 30Y rate: 6.4% (12-mo avg: 6.2%)."));
        assert!(summary.contains("Trend: Rates Elevated."));
        assert!(summary.contains("Home prices are"));
        assert_eq!(session.cache.summary(), Some(summary.as_str()));
    }

    #[tokio::test]
    async fn test_llm_summary_falls_back_on_failure() {
        let source = StaticSource::new()
            .with(SeriesId::MortgageRates, &[6.0, 6.2])
            .with(SeriesId::HomePrices, &[300.0, 310.0]);
        let mut session = session(source).with_generator(Arc::new(ScriptedGenerator::failing()));

        let summary = dispatch(&mut session, ActionKind::SummarizeInsights, false)
            .await
            .unwrap();

        assert!(summary.starts_with("Current 30Y rate:"));
        assert!(session.log.render().contains("LLM insights generation failed"));
    }

    #[tokio::test]
    async fn test_role_perspectives_use_generator() {
        let source = StaticSource::new().with(SeriesId::MortgageRates, &[6.0, 6.2]);
        let generator = ScriptedGenerator::new(["Plan now.", "Momentum is up."])
            .push_error("quota exceeded");
        let mut session = session(source).with_generator(Arc::new(generator));

        dispatch(&mut session, ActionKind::GenerateRolePerspectives, false)
            .await
            .unwrap();

        let insights = session.cache.role_insights().unwrap();
        assert_eq!(insights.len(), 3);
        assert_eq!(insights[0].text, "Plan now.");
        assert_eq!(insights[2].role, Role::RiskOfficer);
        assert!(insights[2].text.contains("budget for rates"));
    }
}
