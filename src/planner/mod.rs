//! Planner trait and implementations
//!
//! A planner looks at the knowledge cache, decides which actions must
//! (re)run, and dispatches them in order. `HeuristicPlanner` applies fixed
//! freshness and threshold gates; `AdvisoryPlanner` asks the text generator
//! for a plan and falls back to the heuristic one on any failure.

use crate::actions::{dispatch, ActionKind};
use crate::audit::knowledge_fingerprint;
use crate::knowledge::FactKey;
use crate::models::SeriesId;
use crate::session::ResearchSession;
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod advisory;
pub use advisory::AdvisoryPlanner;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    Heuristic,
    Advisory,
    /// Advisory planning failed and the heuristic plan ran instead
    AdvisoryFallback,
}

/// One evaluated planning gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateDecision {
    pub action: ActionKind,
    pub run: bool,
    pub force: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub strategy: PlanStrategy,
    /// Actions dispatched, in order
    pub actions: Vec<ActionKind>,
    pub reasoning: String,
    pub decisions: Vec<GateDecision>,
    /// SHA-256 of the knowledge cache before planning
    pub fingerprint: String,
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide and dispatch the actions needed to bring the cache up to date.
    async fn plan(&self, session: &mut ResearchSession, force: bool) -> Result<PlanOutcome>;
}

// ===== Heuristic planner =====

/// Deterministic freshness/threshold rules
#[derive(Debug, Clone, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self
    }

    async fn gate(
        session: &mut ResearchSession,
        outcome: &mut PlanOutcome,
        decision: GateDecision,
    ) -> Result<bool> {
        session.log.record(format!(
            "Gate {}: {} ({})",
            decision.action,
            if decision.run { "run" } else { "skip" },
            decision.reason
        ));

        let run = decision.run;
        let (action, force) = (decision.action, decision.force);
        outcome.decisions.push(decision);

        if run {
            dispatch(session, action, force).await?;
            outcome.actions.push(action);
        }
        Ok(run)
    }
}

fn decision(action: ActionKind, run: bool, force: bool, reason: impl Into<String>) -> GateDecision {
    GateDecision {
        action,
        run,
        force,
        reason: reason.into(),
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn plan(&self, session: &mut ResearchSession, force: bool) -> Result<PlanOutcome> {
        session.log.record("🤖 Heuristic planning started");

        let mut outcome = PlanOutcome {
            strategy: PlanStrategy::Heuristic,
            actions: Vec::new(),
            reasoning: String::new(),
            decisions: Vec::new(),
            fingerprint: knowledge_fingerprint(&session.cache),
        };

        let validity = Duration::hours(session.settings().cache_validity_hours);
        let threshold = session.settings().rate_change_threshold;

        // 1. Rates
        let rates_decision = if !session.cache.has(FactKey::MortgageRates) {
            decision(ActionKind::FetchMortgageRates, true, force, "mortgage rates not loaded")
        } else if force {
            decision(ActionKind::FetchMortgageRates, true, true, "forced refresh")
        } else if session
            .cache
            .is_stale(SeriesId::MortgageRates, Utc::now(), validity)
        {
            // a stale series must actually be re-downloaded
            decision(
                ActionKind::FetchMortgageRates,
                true,
                true,
                format!("older than {}h", validity.num_hours()),
            )
        } else {
            decision(ActionKind::FetchMortgageRates, false, false, "fresh")
        };
        let rates_refetched = Self::gate(session, &mut outcome, rates_decision).await?;

        // 2. Analysis
        let analysis_decision = if !session.cache.has(FactKey::RateInsights) {
            decision(ActionKind::AnalyzeRates, true, force, "rate insights missing")
        } else if force {
            decision(ActionKind::AnalyzeRates, true, true, "forced refresh")
        } else if rates_refetched {
            decision(ActionKind::AnalyzeRates, true, false, "rates refetched")
        } else {
            decision(ActionKind::AnalyzeRates, false, false, "up to date")
        };
        Self::gate(session, &mut outcome, analysis_decision).await?;

        // 3. Prices
        let rate_change = latest_rate_change(session);
        let prices_decision = if !session.cache.has(FactKey::HomePrices) {
            decision(ActionKind::FetchHomePrices, true, force, "home prices not loaded")
        } else if force {
            decision(ActionKind::FetchHomePrices, true, true, "forced refresh")
        } else if rates_refetched && rate_change > threshold {
            decision(
                ActionKind::FetchHomePrices,
                true,
                true,
                format!("rate moved {:.2}pp > {:.2}pp", rate_change, threshold),
            )
        } else {
            decision(
                ActionKind::FetchHomePrices,
                false,
                false,
                format!("rate move {:.2}pp within {:.2}pp", rate_change, threshold),
            )
        };
        let prices_refetched = Self::gate(session, &mut outcome, prices_decision).await?;

        // 4. Comparison
        let comparison_decision = if !session.cache.has(FactKey::Comparison) {
            decision(ActionKind::CompareWithHomePrices, true, force, "comparison missing")
        } else if force {
            decision(ActionKind::CompareWithHomePrices, true, true, "forced refresh")
        } else if rates_refetched || prices_refetched {
            decision(ActionKind::CompareWithHomePrices, true, false, "inputs refetched")
        } else {
            decision(ActionKind::CompareWithHomePrices, false, false, "up to date")
        };
        Self::gate(session, &mut outcome, comparison_decision).await?;

        // 5. Summary, always
        Self::gate(
            session,
            &mut outcome,
            decision(ActionKind::SummarizeInsights, true, force, "always summarize"),
        )
        .await?;

        outcome.reasoning = format!(
            "Heuristic plan ran {} of {} gated actions",
            outcome.actions.len(),
            outcome.decisions.len()
        );
        info!(
            actions = outcome.actions.len(),
            fingerprint = %outcome.fingerprint,
            "Heuristic planning finished"
        );
        session.log.record("🤖 Heuristic planning finished.");
        Ok(outcome)
    }
}

/// Absolute move between the two most recent rate observations.
fn latest_rate_change(session: &ResearchSession) -> f64 {
    match session.cache.series(SeriesId::MortgageRates) {
        Some(points) if points.len() >= 2 => {
            (points[points.len() - 1].value - points[points.len() - 2].value).abs()
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::test_support::StaticSource;
    use std::sync::Arc;

    fn loaded_session(source: Arc<StaticSource>) -> ResearchSession {
        ResearchSession::new(source, AgentSettings::default())
    }

    #[tokio::test]
    async fn test_empty_cache_fetches_rates_first() {
        let source = Arc::new(
            StaticSource::new()
                .with(SeriesId::MortgageRates, &[6.0, 6.1])
                .with(SeriesId::HomePrices, &[300.0, 305.0]),
        );
        let mut session = loaded_session(source);

        let outcome = HeuristicPlanner::new().plan(&mut session, false).await.unwrap();

        assert_eq!(
            outcome.actions,
            vec![
                ActionKind::FetchMortgageRates,
                ActionKind::AnalyzeRates,
                ActionKind::FetchHomePrices,
                ActionKind::CompareWithHomePrices,
                ActionKind::SummarizeInsights,
            ]
        );
        assert_eq!(outcome.decisions.len(), 5);
        assert_eq!(outcome.fingerprint.len(), 64);
        assert!(session.cache().summary().is_some());
    }

    #[tokio::test]
    async fn test_fresh_cache_only_summarizes() {
        let source = Arc::new(
            StaticSource::new()
                .with(SeriesId::MortgageRates, &[6.0, 6.1])
                .with(SeriesId::HomePrices, &[300.0, 305.0]),
        );
        let mut session = loaded_session(source.clone());
        let planner = HeuristicPlanner::new();
        planner.plan(&mut session, false).await.unwrap();

        let outcome = planner.plan(&mut session, false).await.unwrap();
        assert_eq!(outcome.actions, vec![ActionKind::SummarizeInsights]);
        assert!(outcome.decisions.iter().filter(|d| !d.run).all(|d| !d.reason.is_empty()));
        assert_eq!(source.calls().len(), 2);
    }

    async fn replan_after_rate_move(new_rates: &[f64]) -> PlanOutcome {
        let source = Arc::new(
            StaticSource::new()
                .with(SeriesId::MortgageRates, &[6.0, 6.1])
                .with(SeriesId::HomePrices, &[300.0, 305.0]),
        );
        let mut session = loaded_session(source.clone());
        let planner = HeuristicPlanner::new();
        planner.plan(&mut session, false).await.unwrap();

        source.set(SeriesId::MortgageRates, new_rates);
        session
            .cache
            .mark_fetched(SeriesId::MortgageRates, Utc::now() - Duration::hours(25));

        planner.plan(&mut session, false).await.unwrap()
    }

    #[tokio::test]
    async fn test_large_rate_move_refetches_prices() {
        let outcome = replan_after_rate_move(&[6.0, 6.1, 6.4]).await;
        assert!(outcome.actions.contains(&ActionKind::FetchHomePrices));
        assert_eq!(outcome.actions[0], ActionKind::FetchMortgageRates);
        assert!(outcome.decisions[0].force);
    }

    #[tokio::test]
    async fn test_small_rate_move_keeps_prices() {
        let outcome = replan_after_rate_move(&[6.0, 6.1, 6.3]).await;
        assert!(!outcome.actions.contains(&ActionKind::FetchHomePrices));
        assert!(outcome.actions.contains(&ActionKind::CompareWithHomePrices));
    }

    #[tokio::test]
    async fn test_force_runs_every_gate() {
        let source = Arc::new(
            StaticSource::new()
                .with(SeriesId::MortgageRates, &[6.0, 6.1])
                .with(SeriesId::HomePrices, &[300.0, 305.0]),
        );
        let mut session = loaded_session(source);
        let planner = HeuristicPlanner::new();
        planner.plan(&mut session, false).await.unwrap();

        let outcome = planner.plan(&mut session, true).await.unwrap();
        assert_eq!(outcome.actions.len(), 5);
        assert!(outcome.decisions.iter().all(|d| d.run && d.force));
    }
}
