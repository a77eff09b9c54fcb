//! LLM-advised planner
//!
//! Sends the knowledge-state snapshot to the text generator and runs the
//! actions it proposes. Any transport error, malformed reply or failed
//! action rolls the cache back to its pre-plan state and hands over to the
//! heuristic planner.

use super::{HeuristicPlanner, PlanOutcome, PlanStrategy, Planner};
use crate::actions::{dispatch, ActionKind};
use crate::audit::knowledge_fingerprint;
use crate::llm::TextGenerator;
use crate::parsing::parse_advisory_reply;
use crate::session::ResearchSession;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

const PLAN_MAX_TOKENS: u32 = 500;

/// Actions offered to the model
const OFFERED: [ActionKind; 5] = [
    ActionKind::FetchMortgageRates,
    ActionKind::AnalyzeRates,
    ActionKind::FetchHomePrices,
    ActionKind::CompareWithHomePrices,
    ActionKind::SummarizeInsights,
];

pub struct AdvisoryPlanner {
    generator: Arc<dyn TextGenerator>,
    fallback: HeuristicPlanner,
}

impl AdvisoryPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            fallback: HeuristicPlanner::new(),
        }
    }

    fn build_prompt(session: &ResearchSession, force: bool) -> String {
        let actions = OFFERED
            .iter()
            .map(|a| format!("- {}: {}", a.name(), a.description()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are an intelligent mortgage research agent. Based on the current knowledge state, \
             decide which actions to run:\n\n\
             Current Knowledge State:\n{}\n\n\
             Current Date: {}\n\
             Force Refresh: {}\n\n\
             Available actions:\n{}\n\n\
             Based on the state above, return a JSON object with:\n\
             {{\"actions\": [\"action1\", \"action2\", ...], \"reasoning\": \"brief explanation\"}}\n\n\
             Only include actions that should be run. Skip actions if data is recent and unchanged.",
            session.cache.state_summary(),
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            force,
            actions
        )
    }

    /// Everything that can fail on the advisory path, reported as a reason.
    async fn try_plan(
        &self,
        session: &mut ResearchSession,
        force: bool,
        fingerprint: String,
    ) -> std::result::Result<PlanOutcome, String> {
        session.log.record("LLM planning: state summary prepared.");
        let prompt = Self::build_prompt(session, force);

        let response = self
            .generator
            .generate(&prompt, PLAN_MAX_TOKENS)
            .await
            .map_err(|e| format!("LLM connection error: {}", e))?;

        let reply = parse_advisory_reply(&response)?;
        session.log.record(format!("LLM Decision: {}", reply.reasoning));
        session.log.record(format!(
            "LLM Actions: {}",
            if reply.actions.is_empty() {
                "none".to_string()
            } else {
                reply.actions.join(", ")
            }
        ));

        let mut outcome = PlanOutcome {
            strategy: PlanStrategy::Advisory,
            actions: Vec::new(),
            reasoning: reply.reasoning.clone(),
            decisions: Vec::new(),
            fingerprint,
        };

        for name in &reply.actions {
            let Some(kind) = ActionKind::from_name(name) else {
                session.log.record(format!("Skipping unknown action: {}", name));
                continue;
            };
            dispatch(session, kind, force)
                .await
                .map_err(|e| format!("action {} failed: {}", kind, e))?;
            outcome.actions.push(kind);
        }

        if !outcome.actions.contains(&ActionKind::SummarizeInsights) {
            session.log.record("LLM Plan: appending summarize_insights");
            dispatch(session, ActionKind::SummarizeInsights, force)
                .await
                .map_err(|e| format!("action {} failed: {}", ActionKind::SummarizeInsights, e))?;
            outcome.actions.push(ActionKind::SummarizeInsights);
        }

        Ok(outcome)
    }
}

#[async_trait]
impl Planner for AdvisoryPlanner {
    fn name(&self) -> &'static str {
        "advisory"
    }

    async fn plan(&self, session: &mut ResearchSession, force: bool) -> Result<PlanOutcome> {
        let snapshot = session.cache.clone();
        let fingerprint = knowledge_fingerprint(&snapshot);

        match self.try_plan(session, force, fingerprint).await {
            Ok(outcome) => {
                info!(
                    model = self.generator.model_name(),
                    actions = outcome.actions.len(),
                    "LLM-based planning finished"
                );
                session.log.record("🤖 LLM-based planning finished.");
                Ok(outcome)
            }
            Err(reason) => {
                warn!(reason = %reason, "Advisory planning failed, falling back");
                session.restore_cache(snapshot);
                session.log.record(format!(
                    "LLM planning failed: {}. Falling back to heuristics.",
                    reason
                ));

                let mut outcome = self.fallback.plan(session, force).await?;
                outcome.strategy = PlanStrategy::AdvisoryFallback;
                outcome.reasoning = format!("{} (advisory plan failed: {})", outcome.reasoning, reason);
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;
    use crate::knowledge::FactKey;
    use crate::models::SeriesId;
    use crate::test_support::{ScriptedGenerator, StaticSource};

    fn session() -> ResearchSession {
        let source = StaticSource::new()
            .with(SeriesId::MortgageRates, &[6.0, 6.1])
            .with(SeriesId::HomePrices, &[300.0, 305.0]);
        ResearchSession::new(Arc::new(source), AgentSettings::default())
    }

    #[tokio::test]
    async fn test_runs_proposed_actions_and_appends_summary() {
        let generator = ScriptedGenerator::new([
            "Here is my plan:\n{\"actions\": [\"fetch_mortgage_rates\", \"teleport\", \"analyze_rates\"], \
             \"reasoning\": \"rates missing\"}\nGood luck.",
        ]);
        let planner = AdvisoryPlanner::new(Arc::new(generator));
        let mut session = session();

        let outcome = planner.plan(&mut session, false).await.unwrap();

        assert_eq!(outcome.strategy, PlanStrategy::Advisory);
        assert_eq!(
            outcome.actions,
            vec![
                ActionKind::FetchMortgageRates,
                ActionKind::AnalyzeRates,
                ActionKind::SummarizeInsights,
            ]
        );
        assert_eq!(outcome.reasoning, "rates missing");
        let log = session.log().render();
        assert!(log.contains("Skipping unknown action: teleport"));
        assert!(log.contains("appending summarize_insights"));
        assert!(session.cache().has(FactKey::Summary));
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_to_heuristic() {
        let generator = ScriptedGenerator::new(["I would fetch the rates first."]);
        let planner = AdvisoryPlanner::new(Arc::new(generator));
        let mut session = session();

        let outcome = planner.plan(&mut session, false).await.unwrap();

        assert_eq!(outcome.strategy, PlanStrategy::AdvisoryFallback);
        assert_eq!(outcome.actions[0], ActionKind::FetchMortgageRates);
        assert_eq!(outcome.actions.len(), 5);
        assert!(session.log().render().contains("Falling back to heuristics"));
    }

    #[tokio::test]
    async fn test_transport_error_falls_back() {
        let planner = AdvisoryPlanner::new(Arc::new(ScriptedGenerator::failing()));
        let mut session = session();

        let outcome = planner.plan(&mut session, true).await.unwrap();

        assert_eq!(outcome.strategy, PlanStrategy::AdvisoryFallback);
        assert!(outcome.reasoning.contains("LLM connection error"));
        assert!(session.cache().has(FactKey::Comparison));
    }

    #[tokio::test]
    async fn test_prompt_carries_state_snapshot() {
        let generator = Arc::new(ScriptedGenerator::new([
            "{\"actions\": [\"summarize_insights\"], \"reasoning\": \"ok\"}",
        ]));
        let planner = AdvisoryPlanner::new(generator.clone());
        let mut session = session();

        planner.plan(&mut session, false).await.unwrap();

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("Mortgage rates: NOT LOADED"));
        assert!(prompt.contains("Force Refresh: false"));
        assert!(prompt.contains("- compare_with_home_prices: Correlate rates with home prices"));
    }
}
