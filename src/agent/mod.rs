//! Research agent - ties the session, planner, debate and learning store
//!
//! PLAN → DEBATE → PERSIST → (later) VALIDATE → LESSONS → next DEBATE

use crate::actions::{dispatch, dispatch_named, ActionKind};
use crate::debate::{ConsensusResult, DebateEngine};
use crate::error::ResearchError;
use crate::knowledge::FactKey;
use crate::learning::advisor::{blend, pick_pattern};
use crate::learning::{
    NewDebate, PatternStore, ValidationOutcome, DEFAULT_MIN_OBSERVATIONS, DEFAULT_PATTERN_LIMIT,
};
use crate::models::BlendedRecommendation;
use crate::planner::{AdvisoryPlanner, HeuristicPlanner, PlanOutcome, Planner};
use crate::session::ResearchSession;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ResearchAgent {
    session: ResearchSession,
    planner: Box<dyn Planner>,
    engine: Option<DebateEngine>,
    store: Arc<dyn PatternStore>,
}

impl ResearchAgent {
    /// The advisory planner and the debate engine are enabled only when the
    /// session has a text generator.
    pub fn new(session: ResearchSession, store: Arc<dyn PatternStore>) -> Self {
        let (planner, engine): (Box<dyn Planner>, Option<DebateEngine>) = match session.generator() {
            Some(generator) => (
                Box::new(AdvisoryPlanner::new(generator.clone())),
                Some(DebateEngine::new(generator, session.settings().clone())),
            ),
            None => (Box::new(HeuristicPlanner::new()), None),
        };

        info!(
            session_id = %session.id(),
            planner = planner.name(),
            debate_enabled = engine.is_some(),
            "Research agent created"
        );

        Self {
            session,
            planner,
            engine,
            store,
        }
    }

    pub fn with_planner(mut self, planner: Box<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn session(&self) -> &ResearchSession {
        &self.session
    }

    pub fn planner_name(&self) -> &'static str {
        self.planner.name()
    }

    pub fn store(&self) -> Arc<dyn PatternStore> {
        self.store.clone()
    }

    pub async fn plan(&mut self, force: bool) -> Result<PlanOutcome> {
        let outcome = self.planner.plan(&mut self.session, force).await?;
        debug!(
            strategy = ?outcome.strategy,
            actions = outcome.actions.len(),
            "Plan finished"
        );
        Ok(outcome)
    }

    pub async fn run_action(&mut self, name: &str, force: bool) -> Result<String> {
        dispatch_named(&mut self.session, name, force).await
    }

    /// Run a full debate. Missing rate analysis or price comparison is
    /// computed first; learned lessons are injected into every prompt.
    pub async fn run_debate(&mut self) -> Result<ConsensusResult> {
        if self.engine.is_none() {
            return Err(no_engine());
        }

        if !self.session.cache.has(FactKey::RateInsights) {
            dispatch(&mut self.session, ActionKind::AnalyzeRates, false).await?;
        }
        if !self.session.cache.has(FactKey::Comparison) {
            dispatch(&mut self.session, ActionKind::CompareWithHomePrices, false).await?;
        }

        let lessons = self.lessons().await;
        let engine = self.engine.as_ref().ok_or_else(no_engine)?;
        let (cache, log) = self.session.split_mut();
        engine.run_full(cache, log, &lessons).await
    }

    /// Re-run rounds 2 and 3 over the stored round 1.
    pub async fn resume_debate(&mut self) -> Result<ConsensusResult> {
        if self.engine.is_none() {
            return Err(no_engine());
        }
        let lessons = self.lessons().await;
        let engine = self.engine.as_ref().ok_or_else(no_engine)?;
        let (cache, log) = self.session.split_mut();
        engine.resume(cache, log, &lessons).await
    }

    /// Persist the completed debate with the current market snapshot.
    pub async fn save_debate(&mut self) -> Result<i64> {
        let debate = NewDebate::from_session(self.session.cache.debate(), &self.session.cache)?;
        let id = self.store.save_debate(&debate).await?;
        self.session.log.record(format!(
            "💾 Debate saved as #{} ({})",
            id, debate.recommendation
        ));
        Ok(id)
    }

    pub async fn validate_debate(&mut self, debate_id: i64, observed_rate: f64) -> Result<ValidationOutcome> {
        let outcome = self.store.validate(debate_id, observed_rate).await?;
        self.session.log.record(format!(
            "✅ Debate #{} validated against {:.2}%: {} (accuracy {:.1}%)",
            debate_id, observed_rate, outcome.status, outcome.accuracy
        ));
        Ok(outcome)
    }

    /// Market signal blended with the best pattern for the current trend.
    /// `None` until rates have been analyzed.
    pub async fn recommendation(&mut self) -> Result<Option<BlendedRecommendation>> {
        let Some(insights) = self
            .session
            .cache
            .rate_analysis()
            .and_then(|a| a.insights())
            .cloned()
        else {
            return Ok(None);
        };

        let patterns = self
            .store
            .top_patterns(DEFAULT_MIN_OBSERVATIONS, DEFAULT_PATTERN_LIMIT)
            .await?;
        let recommendation = blend(&insights, pick_pattern(&patterns, &insights));

        self.session.log.record(format!(
            "Blended recommendation: {} (score {:.2}, pattern weight {:.2})",
            recommendation.recommendation, recommendation.score, recommendation.pattern_weight
        ));
        Ok(Some(recommendation))
    }

    /// Store failures degrade to a debate without lessons.
    async fn lessons(&mut self) -> String {
        match self.store.digest_for_prompt().await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(error = %e, "Failed to load lessons digest");
                self.session
                    .log
                    .record(format!("⚠️ Lessons unavailable ({}); debating without them", e));
                String::new()
            }
        }
    }
}

fn no_engine() -> ResearchError {
    ResearchError::ConfigError("debate requires a text generator (set GEMINI_API_KEY)".to_string())
}
