//! Three-round panel debate
//!
//! ROUND_1 collects an opening position from each role, ROUND_2 has every
//! role cross-examine its peers, ROUND_3 collects a structured vote which is
//! reduced to a consensus. Roles speak sequentially in `Role::ALL` order.
//!
//! A round is committed to the knowledge cache only when every role call
//! succeeded. A failed call aborts the round and leaves the previously
//! committed rounds untouched.

pub mod consensus;
pub mod prompts;
pub mod roles;

pub use consensus::{aggregate, ConsensusResult, StanceCount};
pub use prompts::MarketFacts;
pub use roles::Role;

use crate::audit::DecisionLog;
use crate::config::{estimate_tokens, AgentSettings};
use crate::error::ResearchError;
use crate::knowledge::KnowledgeCache;
use crate::llm::TextGenerator;
use crate::models::Stance;
use crate::parsing::{
    parse_opening_confidence, parse_vote_confidence, parse_vote_reasoning, parse_vote_stance,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 400;

// ===== Round records =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpeningPosition {
    pub role: Role,
    pub text: String,
    pub confidence: f64,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossExamination {
    pub role: Role,
    pub initial_position: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalVote {
    pub role: Role,
    pub stance: Stance,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebateStage {
    NotStarted,
    #[serde(rename = "ROUND_1")]
    Round1,
    #[serde(rename = "ROUND_2")]
    Round2,
    #[serde(rename = "ROUND_3")]
    Round3,
    Complete,
}

/// Everything the debate has committed so far
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebateRecord {
    pub opening: Option<Vec<OpeningPosition>>,
    pub cross_examination: Option<Vec<CrossExamination>>,
    pub votes: Option<Vec<FinalVote>>,
    pub consensus: Option<ConsensusResult>,
    /// Accumulated USD estimate over committed rounds
    pub estimated_cost: f64,
    pub started_at: Option<DateTime<Utc>>,
}

impl DebateRecord {
    /// Last completed stage
    pub fn stage(&self) -> DebateStage {
        match (&self.opening, &self.cross_examination, &self.votes, &self.consensus) {
            (None, _, _, _) => DebateStage::NotStarted,
            (Some(_), None, _, _) => DebateStage::Round1,
            (Some(_), Some(_), None, _) => DebateStage::Round2,
            (Some(_), Some(_), Some(_), None) => DebateStage::Round3,
            (Some(_), Some(_), Some(_), Some(_)) => DebateStage::Complete,
        }
    }

    /// Drop every round after `round` together with the consensus.
    fn discard_after(&mut self, round: u8) {
        if round < 2 {
            self.cross_examination = None;
        }
        if round < 3 {
            self.votes = None;
        }
        self.consensus = None;
    }

    fn opening_text(&self, role: Role) -> Option<&str> {
        self.opening
            .as_ref()?
            .iter()
            .find(|p| p.role == role)
            .map(|p| p.text.as_str())
    }
}

// ===== Engine =====

pub struct DebateEngine {
    generator: Arc<dyn TextGenerator>,
    settings: AgentSettings,
    max_output_tokens: u32,
}

impl DebateEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: AgentSettings) -> Self {
        Self {
            generator,
            settings,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    /// All three rounds in sequence.
    pub async fn run_full(
        &self,
        cache: &mut KnowledgeCache,
        log: &mut DecisionLog,
        lessons: &str,
    ) -> Result<ConsensusResult> {
        log.record("🎭 Starting multi-agent debate");
        self.run_round_one(cache, log, lessons).await?;
        self.run_round_two(cache, log, lessons).await?;
        self.run_round_three(cache, log, lessons).await
    }

    /// Re-run rounds 2 and 3 on top of an existing round 1.
    pub async fn resume(
        &self,
        cache: &mut KnowledgeCache,
        log: &mut DecisionLog,
        lessons: &str,
    ) -> Result<ConsensusResult> {
        if cache.debate().opening.is_none() {
            return Err(ResearchError::SequenceViolation(
                "cannot resume debate: round 1 has not been completed".to_string(),
            ));
        }
        log.record("🎭 Resuming debate from round 2");
        self.run_round_two(cache, log, lessons).await?;
        self.run_round_three(cache, log, lessons).await
    }

    pub async fn run_round_one(
        &self,
        cache: &mut KnowledgeCache,
        log: &mut DecisionLog,
        lessons: &str,
    ) -> Result<()> {
        let facts = MarketFacts::from_cache(cache).ok_or_else(|| {
            ResearchError::SequenceViolation(
                "round 1 requires rate analysis in the knowledge cache".to_string(),
            )
        })?;

        cache.debate_mut().discard_after(1);
        log.record("Round 1: opening positions");

        let mut openings = Vec::with_capacity(Role::ALL.len());
        let mut cost = 0.0;
        for role in Role::ALL {
            let prompt = prompts::opening_position(role, &facts, lessons);
            let text = self.call(role, &prompt, log).await?;
            cost += self.call_cost(&prompt, &text);

            let confidence = parse_opening_confidence(&text);
            log.record(format!(
                "{} {}: opening position recorded ({:.0}% confidence)",
                role.tag(),
                role.name(),
                confidence
            ));
            openings.push(OpeningPosition {
                role,
                text,
                confidence,
                tag: role.tag().to_string(),
            });
        }

        let record = cache.debate_mut();
        *record = DebateRecord {
            opening: Some(openings),
            started_at: Some(Utc::now()),
            estimated_cost: cost,
            ..DebateRecord::default()
        };

        info!(round = 1, cost = cost, "Debate round committed");
        Ok(())
    }

    pub async fn run_round_two(
        &self,
        cache: &mut KnowledgeCache,
        log: &mut DecisionLog,
        lessons: &str,
    ) -> Result<()> {
        if cache.debate().opening.is_none() {
            return Err(ResearchError::SequenceViolation(
                "round 2 requires round 1".to_string(),
            ));
        }

        cache.debate_mut().discard_after(2);
        log.record("Round 2: cross-examination");

        let record = cache.debate();

        let mut exchanges = Vec::with_capacity(Role::ALL.len());
        let mut cost = 0.0;
        for role in Role::ALL {
            let own = record.opening_text(role).unwrap_or_default().to_string();
            let peers: Vec<(Role, &str)> = Role::ALL
                .into_iter()
                .filter(|peer| *peer != role)
                .filter_map(|peer| record.opening_text(peer).map(|text| (peer, text)))
                .collect();

            let prompt = prompts::cross_examination(role, &own, &peers, lessons);
            let response = self.call(role, &prompt, log).await?;
            cost += self.call_cost(&prompt, &response);

            log.record(format!("{} {}: cross-examination recorded", role.tag(), role.name()));
            exchanges.push(CrossExamination {
                role,
                initial_position: own,
                response,
            });
        }

        let record = cache.debate_mut();
        record.cross_examination = Some(exchanges);
        record.estimated_cost += cost;

        info!(round = 2, cost = cost, "Debate round committed");
        Ok(())
    }

    pub async fn run_round_three(
        &self,
        cache: &mut KnowledgeCache,
        log: &mut DecisionLog,
        lessons: &str,
    ) -> Result<ConsensusResult> {
        let record = cache.debate();
        let exchanges = record.cross_examination.as_ref().ok_or_else(|| {
            ResearchError::SequenceViolation("round 3 requires round 2".to_string())
        })?;

        log.record("Round 3: final votes");

        let mut votes = Vec::with_capacity(Role::ALL.len());
        let mut cost = 0.0;
        for exchange in exchanges {
            let role = exchange.role;
            let prompt = prompts::final_vote(
                role,
                &exchange.initial_position,
                &exchange.response,
                lessons,
            );
            let text = self.call(role, &prompt, log).await?;
            cost += self.call_cost(&prompt, &text);

            let vote = FinalVote {
                role,
                stance: parse_vote_stance(&text),
                confidence: parse_vote_confidence(&text),
                reasoning: parse_vote_reasoning(&text),
            };
            log.record(format!(
                "{} {}: votes {} ({:.0}% confidence)",
                role.tag(),
                role.name(),
                vote.stance,
                vote.confidence
            ));
            votes.push(vote);
        }

        let consensus = aggregate(&votes).ok_or_else(|| {
            ResearchError::DebateError("no votes were cast in round 3".to_string())
        })?;

        let record = cache.debate_mut();
        record.votes = Some(votes);
        record.consensus = Some(consensus.clone());
        record.estimated_cost += cost;

        log.record(format!("🏁 Consensus: {}", consensus.recommendation()));
        info!(
            round = 3,
            majority = %consensus.majority,
            strength = consensus.consensus_strength,
            total_cost = record.estimated_cost,
            "Debate complete"
        );
        Ok(consensus)
    }

    async fn call(&self, role: Role, prompt: &str, log: &mut DecisionLog) -> Result<String> {
        match self.generator.generate(prompt, self.max_output_tokens).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => {
                warn!(role = role.name(), error = %e, "Debate call failed");
                log.record(format!(
                    "{} {}: LLM call failed, round aborted ({})",
                    role.tag(),
                    role.name(),
                    e
                ));
                Err(ResearchError::DebateError(format!("{} failed: {}", role.name(), e)))
            }
        }
    }

    fn call_cost(&self, prompt: &str, response: &str) -> f64 {
        self.settings
            .estimate_cost(estimate_tokens(prompt), estimate_tokens(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_rates;
    use crate::models::{SeriesId, SeriesPoint};
    use crate::test_support::ScriptedGenerator;
    use chrono::{Duration, NaiveDate};

    fn cache_with_facts() -> KnowledgeCache {
        let start = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        let points: Vec<_> = [6.9, 6.8, 6.7, 6.6]
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint::new(start + Duration::weeks(i as i64), *v))
            .collect();
        let mut cache = KnowledgeCache::new();
        let analysis = analyze_rates(&points);
        cache.store_series(SeriesId::MortgageRates, points, Utc::now());
        cache.set_rate_analysis(analysis).unwrap();
        cache
    }

    fn engine(generator: ScriptedGenerator) -> DebateEngine {
        DebateEngine::new(Arc::new(generator), AgentSettings::default())
    }

    fn full_script() -> Vec<&'static str> {
        vec![
            "Rates are cooling. I hold this view with 80% confidence.",
            "Momentum favors lower rates.",
            "Affordability is still stretched.",
            "I support the Market Analyst on momentum.",
            "I agree with the Planner.",
            "I challenge the Planner on inflation risk.",
            "VOTE: BULLISH\nCONFIDENCE: 80\nREASONING: Rates are below average.",
            "VOTE: BULLISH\nCONFIDENCE: 65\nREASONING: Momentum.",
            "VOTE: BEARISH\nCONFIDENCE: 71\nREASONING: Inflation risk.",
        ]
    }

    #[tokio::test]
    async fn test_full_debate_reaches_consensus() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let engine = engine(ScriptedGenerator::new(full_script()));

        let consensus = engine.run_full(&mut cache, &mut log, "").await.unwrap();

        assert_eq!(consensus.majority, Stance::Bullish);
        assert!((consensus.consensus_strength - 66.7).abs() < 0.1);
        assert_eq!(consensus.average_confidence, (80.0 + 65.0 + 71.0) / 3.0);

        let record = cache.debate();
        assert_eq!(record.stage(), DebateStage::Complete);
        let opening = record.opening.as_ref().unwrap();
        assert_eq!(opening[0].confidence, 80.0);
        assert_eq!(opening[1].confidence, 70.0);
        assert_eq!(opening[2].tag, "🛡️");
        assert_eq!(
            record.cross_examination.as_ref().unwrap()[1].initial_position,
            "Momentum favors lower rates."
        );
        assert!(record.estimated_cost > 0.0);
        assert_eq!(log.role_entries().len(), 9);
    }

    #[tokio::test]
    async fn test_round_one_reentry_clears_later_rounds() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let mut script = full_script();
        script.extend(["Fresh opening.", "Second.", "Third."]);
        let engine = engine(ScriptedGenerator::new(script));

        engine.run_full(&mut cache, &mut log, "").await.unwrap();
        engine.run_round_one(&mut cache, &mut log, "").await.unwrap();

        let record = cache.debate();
        assert_eq!(record.stage(), DebateStage::Round1);
        assert!(record.cross_examination.is_none());
        assert!(record.votes.is_none());
        assert!(record.consensus.is_none());
        assert_eq!(record.opening.as_ref().unwrap()[0].text, "Fresh opening.");
    }

    #[tokio::test]
    async fn test_failed_rerun_drops_previous_consensus() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let engine = engine(ScriptedGenerator::new(full_script()));

        engine.run_full(&mut cache, &mut log, "").await.unwrap();
        let previous_opening = cache.debate().opening.clone();

        // the script is spent, so the first opening call fails
        let err = engine.run_full(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::DebateError(_)));

        let record = cache.debate();
        assert_eq!(record.stage(), DebateStage::Round1);
        assert_eq!(record.opening, previous_opening);
        assert!(record.cross_examination.is_none());
        assert!(record.votes.is_none());
        assert!(record.consensus.is_none());
    }

    #[tokio::test]
    async fn test_failed_resume_drops_previous_votes() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let mut script = full_script();
        script.push("Only one new response.");
        let engine = engine(ScriptedGenerator::new(script));

        engine.run_full(&mut cache, &mut log, "").await.unwrap();
        let previous_exchanges = cache.debate().cross_examination.clone();

        let err = engine.resume(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::DebateError(_)));

        let record = cache.debate();
        assert_eq!(record.stage(), DebateStage::Round2);
        assert_eq!(record.cross_examination, previous_exchanges);
        assert!(record.votes.is_none());
        assert!(record.consensus.is_none());
    }

    #[tokio::test]
    async fn test_round_two_requires_round_one() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let generator = Arc::new(ScriptedGenerator::new(full_script()));
        let engine = DebateEngine::new(generator.clone(), AgentSettings::default());
        let before = cache.debate().clone();

        let err = engine.run_round_two(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::SequenceViolation(_)));
        assert_eq!(cache.debate(), &before);
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_round_three_requires_round_two() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let generator = Arc::new(ScriptedGenerator::new(full_script()));
        let engine = DebateEngine::new(generator.clone(), AgentSettings::default());

        engine.run_round_one(&mut cache, &mut log, "").await.unwrap();
        let before = cache.debate().clone();

        let err = engine.run_round_three(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::SequenceViolation(_)));
        assert_eq!(cache.debate(), &before);
        assert_eq!(generator.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_resume_without_round_one_fails() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let engine = engine(ScriptedGenerator::new(Vec::<&str>::new()));

        let err = engine.resume(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::SequenceViolation(_)));
        assert_eq!(cache.debate().stage(), DebateStage::NotStarted);
    }

    #[tokio::test]
    async fn test_round_one_requires_facts() {
        let mut cache = KnowledgeCache::new();
        let mut log = DecisionLog::new();
        let engine = engine(ScriptedGenerator::new(vec!["unused"]));

        let err = engine.run_round_one(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::SequenceViolation(_)));
    }

    #[tokio::test]
    async fn test_failed_role_aborts_round_without_commit() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        // Script runs out after round 1 and the first cross-examination.
        let engine = engine(ScriptedGenerator::new(vec![
            "Opening one.",
            "Opening two.",
            "Opening three.",
            "Only one response.",
        ]));

        let err = engine.run_full(&mut cache, &mut log, "").await.unwrap_err();
        assert!(matches!(err, ResearchError::DebateError(_)));

        let record = cache.debate();
        assert_eq!(record.stage(), DebateStage::Round1);
        assert!(record.cross_examination.is_none());
        assert_eq!(log.llm_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_reruns_rounds_two_and_three() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let mut script = full_script();
        script.extend([
            "New response 1.",
            "New response 2.",
            "New response 3.",
            "VOTE: NEUTRAL\nCONFIDENCE: 55",
            "VOTE: NEUTRAL\nCONFIDENCE: 60",
            "VOTE: BEARISH\nCONFIDENCE: 70",
        ]);
        let engine = engine(ScriptedGenerator::new(script));

        engine.run_full(&mut cache, &mut log, "").await.unwrap();
        let consensus = engine.resume(&mut cache, &mut log, "").await.unwrap();

        assert_eq!(consensus.majority, Stance::Neutral);
        let record = cache.debate();
        assert_eq!(record.opening.as_ref().unwrap()[0].confidence, 80.0);
        assert_eq!(record.cross_examination.as_ref().unwrap()[0].response, "New response 1.");
    }

    #[tokio::test]
    async fn test_lessons_reach_every_prompt() {
        let mut cache = cache_with_facts();
        let mut log = DecisionLog::new();
        let generator = Arc::new(ScriptedGenerator::new(full_script()));
        let engine = DebateEngine::new(generator.clone(), AgentSettings::default());

        engine
            .run_full(&mut cache, &mut log, "### Historical Lessons Learned:\n1. lesson")
            .await
            .unwrap();

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 9);
        assert!(prompts.iter().all(|p| p.contains("Historical Lessons Learned")));
    }
}
