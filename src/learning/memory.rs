//! In-memory pattern store for development and tests

use super::scoring::{fold_accuracy, rank_patterns};
use super::{
    assess, round2, AccuracyPoint, Assessment, DebateDetails, DebateSummary, LearnedPattern,
    NewDebate, PatternStore, ValidationOutcome, ValidationStats, ValidationStatus, DEBATE_ROUNDS,
};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct StoreState {
    next_id: i64,
    debates: Vec<DebateDetails>,
    patterns: Vec<LearnedPattern>,
}

/// One lock guards debates and patterns together, so a validation's
/// read-modify-write never interleaves with another.
pub struct InMemoryPatternStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryPatternStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }
}

impl Default for InMemoryPatternStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn save_debate(&self, debate: &NewDebate) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;

        let mut positions = debate.positions.clone();
        positions.sort_by_key(|p| p.round);

        state.debates.push(DebateDetails {
            debate: DebateSummary {
                id,
                created_at: Utc::now(),
                recommendation: debate.recommendation.clone(),
                consensus_score: debate.consensus_score,
                session_cost: debate.session_cost,
                debate_rounds: DEBATE_ROUNDS,
                validation_status: None,
                validation_accuracy: None,
                validation_date: None,
            },
            positions,
            snapshot: Some(debate.snapshot.clone()),
        });

        debug!(debate_id = id, "Debate saved in memory");
        Ok(id)
    }

    async fn debate_details(&self, debate_id: i64) -> Result<Option<DebateDetails>> {
        let state = self.state.lock().await;
        Ok(state
            .debates
            .iter()
            .find(|d| d.debate.id == debate_id)
            .cloned())
    }

    async fn recent_debates(&self, limit: usize) -> Result<Vec<DebateSummary>> {
        let state = self.state.lock().await;
        Ok(state
            .debates
            .iter()
            .rev()
            .take(limit)
            .map(|d| d.debate.clone())
            .collect())
    }

    async fn validate(&self, debate_id: i64, observed_rate: f64) -> Result<ValidationOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(index) = state.debates.iter().position(|d| d.debate.id == debate_id) else {
            return Ok(ValidationOutcome::insufficient_data());
        };

        let details = &state.debates[index];
        let (outcome, prediction, trend) =
            match assess(&details.debate, details.snapshot.as_ref(), observed_rate) {
                Assessment::Insufficient => return Ok(ValidationOutcome::insufficient_data()),
                Assessment::AlreadyValidated(outcome) => return Ok(outcome),
                Assessment::Scored {
                    outcome,
                    prediction,
                    trend,
                } => (outcome, prediction, trend),
            };

        let debate = &mut state.debates[index].debate;
        debate.validation_status = Some(outcome.status);
        debate.validation_accuracy = Some(outcome.accuracy);
        debate.validation_date = Some(Utc::now());

        let condition = trend.condition_description();
        match state
            .patterns
            .iter_mut()
            .find(|p| p.prediction == prediction && p.condition == condition)
        {
            Some(pattern) => {
                pattern.accuracy = fold_accuracy(pattern.accuracy, pattern.observations, outcome.accuracy);
                pattern.observations += 1;
            }
            None => state.patterns.push(LearnedPattern {
                description: trend.pattern_description(prediction),
                prediction,
                condition,
                accuracy: outcome.accuracy,
                observations: 1,
            }),
        }

        Ok(outcome)
    }

    async fn top_patterns(&self, min_observations: i64, limit: usize) -> Result<Vec<LearnedPattern>> {
        let state = self.state.lock().await;
        let mut patterns: Vec<LearnedPattern> = state
            .patterns
            .iter()
            .filter(|p| p.observations >= min_observations)
            .cloned()
            .collect();
        rank_patterns(&mut patterns);
        patterns.truncate(limit);
        Ok(patterns)
    }

    async fn validation_stats(&self) -> Result<ValidationStats> {
        let state = self.state.lock().await;
        let validated: Vec<&DebateSummary> = state
            .debates
            .iter()
            .map(|d| &d.debate)
            .filter(|d| d.validation_status.is_some())
            .collect();

        if validated.is_empty() {
            return Ok(ValidationStats::default());
        }

        let total = validated.len() as i64;
        let correct = validated
            .iter()
            .filter(|d| d.validation_status == Some(ValidationStatus::Correct))
            .count() as i64;
        let avg = validated
            .iter()
            .map(|d| d.validation_accuracy.unwrap_or(0.0))
            .sum::<f64>()
            / total as f64;

        Ok(ValidationStats {
            total_validated: total,
            avg_accuracy: round2(avg),
            correct_count: correct,
            accuracy_rate: round2(correct as f64 / total as f64 * 100.0),
        })
    }

    async fn accuracy_trend(&self) -> Result<Vec<AccuracyPoint>> {
        let state = self.state.lock().await;
        Ok(state
            .debates
            .iter()
            .enumerate()
            .map(|(i, d)| AccuracyPoint {
                debate_num: i as i64 + 1,
                created_at: d.debate.created_at,
                accuracy: d.debate.validation_accuracy.unwrap_or(50.0),
                status: d
                    .debate
                    .validation_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "pending".to_string()),
                recommendation: d.debate.recommendation.clone(),
            })
            .collect())
    }
}
