//! Pattern learning store
//!
//! Persists completed debates with their per-round positions and the market
//! snapshot taken when they ran. A later validation scores the debate's
//! prediction against an observed rate and folds the result into a running
//! statistic per (predicted stance, rate trend) pattern. The best patterns
//! are rendered as a digest that is appended to every debate prompt.

use crate::debate::DebateRecord;
use crate::error::ResearchError;
use crate::knowledge::KnowledgeCache;
use crate::models::{SeriesId, Stance};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod advisor;
pub mod memory;
pub mod scoring;
pub mod sqlite;

pub use memory::InMemoryPatternStore;
pub use scoring::TrendCondition;
pub use sqlite::SqlitePatternStore;

pub const DEFAULT_MIN_OBSERVATIONS: i64 = 2;
pub const DEFAULT_PATTERN_LIMIT: usize = 5;
pub const DIGEST_PATTERN_LIMIT: usize = 3;
pub const DEBATE_ROUNDS: i64 = 3;

// =============================
// Records
// =============================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Correct,
    Incorrect,
    InsufficientData,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Correct => "correct",
            ValidationStatus::Incorrect => "incorrect",
            ValidationStatus::InsufficientData => "insufficient_data",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "correct" => Some(ValidationStatus::Correct),
            "incorrect" => Some(ValidationStatus::Incorrect),
            "insufficient_data" => Some(ValidationStatus::InsufficientData),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One role's contribution to one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPosition {
    pub role: String,
    pub round: i64,
    pub position: String,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub challenges: Option<String>,
    pub responses: Option<String>,
}

/// Market state at debate time; immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub mortgage_rate: Option<f64>,
    pub home_price_index: Option<f64>,
    pub rate_12mo_avg: Option<f64>,
    pub price_yoy_change: Option<f64>,
    pub snapshot_date: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn from_cache(cache: &KnowledgeCache) -> Self {
        let insights = cache.rate_analysis().and_then(|a| a.insights());
        let comparison = cache.comparison().and_then(|c| c.computed());

        Self {
            mortgage_rate: insights.map(|i| i.latest_rate),
            home_price_index: comparison
                .map(|c| c.latest_price_index)
                .or_else(|| {
                    cache
                        .series(SeriesId::HomePrices)
                        .and_then(|p| p.last())
                        .map(|p| p.value)
                }),
            rate_12mo_avg: insights.map(|i| i.avg_12_month),
            price_yoy_change: comparison.map(|c| c.price_yoy_change_pct),
            snapshot_date: Utc::now(),
        }
    }
}

/// A completed debate ready to persist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDebate {
    pub recommendation: String,
    pub consensus_score: f64,
    pub session_cost: f64,
    pub positions: Vec<AgentPosition>,
    pub snapshot: MarketSnapshot,
}

impl NewDebate {
    /// Flatten a completed debate into one position per role per round.
    pub fn from_session(record: &DebateRecord, cache: &KnowledgeCache) -> Result<Self> {
        let (Some(opening), Some(exchanges), Some(votes), Some(consensus)) = (
            &record.opening,
            &record.cross_examination,
            &record.votes,
            &record.consensus,
        ) else {
            return Err(ResearchError::SequenceViolation(
                "only a completed debate can be saved".to_string(),
            ));
        };

        let mut positions = Vec::with_capacity(opening.len() * 3);
        for p in opening {
            positions.push(AgentPosition {
                role: p.role.name().to_string(),
                round: 1,
                position: p.text.clone(),
                confidence: Some(p.confidence),
                reasoning: None,
                challenges: None,
                responses: None,
            });
        }
        for x in exchanges {
            positions.push(AgentPosition {
                role: x.role.name().to_string(),
                round: 2,
                position: x.initial_position.clone(),
                confidence: None,
                reasoning: None,
                challenges: None,
                responses: Some(x.response.clone()),
            });
        }
        for v in votes {
            positions.push(AgentPosition {
                role: v.role.name().to_string(),
                round: 3,
                position: v.stance.to_string(),
                confidence: Some(v.confidence),
                reasoning: Some(v.reasoning.clone()),
                challenges: None,
                responses: None,
            });
        }

        Ok(Self {
            recommendation: consensus.recommendation(),
            consensus_score: consensus.consensus_strength,
            session_cost: record.estimated_cost,
            positions,
            snapshot: MarketSnapshot::from_cache(cache),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateSummary {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub recommendation: String,
    pub consensus_score: f64,
    pub session_cost: f64,
    pub debate_rounds: i64,
    pub validation_status: Option<ValidationStatus>,
    pub validation_accuracy: Option<f64>,
    pub validation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateDetails {
    pub debate: DebateSummary,
    /// Ordered by round, then speaking order
    pub positions: Vec<AgentPosition>,
    pub snapshot: Option<MarketSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub accuracy: f64,
    pub rate_change: Option<f64>,
    pub rate_change_pct: Option<f64>,
    /// False when the debate had already been validated
    pub newly_validated: bool,
}

impl ValidationOutcome {
    pub fn insufficient_data() -> Self {
        Self {
            status: ValidationStatus::InsufficientData,
            accuracy: 0.0,
            rate_change: None,
            rate_change_pct: None,
            newly_validated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedPattern {
    pub description: String,
    pub prediction: Stance,
    pub condition: String,
    /// Running mean, 0-100
    pub accuracy: f64,
    pub observations: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationStats {
    pub total_validated: i64,
    pub avg_accuracy: f64,
    pub correct_count: i64,
    /// Percentage of validated debates that were correct
    pub accuracy_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccuracyPoint {
    pub debate_num: i64,
    pub created_at: DateTime<Utc>,
    /// Pending debates report 50
    pub accuracy: f64,
    /// Validation status, or "pending"
    pub status: String,
    pub recommendation: String,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// What a validation call should do with a stored debate
pub(crate) enum Assessment {
    /// No debate, snapshot or usable baseline; nothing is written
    Insufficient,
    /// Already validated; report the stored result without folding again
    AlreadyValidated(ValidationOutcome),
    Scored {
        outcome: ValidationOutcome,
        prediction: Stance,
        trend: TrendCondition,
    },
}

pub(crate) fn assess(
    debate: &DebateSummary,
    snapshot: Option<&MarketSnapshot>,
    observed_rate: f64,
) -> Assessment {
    let Some(snapshot) = snapshot else {
        return Assessment::Insufficient;
    };
    let (Some(baseline), Some(trend)) = (snapshot.mortgage_rate, TrendCondition::from_snapshot(snapshot))
    else {
        return Assessment::Insufficient;
    };

    let prediction = scoring::prediction_from_recommendation(&debate.recommendation);
    let Some(score) = scoring::score_prediction(prediction, baseline, observed_rate) else {
        return Assessment::Insufficient;
    };

    if let Some(status) = debate.validation_status {
        return Assessment::AlreadyValidated(ValidationOutcome {
            status,
            accuracy: debate.validation_accuracy.unwrap_or(0.0),
            rate_change: Some(score.rate_change),
            rate_change_pct: Some(score.rate_change_pct),
            newly_validated: false,
        });
    }

    Assessment::Scored {
        outcome: ValidationOutcome {
            status: score.status,
            accuracy: score.accuracy,
            rate_change: Some(score.rate_change),
            rate_change_pct: Some(score.rate_change_pct),
            newly_validated: true,
        },
        prediction,
        trend,
    }
}

// =============================
// Store contract
// =============================

#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Insert a debate, its positions and its snapshot. Returns the new id.
    async fn save_debate(&self, debate: &NewDebate) -> Result<i64>;

    async fn debate_details(&self, debate_id: i64) -> Result<Option<DebateDetails>>;

    /// Newest first
    async fn recent_debates(&self, limit: usize) -> Result<Vec<DebateSummary>>;

    /// Score a stored debate against an observed rate and fold the result
    /// into its pattern. Repeated calls do not fold again.
    async fn validate(&self, debate_id: i64, observed_rate: f64) -> Result<ValidationOutcome>;

    async fn top_patterns(&self, min_observations: i64, limit: usize) -> Result<Vec<LearnedPattern>>;

    async fn validation_stats(&self) -> Result<ValidationStats>;

    /// Every debate in time order
    async fn accuracy_trend(&self) -> Result<Vec<AccuracyPoint>>;

    /// Lessons block appended to debate prompts; empty when nothing qualifies.
    async fn digest_for_prompt(&self) -> Result<String> {
        let patterns = self
            .top_patterns(DEFAULT_MIN_OBSERVATIONS, DIGEST_PATTERN_LIMIT)
            .await?;
        Ok(scoring::render_digest(&patterns))
    }
}


#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A stored debate predicting `stance` with the given snapshot levels.
    pub fn debate(stance: Stance, rate: f64, average: f64) -> NewDebate {
        NewDebate {
            recommendation: format!("{} (100.0% consensus, 70.0% avg confidence)", stance),
            consensus_score: 100.0,
            session_cost: 0.001,
            positions: vec![AgentPosition {
                role: "Planner".to_string(),
                round: 1,
                position: "opening".to_string(),
                confidence: Some(70.0),
                reasoning: None,
                challenges: None,
                responses: None,
            }],
            snapshot: MarketSnapshot {
                mortgage_rate: Some(rate),
                home_price_index: Some(320.0),
                rate_12mo_avg: Some(average),
                price_yoy_change: Some(3.2),
                snapshot_date: Utc::now(),
            },
        }
    }
}
