//! Validation scoring and pattern classification
//!
//! Pure functions shared by every store backend, so the in-memory and SQLite
//! stores score identically.

use super::{LearnedPattern, MarketSnapshot, ValidationStatus};
use crate::models::Stance;
use serde::{Deserialize, Serialize};
use std::fmt;

/// |pct change| below which a NEUTRAL call counts as correct
const NEUTRAL_BAND_PCT: f64 = 5.0;
const NEUTRAL_ACCURACY: f64 = 50.0;
/// Accuracy points per percent of rate movement in the predicted direction
const ACCURACY_PER_PCT: f64 = 20.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrendCondition {
    Increasing,
    Decreasing,
}

impl TrendCondition {
    /// Rates above their trailing average count as increasing.
    pub fn from_levels(rate: f64, average: f64) -> Self {
        if rate > average {
            TrendCondition::Increasing
        } else {
            TrendCondition::Decreasing
        }
    }

    /// Trend recorded with a stored snapshot; a missing average compares the
    /// rate with itself.
    pub fn from_snapshot(snapshot: &MarketSnapshot) -> Option<Self> {
        let rate = snapshot.mortgage_rate?;
        let average = snapshot.rate_12mo_avg.unwrap_or(rate);
        Some(Self::from_levels(rate, average))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendCondition::Increasing => "increasing",
            TrendCondition::Decreasing => "decreasing",
        }
    }

    /// Key stored alongside the prediction type
    pub fn condition_description(&self) -> String {
        format!("Market condition: rates {}", self.as_str())
    }

    pub fn pattern_description(&self, prediction: Stance) -> String {
        format!("{} prediction when {}", prediction, self.as_str())
    }
}

impl fmt::Display for TrendCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rates {}", self.as_str())
    }
}

/// Predicted stance of a stored recommendation, bearish checked first.
pub fn prediction_from_recommendation(recommendation: &str) -> Stance {
    let lowered = recommendation.to_lowercase();
    if lowered.contains("bearish") {
        Stance::Bearish
    } else if lowered.contains("bullish") {
        Stance::Bullish
    } else {
        Stance::Neutral
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub status: ValidationStatus,
    pub accuracy: f64,
    pub rate_change: f64,
    pub rate_change_pct: f64,
}

/// Score a prediction against the observed rate. `None` when the baseline
/// cannot anchor a percentage change.
pub fn score_prediction(prediction: Stance, baseline: f64, observed: f64) -> Option<Score> {
    if !baseline.is_finite() || baseline == 0.0 || !observed.is_finite() {
        return None;
    }

    let rate_change = observed - baseline;
    let rate_change_pct = rate_change / baseline * 100.0;
    let directional = (rate_change_pct.abs() * ACCURACY_PER_PCT).min(100.0);

    let (correct, accuracy) = match prediction {
        Stance::Bearish if rate_change >= 0.0 => (true, directional),
        Stance::Bullish if rate_change < 0.0 => (true, directional),
        Stance::Bearish | Stance::Bullish => (false, 0.0),
        Stance::Neutral if rate_change_pct.abs() < NEUTRAL_BAND_PCT => (true, NEUTRAL_ACCURACY),
        Stance::Neutral => (false, 0.0),
    };

    Some(Score {
        status: if correct {
            ValidationStatus::Correct
        } else {
            ValidationStatus::Incorrect
        },
        accuracy,
        rate_change,
        rate_change_pct,
    })
}

/// Incremental mean: `(old * n + x) / (n + 1)`
pub fn fold_accuracy(mean: f64, observations: i64, accuracy: f64) -> f64 {
    (mean * observations as f64 + accuracy) / (observations + 1) as f64
}

/// Accuracy descending, then observation count descending.
pub fn rank_patterns(patterns: &mut [LearnedPattern]) {
    patterns.sort_by(|a, b| {
        b.accuracy
            .total_cmp(&a.accuracy)
            .then(b.observations.cmp(&a.observations))
    });
}

pub fn render_digest(patterns: &[LearnedPattern]) -> String {
    if patterns.is_empty() {
        return String::new();
    }

    let mut digest = String::from("\n### Historical Lessons Learned:\n");
    for (i, p) in patterns.iter().enumerate() {
        digest.push_str(&format!(
            "{}. {} — accuracy {:.1}% over {} debates — condition: {}\n",
            i + 1,
            p.description,
            p.accuracy,
            p.observations,
            p.condition
        ));
    }
    digest
}
