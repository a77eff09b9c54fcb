//! Blends the live market signal with the best matching learned pattern.
//!
//! The market always dominates: a pattern contributes at most a quarter of
//! the score, scaled down by its historical accuracy.

use super::{LearnedPattern, TrendCondition};
use crate::models::{BlendedRecommendation, RateInsights, Stance};
use chrono::Utc;

const MAX_PATTERN_WEIGHT: f64 = 0.25;
const DECISION_BAND: f64 = 0.1;

/// First pattern (in ranked order) recorded under the current trend.
pub fn pick_pattern<'a>(
    patterns: &'a [LearnedPattern],
    insights: &RateInsights,
) -> Option<&'a LearnedPattern> {
    let condition =
        TrendCondition::from_levels(insights.latest_rate, insights.avg_12_month).condition_description();
    patterns.iter().find(|p| p.condition == condition)
}

pub fn blend(insights: &RateInsights, pattern: Option<&LearnedPattern>) -> BlendedRecommendation {
    let market_signal = if insights.latest_rate < insights.avg_12_month {
        1.0
    } else {
        -1.0
    };

    let (pattern_weight, pattern_signal) = match pattern {
        Some(p) => (
            (p.accuracy / 100.0 * MAX_PATTERN_WEIGHT).clamp(0.0, MAX_PATTERN_WEIGHT),
            p.prediction.signal(),
        ),
        None => (0.0, 0.0),
    };
    let market_weight = 1.0 - pattern_weight;

    let score = market_weight * market_signal + pattern_weight * pattern_signal;
    let recommendation = if score > DECISION_BAND {
        Stance::Bullish
    } else if score < -DECISION_BAND {
        Stance::Bearish
    } else {
        Stance::Neutral
    };

    BlendedRecommendation {
        recommendation,
        score,
        market_signal,
        pattern_signal,
        market_weight,
        pattern_weight,
        pattern_used: pattern.map(|p| p.description.clone()),
        created_at: Utc::now(),
    }
}
