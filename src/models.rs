//! Core data models for the research agent

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

/// Predicted direction of the mortgage market.
///
/// BULLISH means rates are expected to fall, BEARISH that they rise or stay
/// high.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stance {
    Bullish,
    Bearish,
    Neutral,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Bullish => "BULLISH",
            Stance::Bearish => "BEARISH",
            Stance::Neutral => "NEUTRAL",
        }
    }

    /// Classifies free text by keyword, bullish checked first.
    pub fn from_text(text: &str) -> Stance {
        let lowered = text.to_lowercase();
        if lowered.contains("bullish") {
            Stance::Bullish
        } else if lowered.contains("bearish") {
            Stance::Bearish
        } else {
            Stance::Neutral
        }
    }

    /// Signal used when blending a learned pattern into a recommendation.
    pub fn signal(&self) -> f64 {
        match self {
            Stance::Bullish => 1.0,
            Stance::Bearish => -1.0,
            Stance::Neutral => 0.0,
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remote series the agent knows how to fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SeriesId {
    MortgageRates,
    HomePrices,
}

impl SeriesId {
    /// FRED series code
    pub fn fred_code(&self) -> &'static str {
        match self {
            SeriesId::MortgageRates => "MORTGAGE30US",
            SeriesId::HomePrices => "CSUSHPINSA",
        }
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeriesId::MortgageRates => "mortgage_rates",
            SeriesId::HomePrices => "home_prices",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Series =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

//
// ================= Derived facts =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateInsights {
    pub latest_rate: f64,
    pub prior_rate: f64,
    pub avg_12_month: f64,
    pub trend_signal: String,
}

/// Rate analysis, or the explicit placeholder stored when no usable rate
/// data exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RateAnalysis {
    Computed(RateInsights),
    Unavailable { reason: String },
}

impl RateAnalysis {
    pub fn insights(&self) -> Option<&RateInsights> {
        match self {
            RateAnalysis::Computed(insights) => Some(insights),
            RateAnalysis::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Rising,
    Falling,
}

impl fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriceDirection::Rising => "rising",
            PriceDirection::Falling => "falling",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceComparison {
    pub latest_price_index: f64,
    pub year_ago_price_index: f64,
    pub price_yoy_change_pct: f64,
    pub direction: PriceDirection,
}

impl fmt::Display for PriceComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Home prices are {} year-over-year (latest index: {:.1}).",
            self.direction, self.latest_price_index
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Comparison {
    Computed(PriceComparison),
    Unavailable { reason: String },
}

impl Comparison {
    pub fn computed(&self) -> Option<&PriceComparison> {
        match self {
            Comparison::Computed(c) => Some(c),
            Comparison::Unavailable { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Comparison::Computed(c) => c.to_string(),
            Comparison::Unavailable { reason } => {
                format!("No price comparison available ({}).", reason)
            }
        }
    }
}

//
// ================= Recommendation =================
//

/// Market-dominated recommendation produced outside the debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendedRecommendation {
    pub recommendation: Stance,
    pub score: f64,
    pub market_signal: f64,
    pub pattern_signal: f64,
    pub market_weight: f64,
    pub pattern_weight: f64,
    pub pattern_used: Option<String>,
    pub created_at: DateTime<Utc>,
}
