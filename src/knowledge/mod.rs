//! Session knowledge cache
//!
//! Holds every fact the agent has fetched or derived during one session,
//! plus the fetch timestamps used for freshness decisions. The cache has no
//! logic beyond presence and freshness queries; it only enforces that a
//! derived fact never exists without the facts it was derived from.

use crate::debate::{DebateRecord, Role};
use crate::error::ResearchError;
use crate::models::{Comparison, RateAnalysis, SeriesId, SeriesPoint};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keys of the facts the cache can hold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactKey {
    MortgageRates,
    HomePrices,
    RateInsights,
    Comparison,
    Summary,
    RoleInsights,
    DebateRounds,
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactKey::MortgageRates => "mortgage_rates",
            FactKey::HomePrices => "home_prices",
            FactKey::RateInsights => "rate_insights",
            FactKey::Comparison => "comparison",
            FactKey::Summary => "summary",
            FactKey::RoleInsights => "role_insights",
            FactKey::DebateRounds => "debate_rounds",
        };
        write!(f, "{}", s)
    }
}

impl From<SeriesId> for FactKey {
    fn from(id: SeriesId) -> Self {
        match id {
            SeriesId::MortgageRates => FactKey::MortgageRates,
            SeriesId::HomePrices => FactKey::HomePrices,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolePerspective {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeCache {
    mortgage_rates: Option<Vec<SeriesPoint>>,
    home_prices: Option<Vec<SeriesPoint>>,
    rate_analysis: Option<RateAnalysis>,
    comparison: Option<Comparison>,
    summary: Option<String>,
    role_insights: Option<Vec<RolePerspective>>,
    debate: DebateRecord,
    fetched_at: BTreeMap<SeriesId, DateTime<Utc>>,
}

impl KnowledgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: FactKey) -> bool {
        match key {
            FactKey::MortgageRates => self.mortgage_rates.is_some(),
            FactKey::HomePrices => self.home_prices.is_some(),
            FactKey::RateInsights => self.rate_analysis.is_some(),
            FactKey::Comparison => self.comparison.is_some(),
            FactKey::Summary => self.summary.is_some(),
            FactKey::RoleInsights => self.role_insights.is_some(),
            FactKey::DebateRounds => self.debate.opening.is_some(),
        }
    }

    // =============================
    // Raw series
    // =============================

    pub fn series(&self, id: SeriesId) -> Option<&[SeriesPoint]> {
        match id {
            SeriesId::MortgageRates => self.mortgage_rates.as_deref(),
            SeriesId::HomePrices => self.home_prices.as_deref(),
        }
    }

    /// Store a freshly fetched series, sorted by date, and stamp its fetch time.
    pub fn store_series(
        &mut self,
        id: SeriesId,
        mut points: Vec<SeriesPoint>,
        fetched_at: DateTime<Utc>,
    ) {
        points.sort_by_key(|p| p.date);
        match id {
            SeriesId::MortgageRates => self.mortgage_rates = Some(points),
            SeriesId::HomePrices => self.home_prices = Some(points),
        }
        self.fetched_at.insert(id, fetched_at);
    }

    pub fn mark_fetched(&mut self, id: SeriesId, at: DateTime<Utc>) {
        self.fetched_at.insert(id, at);
    }

    pub fn fetched_at(&self, id: SeriesId) -> Option<DateTime<Utc>> {
        self.fetched_at.get(&id).copied()
    }

    /// A series with no recorded fetch time is always stale.
    pub fn is_stale(&self, id: SeriesId, now: DateTime<Utc>, validity: Duration) -> bool {
        match self.fetched_at(id) {
            Some(at) => now - at > validity,
            None => true,
        }
    }

    // =============================
    // Derived facts
    // =============================

    pub fn rate_analysis(&self) -> Option<&RateAnalysis> {
        self.rate_analysis.as_ref()
    }

    pub fn set_rate_analysis(&mut self, analysis: RateAnalysis) -> Result<()> {
        if matches!(analysis, RateAnalysis::Computed(_)) {
            self.require(FactKey::RateInsights, &[FactKey::MortgageRates])?;
        }
        self.rate_analysis = Some(analysis);
        Ok(())
    }

    pub fn comparison(&self) -> Option<&Comparison> {
        self.comparison.as_ref()
    }

    pub fn set_comparison(&mut self, comparison: Comparison) -> Result<()> {
        if matches!(comparison, Comparison::Computed(_)) {
            self.require(
                FactKey::Comparison,
                &[FactKey::MortgageRates, FactKey::HomePrices],
            )?;
        }
        self.comparison = Some(comparison);
        Ok(())
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: String) -> Result<()> {
        self.require(
            FactKey::Summary,
            &[FactKey::RateInsights, FactKey::Comparison],
        )?;
        self.summary = Some(summary);
        Ok(())
    }

    pub fn role_insights(&self) -> Option<&[RolePerspective]> {
        self.role_insights.as_deref()
    }

    pub fn set_role_insights(&mut self, insights: Vec<RolePerspective>) -> Result<()> {
        self.require(FactKey::RoleInsights, &[FactKey::RateInsights])?;
        self.role_insights = Some(insights);
        Ok(())
    }

    pub fn debate(&self) -> &DebateRecord {
        &self.debate
    }

    pub(crate) fn debate_mut(&mut self) -> &mut DebateRecord {
        &mut self.debate
    }

    fn require(&self, derived: FactKey, dependencies: &[FactKey]) -> Result<()> {
        let missing: Vec<String> = dependencies
            .iter()
            .filter(|dep| !self.has(**dep))
            .map(|dep| dep.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ResearchError::InvariantViolation(format!(
                "{} requires {}",
                derived,
                missing.join(", ")
            )))
        }
    }

    // =============================
    // Rendering
    // =============================

    /// Human-readable snapshot of what the session knows, used as planner
    /// context.
    pub fn state_summary(&self) -> String {
        let mut lines = Vec::new();

        match self.series(SeriesId::MortgageRates) {
            Some(points) => {
                let latest = points
                    .last()
                    .map(|p| format!("{:.2}%", p.value))
                    .unwrap_or_else(|| "n/a".to_string());
                lines.push(format!(
                    "- Mortgage rates: {} data points, latest: {}",
                    points.len(),
                    latest
                ));
                lines.push(format!(
                    "  Last fetched: {}",
                    self.fetched_label(SeriesId::MortgageRates)
                ));
            }
            None => lines.push("- Mortgage rates: NOT LOADED".to_string()),
        }

        match self.rate_analysis() {
            Some(RateAnalysis::Computed(i)) => lines.push(format!(
                "- Rate insights: {} (12mo avg: {:.2}%)",
                i.trend_signal, i.avg_12_month
            )),
            Some(RateAnalysis::Unavailable { reason }) => {
                lines.push(format!("- Rate insights: UNAVAILABLE ({})", reason))
            }
            None => lines.push("- Rate insights: NOT ANALYZED".to_string()),
        }

        match self.series(SeriesId::HomePrices) {
            Some(points) => {
                let latest = points
                    .last()
                    .map(|p| format!("{:.1}", p.value))
                    .unwrap_or_else(|| "n/a".to_string());
                lines.push(format!(
                    "- Home prices: {} data points, latest: {}",
                    points.len(),
                    latest
                ));
                lines.push(format!(
                    "  Last fetched: {}",
                    self.fetched_label(SeriesId::HomePrices)
                ));
            }
            None => lines.push("- Home prices: NOT LOADED".to_string()),
        }

        match self.comparison() {
            Some(c) => lines.push(format!("- Comparison: {}", c.describe())),
            None => lines.push("- Comparison: NOT DONE".to_string()),
        }

        lines.join("\n")
    }

    fn fetched_label(&self, id: SeriesId) -> String {
        self.fetched_at(id)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string())
    }
}
