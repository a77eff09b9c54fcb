//! Prompt builders for each debate round
//!
//! The lessons digest from the pattern store is appended to every prompt so
//! past validation results can shift the panel's reasoning.

use super::Role;
use crate::analysis::recent_rate_trend;
use crate::knowledge::KnowledgeCache;
use crate::models::SeriesId;

/// Market facts quoted to the panel
#[derive(Debug, Clone)]
pub struct MarketFacts {
    pub latest_rate: String,
    pub avg_12_month: String,
    pub trend_signal: String,
    pub recent_direction: &'static str,
    pub recent_volatility: &'static str,
    pub housing: String,
}

impl MarketFacts {
    /// None until a rate analysis (computed or placeholder) exists.
    pub fn from_cache(cache: &KnowledgeCache) -> Option<Self> {
        let analysis = cache.rate_analysis()?;
        let insights = analysis.insights();

        let (recent_direction, recent_volatility) = cache
            .series(SeriesId::MortgageRates)
            .map(recent_rate_trend)
            .unwrap_or(("unknown", "unknown"));

        Some(Self {
            latest_rate: insights
                .map(|i| format!("{:.2}", i.latest_rate))
                .unwrap_or_else(|| "N/A".to_string()),
            avg_12_month: insights
                .map(|i| format!("{:.2}", i.avg_12_month))
                .unwrap_or_else(|| "N/A".to_string()),
            trend_signal: insights
                .map(|i| i.trend_signal.clone())
                .unwrap_or_else(|| "N/A".to_string()),
            recent_direction,
            recent_volatility,
            housing: cache
                .comparison()
                .map(|c| c.describe())
                .unwrap_or_else(|| "No price comparison available".to_string()),
        })
    }

    pub fn render(&self) -> String {
        format!(
            "## Mortgage Rate Data:\n\
             - Current 30-year rate: {}%\n\
             - 12-month average: {}%\n\
             - Trend signal: {}\n\
             - Recent trend: {} ({})\n\n\
             ## Housing Market Data:\n\
             - {}",
            self.latest_rate,
            self.avg_12_month,
            self.trend_signal,
            self.recent_direction,
            self.recent_volatility,
            self.housing
        )
    }
}

fn preamble(role: Role) -> String {
    format!(
        "You are the {} on a three-member mortgage research panel (Planner, Market Analyst, Risk Officer).\n{}",
        role.name(),
        role.framing()
    )
}

fn with_lessons(body: String, lessons: &str) -> String {
    if lessons.trim().is_empty() {
        body
    } else {
        format!("{}\n{}", body, lessons)
    }
}

pub fn opening_position(role: Role, facts: &MarketFacts, lessons: &str) -> String {
    let body = format!(
        "{}\n\n{}\n\n\
         ROUND 1 - INITIAL POSITION\n\
         State your position on where 30-year mortgage rates are heading over the next 30 days:\n\
         BULLISH (rates fall), BEARISH (rates rise or stay high) or NEUTRAL.\n\
         Give 2-3 supporting points from the data above.\n\
         End with the sentence \"I hold this view with NN% confidence.\"",
        preamble(role),
        facts.render()
    );
    with_lessons(body, lessons)
}

pub fn cross_examination(
    role: Role,
    own_position: &str,
    peers: &[(Role, &str)],
    lessons: &str,
) -> String {
    let peer_block = peers
        .iter()
        .map(|(peer, text)| format!("### {} said:\n{}", peer.name(), text))
        .collect::<Vec<_>>()
        .join("\n\n");

    let body = format!(
        "{}\n\n\
         ROUND 2 - CROSS-EXAMINATION\n\
         Your Round 1 position:\n{}\n\n\
         The other panelists said:\n\n{}\n\n\
         In 3-4 sentences, either challenge OR support exactly one specific point made by \
         another panelist, naming them. You may revise your stance or confidence if their \
         argument changed your mind; say so explicitly if it did.",
        preamble(role),
        own_position,
        peer_block
    );
    with_lessons(body, lessons)
}

pub fn final_vote(role: Role, own_position: &str, own_response: &str, lessons: &str) -> String {
    let body = format!(
        "{}\n\n\
         ROUND 3 - FINAL VOTE\n\
         Your Round 1 position:\n{}\n\n\
         Your Round 2 cross-examination:\n{}\n\n\
         Cast your final vote. Reply in exactly this format:\n\
         VOTE: <BULLISH|BEARISH|NEUTRAL>\n\
         CONFIDENCE: <0-100>\n\
         REASONING: <one or two sentences>",
        preamble(role),
        own_position,
        own_response
    );
    with_lessons(body, lessons)
}

/// Standalone per-role perspective outside the debate
pub fn perspective(role: Role, facts: &MarketFacts) -> String {
    format!(
        "{}\n\n{}\n\n\
         From your role's point of view, give one concise perspective (3-4 sentences) \
         on what this data means for homebuyers right now.",
        preamble(role),
        facts.render()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> MarketFacts {
        MarketFacts {
            latest_rate: "6.50".to_string(),
            avg_12_month: "6.80".to_string(),
            trend_signal: "Rates Cooling".to_string(),
            recent_direction: "falling",
            recent_volatility: "stable",
            housing: "Home prices are rising year-over-year (latest index: 320.1).".to_string(),
        }
    }

    #[test]
    fn test_opening_includes_facts_and_lessons() {
        let lessons = "\n### Historical Lessons Learned:\n1. BULLISH prediction when decreasing";
        let prompt = opening_position(Role::MarketAnalyst, &facts(), lessons);
        assert!(prompt.contains("Market Analyst"));
        assert!(prompt.contains("Current 30-year rate: 6.50%"));
        assert!(prompt.contains("Historical Lessons Learned"));
        assert!(prompt.contains("% confidence"));
    }

    #[test]
    fn test_cross_examination_quotes_peers_verbatim() {
        let prompt = cross_examination(
            Role::Planner,
            "Rates will ease.",
            &[
                (Role::MarketAnalyst, "Momentum is down."),
                (Role::RiskOfficer, "Inflation could surprise."),
            ],
            "",
        );
        assert!(prompt.contains("### Market Analyst said:\nMomentum is down."));
        assert!(prompt.contains("### Risk Officer said:\nInflation could surprise."));
        assert!(!prompt.contains("Historical Lessons"));
    }

    #[test]
    fn test_final_vote_demands_format() {
        let prompt = final_vote(Role::RiskOfficer, "a", "b", "");
        assert!(prompt.contains("VOTE: <BULLISH|BEARISH|NEUTRAL>"));
        assert!(prompt.contains("CONFIDENCE: <0-100>"));
        assert!(prompt.contains("REASONING:"));
    }
}
