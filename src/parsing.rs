//! Parsers for generated text
//!
//! Every parser here returns a usable value on malformed input; callers
//! never see a parse error from free-form model output.

use crate::models::Stance;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

pub const DEFAULT_OPENING_CONFIDENCE: f64 = 70.0;
pub const DEFAULT_VOTE_CONFIDENCE: f64 = 50.0;

fn opening_confidence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*%\s*confidence").expect("valid regex"))
}

fn vote_confidence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)CONFIDENCE:\s*(\d+)").expect("valid regex"))
}

fn vote_reasoning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)REASONING:\s*(.*)").expect("valid regex"))
}

fn json_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Confidence stated as "NN% confidence" in an opening position.
pub fn parse_opening_confidence(text: &str) -> f64 {
    if !text.to_lowercase().contains("confidence") {
        return DEFAULT_OPENING_CONFIDENCE;
    }

    opening_confidence_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(clamp_percent)
        .unwrap_or(DEFAULT_OPENING_CONFIDENCE)
}

/// Stance from a final vote, searched over the whole reply. BULLISH wins
/// when both words appear.
pub fn parse_vote_stance(text: &str) -> Stance {
    let upper = text.to_uppercase();
    if upper.contains("BULLISH") {
        Stance::Bullish
    } else if upper.contains("BEARISH") {
        Stance::Bearish
    } else {
        Stance::Neutral
    }
}

pub fn parse_vote_confidence(text: &str) -> f64 {
    vote_confidence_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(clamp_percent)
        .unwrap_or(DEFAULT_VOTE_CONFIDENCE)
}

/// Text after `REASONING:`, or the whole reply when the marker is missing.
pub fn parse_vote_reasoning(text: &str) -> String {
    vote_reasoning_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim()
        .to_string()
}

/// Reply expected from the advisory planner
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AdvisoryReply {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Pull the outermost `{...}` block out of a reply (models like to wrap JSON
/// in prose or code fences) and decode it.
pub fn parse_advisory_reply(text: &str) -> std::result::Result<AdvisoryReply, String> {
    let json = json_object_re()
        .find(text)
        .map(|m| m.as_str())
        .ok_or_else(|| "no JSON object in reply".to_string())?;

    serde_json::from_str::<AdvisoryReply>(json).map_err(|e| format!("malformed plan JSON: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_confidence_parsed() {
        let text = "Rates look sticky. I hold this view with 85% confidence.";
        assert_eq!(parse_opening_confidence(text), 85.0);
    }

    #[test]
    fn test_opening_confidence_default() {
        assert_eq!(parse_opening_confidence("Rates will fall."), 70.0);
        // the word appears but not in the "NN% confidence" shape
        assert_eq!(parse_opening_confidence("Confidence: high"), 70.0);
    }

    #[test]
    fn test_vote_parsing() {
        let text = "VOTE: bearish\nCONFIDENCE: 80\nREASONING: Inflation is sticky.";
        assert_eq!(parse_vote_stance(text), Stance::Bearish);
        assert_eq!(parse_vote_confidence(text), 80.0);
        assert_eq!(parse_vote_reasoning(text), "Inflation is sticky.");
    }

    #[test]
    fn test_vote_stance_searches_whole_reply() {
        assert_eq!(
            parse_vote_stance("My final vote is Bearish.\nCONFIDENCE: 60"),
            Stance::Bearish
        );
        assert_eq!(
            parse_vote_stance("VOTE: BEARISH\nREASONING: the bullish case is weaker"),
            Stance::Bullish
        );
        assert_eq!(parse_vote_stance("VOTE: NEUTRAL"), Stance::Neutral);
    }

    #[test]
    fn test_vote_defaults() {
        let text = "I am undecided.";
        assert_eq!(parse_vote_stance(text), Stance::Neutral);
        assert_eq!(parse_vote_confidence(text), 50.0);
        assert_eq!(parse_vote_reasoning(text), "I am undecided.");
    }

    #[test]
    fn test_vote_confidence_clamped() {
        assert_eq!(parse_vote_confidence("CONFIDENCE: 250"), 100.0);
    }

    #[test]
    fn test_advisory_reply_in_prose() {
        let text = "Sure!\n```json\n{\"actions\": [\"fetch_mortgage_rates\"], \"reasoning\": \"stale\"}\n```";
        let reply = parse_advisory_reply(text).unwrap();
        assert_eq!(reply.actions, vec!["fetch_mortgage_rates".to_string()]);
        assert_eq!(reply.reasoning, "stale");
    }

    #[test]
    fn test_advisory_reply_malformed() {
        assert!(parse_advisory_reply("no plan today").is_err());
        assert!(parse_advisory_reply("{actions: oops}").is_err());
    }
}
