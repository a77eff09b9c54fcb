//! Reduce final votes to a consensus

use super::FinalVote;
use crate::models::Stance;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StanceCount {
    pub stance: Stance,
    pub votes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusResult {
    pub majority: Stance,
    /// Share of voters backing the majority, 0-100
    pub consensus_strength: f64,
    pub average_confidence: f64,
    pub voters: usize,
    /// Tally in first-seen order
    pub vote_counts: Vec<StanceCount>,
}

impl ConsensusResult {
    /// Recommendation text persisted with the debate
    pub fn recommendation(&self) -> String {
        format!(
            "{} ({:.1}% consensus, {:.1}% avg confidence)",
            self.majority, self.consensus_strength, self.average_confidence
        )
    }
}

/// Tally votes and pick the majority.
///
/// Stances are counted in the order they are first seen, which is role
/// order. On equal counts the earliest-seen stance wins, so a 1-1-1 split
/// goes to the first speaker's vote.
pub fn aggregate(votes: &[FinalVote]) -> Option<ConsensusResult> {
    if votes.is_empty() {
        return None;
    }

    let mut tally: Vec<StanceCount> = Vec::with_capacity(3);
    for vote in votes {
        match tally.iter_mut().find(|c| c.stance == vote.stance) {
            Some(count) => count.votes += 1,
            None => tally.push(StanceCount {
                stance: vote.stance,
                votes: 1,
            }),
        }
    }

    let mut majority = &tally[0];
    for count in &tally[1..] {
        if count.votes > majority.votes {
            majority = count;
        }
    }

    let voters = votes.len();
    let consensus_strength = majority.votes as f64 / voters as f64 * 100.0;
    let average_confidence = votes.iter().map(|v| v.confidence).sum::<f64>() / voters as f64;

    Some(ConsensusResult {
        majority: majority.stance,
        consensus_strength,
        average_confidence,
        voters,
        vote_counts: tally.clone(),
    })
}
