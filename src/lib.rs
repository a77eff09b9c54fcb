//! Mortgage Research Agent
//!
//! Researches US 30-year mortgage rates against the US home price index:
//! - Plans which data fetches and analyses must re-run from knowledge freshness
//! - Runs a three-round debate between fixed analyst roles and aggregates a consensus
//! - Persists debates, validates them against later rates and learns patterns
//! - Feeds the best learned patterns back into future debate prompts
//!
//! LOOP:
//! PLAN → DISPATCH → DEBATE → CONSENSUS → PERSIST → VALIDATE → LESSONS

pub mod actions;
pub mod agent;
pub mod analysis;
pub mod api;
pub mod audit;
pub mod config;
pub mod debate;
pub mod error;
pub mod gemini;
pub mod knowledge;
pub mod learning;
pub mod llm;
pub mod models;
pub mod parsing;
pub mod planner;
pub mod session;
pub mod sources;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ResearchError, Result};

// Re-export common types
pub use models::*;
