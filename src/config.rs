//! Runtime settings loaded from the environment

use crate::error::ResearchError;
use crate::Result;
use std::env;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://agent_debates.db";
pub const DEFAULT_FRED_BASE_URL: &str = "https://fred.stlouisfed.org/graph/fredgraph.csv";

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub database_url: String,
    pub fred_base_url: String,
    /// Age after which a fetched series is considered stale
    pub cache_validity_hours: i64,
    /// Rate move (percentage points) that justifies refetching home prices
    pub rate_change_threshold: f64,
    /// USD per million prompt tokens
    pub input_cost_per_mtok: f64,
    /// USD per million generated tokens
    pub output_cost_per_mtok: f64,
    pub api_port: u16,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            fred_base_url: DEFAULT_FRED_BASE_URL.to_string(),
            cache_validity_hours: 24,
            rate_change_threshold: 0.25,
            input_cost_per_mtok: 0.10,
            output_cost_per_mtok: 0.40,
            api_port: 8080,
        }
    }
}

impl AgentSettings {
    /// Read settings from environment variables, keeping defaults for
    /// anything unset. Call `dotenv::dotenv()` beforehand to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let api_port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => parse_value("PORT", &raw)?,
            Err(_) => defaults.api_port,
        };

        Ok(Self {
            gemini_api_key,
            model: env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            fred_base_url: env::var("FRED_BASE_URL").unwrap_or(defaults.fred_base_url),
            cache_validity_hours: env_or("CACHE_VALIDITY_HOURS", defaults.cache_validity_hours)?,
            rate_change_threshold: env_or("RATE_CHANGE_THRESHOLD", defaults.rate_change_threshold)?,
            input_cost_per_mtok: env_or("LLM_INPUT_COST_PER_MTOK", defaults.input_cost_per_mtok)?,
            output_cost_per_mtok: env_or("LLM_OUTPUT_COST_PER_MTOK", defaults.output_cost_per_mtok)?,
            api_port,
        })
    }

    /// Advisory planning and LLM summaries need an API key.
    pub fn llm_enabled(&self) -> bool {
        self.gemini_api_key.is_some()
    }

    /// Estimated USD cost of one generation call.
    pub fn estimate_cost(&self, prompt_tokens: usize, output_tokens: usize) -> f64 {
        (prompt_tokens as f64 * self.input_cost_per_mtok
            + output_tokens as f64 * self.output_cost_per_mtok)
            / 1_000_000.0
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        ResearchError::ConfigError(format!("{} has an invalid value: {:?}", name, raw))
    })
}

/// Approximate token count (4 characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}
