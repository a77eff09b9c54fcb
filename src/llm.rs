//! Text-generation capability
//!
//! The agent only needs "prompt in, text out, may fail". Independent calls
//! carry no ordering guarantee; callers sequence them.

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion of at most `max_output_tokens` tokens.
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String>;

    /// Model identifier, for logs
    fn model_name(&self) -> &str;
}
