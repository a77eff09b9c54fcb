//! Scripted collaborators for unit tests

use crate::error::ResearchError;
use crate::llm::TextGenerator;
use crate::models::{SeriesId, SeriesPoint};
use crate::sources::SeriesSource;
use crate::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Replies in order; fails once the script is exhausted.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails.
    pub fn failing() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn push_error(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _max_output_tokens: u32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ResearchError::LlmError(message)),
            None => Err(ResearchError::LlmError("script exhausted".to_string())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Serves fixed series; a series without data fails to fetch.
#[derive(Default)]
pub struct StaticSource {
    series: Mutex<HashMap<SeriesId, Vec<SeriesPoint>>>,
    calls: Mutex<Vec<SeriesId>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: SeriesId, values: &[f64]) -> Self {
        self.set(id, values);
        self
    }

    pub fn set(&self, id: SeriesId, values: &[f64]) {
        self.series.lock().unwrap().insert(id, weekly(values));
    }

    pub fn remove(&self, id: SeriesId) {
        self.series.lock().unwrap().remove(&id);
    }

    pub fn calls(&self) -> Vec<SeriesId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SeriesSource for StaticSource {
    async fn fetch(&self, series: SeriesId) -> Result<Vec<SeriesPoint>> {
        self.calls.lock().unwrap().push(series);
        self.series
            .lock()
            .unwrap()
            .get(&series)
            .cloned()
            .ok_or_else(|| ResearchError::FetchError(format!("{} unavailable", series)))
    }
}

/// Weekly points starting 2023-01-05.
pub fn weekly(values: &[f64]) -> Vec<SeriesPoint> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 5).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| SeriesPoint::new(start + Duration::weeks(i as i64), *v))
        .collect()
}
