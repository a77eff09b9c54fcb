//! Decision trace and knowledge fingerprints
//!
//! Every planner gate, dispatched action and debate step is recorded here
//! with a timestamp, and mirrored to `tracing`. The log keeps the newest
//! `MAX_LOG_ENTRIES`; `tracing` still sees everything.

use crate::debate::Role;
use crate::knowledge::KnowledgeCache;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::Write;
use tracing::info;

pub const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Session-scoped decision trace
#[derive(Debug, Clone, Default)]
pub struct DecisionLog {
    entries: VecDeque<LogEntry>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "decision_log", "{}", message);
        if self.entries.len() == MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent `count` entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .skip(self.entries.len().saturating_sub(count))
            .collect()
    }

    /// Entries about model-driven decisions
    pub fn llm_entries(&self) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.message.contains("LLM"))
            .collect()
    }

    /// Entries produced by a panel role
    pub fn role_entries(&self) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| Role::ALL.iter().any(|r| e.message.contains(r.tag())))
            .collect()
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(LogEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// SHA-256 of the serialized knowledge cache, so a plan can be tied to the
/// exact state it was derived from.
/// Streams JSON straight into the hasher.
pub fn knowledge_fingerprint(cache: &KnowledgeCache) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), cache).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
