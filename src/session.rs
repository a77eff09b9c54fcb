//! One research session: knowledge, decision trace and collaborators

use crate::audit::DecisionLog;
use crate::config::AgentSettings;
use crate::knowledge::KnowledgeCache;
use crate::llm::TextGenerator;
use crate::sources::SeriesSource;
use std::sync::Arc;
use uuid::Uuid;

pub struct ResearchSession {
    id: Uuid,
    pub(crate) cache: KnowledgeCache,
    pub(crate) log: DecisionLog,
    source: Arc<dyn SeriesSource>,
    generator: Option<Arc<dyn TextGenerator>>,
    settings: AgentSettings,
}

impl ResearchSession {
    pub fn new(source: Arc<dyn SeriesSource>, settings: AgentSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            cache: KnowledgeCache::new(),
            log: DecisionLog::new(),
            source,
            generator: None,
            settings,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache(&self) -> &KnowledgeCache {
        &self.cache
    }

    pub fn log(&self) -> &DecisionLog {
        &self.log
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn source(&self) -> Arc<dyn SeriesSource> {
        self.source.clone()
    }

    pub fn generator(&self) -> Option<Arc<dyn TextGenerator>> {
        self.generator.clone()
    }

    /// Mutable access to cache and log at once, for the debate engine.
    pub(crate) fn split_mut(&mut self) -> (&mut KnowledgeCache, &mut DecisionLog) {
        (&mut self.cache, &mut self.log)
    }

    /// Replace the cache wholesale, used to roll back an aborted plan.
    pub(crate) fn restore_cache(&mut self, snapshot: KnowledgeCache) {
        self.cache = snapshot;
    }
}
