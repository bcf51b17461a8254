// SPDX-License-Identifier: MIT

//! Story engine
//!
//! Owns every story's latest snapshot and hands them to the orchestrator one
//! run at a time. Stories are independent: each has its own slot, its own
//! stop signal and its own knowledge key prefix.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::adk::error::{ConfigError, QuillError};
use crate::adk::knowledge::KnowledgeStore;
use crate::quill::workflow::graph::{Orchestrator, RunReport, StopSignal};
use crate::quill::workflow::state::{
    HierarchicalPhase, ProgressSnapshot, ReviewStatus, StoryStatus, WorkPhase, WorkflowState,
};

/// Opaque reference to a story owned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StateHandle(Uuid);

impl StateHandle {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Initial content for a new story
#[derive(Debug, Clone, Default)]
pub struct StorySeed {
    pub title: String,
    pub outline: Map<String, Value>,
    pub characters: Map<String, Value>,
    pub world_details: Map<String, Value>,
    pub notes: Vec<String>,
}

impl StorySeed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Point-in-time summary of a story
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    pub story_id: Uuid,
    pub title: String,
    pub hierarchical_phase: HierarchicalPhase,
    pub work_phase: WorkPhase,
    pub story_status: StoryStatus,
    pub progress: ProgressSnapshot,
    pub is_running: bool,
    pub iteration_count: u32,
    pub error_count: u32,
    pub completed_chapters: usize,
    pub last_error: Option<String>,
}

impl StatusReport {
    pub fn of(state: &WorkflowState, is_running: bool) -> Self {
        Self {
            story_id: state.story_id,
            title: state.title.clone(),
            hierarchical_phase: state.current_hierarchical_phase,
            work_phase: state.current_phase,
            story_status: state.story_status,
            progress: state.progress(),
            is_running,
            iteration_count: state.iteration_count,
            error_count: state.error_count,
            completed_chapters: state.completed_chapters.len(),
            last_error: state.last_error.clone(),
        }
    }
}

struct Slot {
    state: WorkflowState,
    stop: Option<watch::Sender<bool>>,
}

impl Slot {
    fn is_running(&self) -> bool {
        self.stop.is_some()
    }
}

/// Control surface for creating, running and inspecting stories
pub struct StoryEngine {
    orchestrator: Arc<Orchestrator>,
    knowledge: Arc<dyn KnowledgeStore>,
    stories: RwLock<HashMap<Uuid, Slot>>,
}

impl StoryEngine {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let knowledge = orchestrator.knowledge();
        Self {
            orchestrator: Arc::new(orchestrator),
            knowledge,
            stories: RwLock::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Register a new story
    pub async fn create_story(&self, seed: StorySeed) -> Result<StateHandle, QuillError> {
        if seed.title.trim().is_empty() {
            return Err(ConfigError::MissingField("title".to_string()).into());
        }

        let config = self.orchestrator.config();
        let mut state = WorkflowState::new(seed.title.trim());
        state.outline = seed.outline;
        state.characters = seed.characters;
        state.world_details = seed.world_details;
        state.story_notes = seed.notes;
        state.max_iterations = config.max_iterations;
        state.execution_log.resize(config.cycle.window);
        if !config.review.enabled {
            state.human_review_status = ReviewStatus::NotNeeded;
        }
        let state = self.orchestrator.phases().update_phase_progress(&state);

        let handle = StateHandle(state.story_id);
        let key = format!("{}/story", handle);
        let record = json!({
            "title": state.title,
            "outline": state.outline,
            "characters": state.characters,
        });
        if let Err(e) = self.knowledge.store_memory(&key, record, None).await {
            log::warn!("Could not store {} in knowledge store: {}", key, e);
        }

        log::info!("Created story '{}' ({})", state.title, handle);
        self.stories
            .write()
            .await
            .insert(handle.0, Slot { state, stop: None });
        Ok(handle)
    }

    /// Run a story and keep its final snapshot
    pub async fn run(
        &self,
        handle: &StateHandle,
        max_iterations: u32,
        target_chapters: u32,
    ) -> Result<WorkflowState, QuillError> {
        Ok(self
            .run_report(handle, max_iterations, target_chapters)
            .await?
            .state)
    }

    /// Like `run`, but also reports why the run stopped
    pub async fn run_report(
        &self,
        handle: &StateHandle,
        max_iterations: u32,
        target_chapters: u32,
    ) -> Result<RunReport, QuillError> {
        let (initial, stop) = {
            let mut stories = self.stories.write().await;
            let slot = stories
                .get_mut(&handle.0)
                .ok_or_else(|| QuillError::StoryNotFound(handle.to_string()))?;
            if slot.is_running() {
                return Err(QuillError::AlreadyRunning(handle.to_string()));
            }
            let (tx, stop) = StopSignal::channel();
            slot.stop = Some(tx);
            (slot.state.clone(), stop)
        };

        let report = self
            .orchestrator
            .run_until(initial, max_iterations, target_chapters, stop)
            .await;

        let mut stories = self.stories.write().await;
        if let Some(slot) = stories.get_mut(&handle.0) {
            slot.state = report.state.clone();
            slot.stop = None;
        }
        Ok(report)
    }

    /// Record caller feedback on an idle story
    pub async fn add_human_feedback(
        &self,
        handle: &StateHandle,
        feedback: &str,
        target_chapter: Option<u32>,
    ) -> Result<WorkflowState, QuillError> {
        let state = {
            let mut stories = self.stories.write().await;
            let slot = stories
                .get_mut(&handle.0)
                .ok_or_else(|| QuillError::StoryNotFound(handle.to_string()))?;
            if slot.is_running() {
                return Err(QuillError::AlreadyRunning(handle.to_string()));
            }
            slot.state = slot.state.with_human_feedback(feedback, target_chapter);
            slot.state.clone()
        };

        let key = format!("{}/feedback_{}", handle, state.human_feedback.len());
        let metadata = state
            .human_feedback
            .last()
            .map(|f| json!({"target_chapter": f.target_chapter, "kind": f.kind}));
        if let Err(e) = self
            .knowledge
            .store_memory(&key, json!(feedback), metadata)
            .await
        {
            log::warn!("Could not store {} in knowledge store: {}", key, e);
        }
        Ok(state)
    }

    pub async fn get_status(&self, handle: &StateHandle) -> Result<StatusReport, QuillError> {
        let stories = self.stories.read().await;
        let slot = stories
            .get(&handle.0)
            .ok_or_else(|| QuillError::StoryNotFound(handle.to_string()))?;
        Ok(StatusReport::of(&slot.state, slot.is_running()))
    }

    /// Ask a running story to stop; returns false when it was idle
    pub async fn cancel(&self, handle: &StateHandle) -> Result<bool, QuillError> {
        let stories = self.stories.read().await;
        let slot = stories
            .get(&handle.0)
            .ok_or_else(|| QuillError::StoryNotFound(handle.to_string()))?;
        match &slot.stop {
            Some(tx) => {
                log::info!("Cancelling story {}", handle);
                Ok(tx.send(true).is_ok())
            }
            None => Ok(false),
        }
    }

    /// Latest stored snapshot; a running story reports its state from before the run
    pub async fn snapshot(&self, handle: &StateHandle) -> Result<WorkflowState, QuillError> {
        let stories = self.stories.read().await;
        stories
            .get(&handle.0)
            .map(|slot| slot.state.clone())
            .ok_or_else(|| QuillError::StoryNotFound(handle.to_string()))
    }

    pub async fn save_story<P: AsRef<Path>>(
        &self,
        handle: &StateHandle,
        path: P,
    ) -> Result<(), QuillError> {
        self.snapshot(handle).await?.save(path)
    }

    /// Load a saved story, replacing an idle story with the same id
    pub async fn load_story<P: AsRef<Path>>(&self, path: P) -> Result<StateHandle, QuillError> {
        let state = WorkflowState::load(path)?;
        let handle = StateHandle(state.story_id);

        let mut stories = self.stories.write().await;
        if stories.get(&handle.0).is_some_and(Slot::is_running) {
            return Err(QuillError::AlreadyRunning(handle.to_string()));
        }
        log::info!("Loaded story '{}' ({})", state.title, handle);
        stories.insert(handle.0, Slot { state, stop: None });
        Ok(handle)
    }

    pub async fn story_ids(&self) -> Vec<StateHandle> {
        self.stories
            .read()
            .await
            .keys()
            .copied()
            .map(StateHandle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::knowledge::InMemoryKnowledgeStore;
    use crate::quill::workflow::config::EngineConfig;
    use crate::quill::workflow::registry::AgentRegistry;

    fn engine() -> (StoryEngine, Arc<InMemoryKnowledgeStore>) {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let orchestrator = Orchestrator::builder(AgentRegistry::new())
            .knowledge(store.clone())
            .build()
            .unwrap();
        (StoryEngine::new(orchestrator), store)
    }

    #[tokio::test]
    async fn test_create_story_requires_title() {
        let (engine, _) = engine();
        let err = engine.create_story(StorySeed::new("   ")).await.unwrap_err();
        assert!(matches!(
            err,
            QuillError::Config(ConfigError::MissingField(ref f)) if f == "title"
        ));
    }

    #[tokio::test]
    async fn test_create_story_seeds_state() {
        let (engine, store) = engine();
        let mut seed = StorySeed::new("The Long Night");
        seed.outline.insert("premise".into(), json!("storm"));
        let handle = engine.create_story(seed).await.unwrap();

        let state = engine.snapshot(&handle).await.unwrap();
        assert_eq!(state.title, "The Long Night");
        assert_eq!(state.human_review_status, ReviewStatus::NotNeeded);
        assert!(state.macro_progress > 0.0);
        assert!(store.get(&format!("{}/story", handle)).await.is_some());

        let status = engine.get_status(&handle).await.unwrap();
        assert!(!status.is_running);
        assert_eq!(status.hierarchical_phase, HierarchicalPhase::Macro);
    }

    #[tokio::test]
    async fn test_create_story_uses_configured_window() {
        let mut config = EngineConfig::default();
        config.cycle.window = 12;
        let orchestrator = Orchestrator::builder(AgentRegistry::new())
            .config(config)
            .build()
            .unwrap();
        let engine = StoryEngine::new(orchestrator);

        let handle = engine.create_story(StorySeed::new("Wide")).await.unwrap();
        let state = engine.snapshot(&handle).await.unwrap();
        assert_eq!(state.execution_log.capacity(), 12);
    }

    #[tokio::test]
    async fn test_feedback_is_recorded() {
        let (engine, store) = engine();
        let handle = engine.create_story(StorySeed::new("T")).await.unwrap();
        let state = engine
            .add_human_feedback(&handle, "more rain", Some(2))
            .await
            .unwrap();
        assert_eq!(state.human_feedback[0].target_chapter, 2);
        assert_eq!(
            engine.snapshot(&handle).await.unwrap().human_feedback.len(),
            1
        );
        assert_eq!(
            store.get(&format!("{}/feedback_1", handle)).await,
            Some(json!("more rain"))
        );
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let (engine, _) = engine();
        let handle = StateHandle(Uuid::new_v4());
        assert!(matches!(
            engine.get_status(&handle).await,
            Err(QuillError::StoryNotFound(_))
        ));
        assert!(matches!(
            engine.cancel(&handle).await,
            Err(QuillError::StoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_idle_story_is_noop() {
        let (engine, _) = engine();
        let handle = engine.create_story(StorySeed::new("T")).await.unwrap();
        assert!(!engine.cancel(&handle).await.unwrap());
    }
}
