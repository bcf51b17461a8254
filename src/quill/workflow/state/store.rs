// SPDX-License-Identifier: MIT

//! Per-story workflow state
//!
//! A `WorkflowState` is a plain value. The orchestrator never edits the
//! snapshot it was given: it clones it, applies one node's effects to the
//! clone, and moves on. A discarded snapshot therefore never leaks into
//! history.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use super::schema::{
    Chapter, HierarchicalPhase, HumanFeedback, ProgressSnapshot, ReviewStatus, StoryStatus,
    WorkPhase,
};
use crate::adk::agent::{AgentContext, AgentResponse};
use crate::adk::error::QuillError;
use crate::quill::workflow::graph::NodeId;

/// Error count at which a run stops
pub const MAX_ERRORS: u32 = 5;

const DEFAULT_MAX_ITERATIONS: u32 = 50;
const DEFAULT_LOG_CAPACITY: usize = 8;
const DEFAULT_TARGET_CHAPTER_PLANS: u32 = 3;
const DEFAULT_TARGET_CHAPTERS: u32 = 5;

/// One executed node with the progress observed right after it
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ExecutionEntry {
    pub node: NodeId,
    pub progress: ProgressSnapshot,
}

/// Bounded ring buffer of recently executed nodes
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExecutionLog {
    capacity: usize,
    entries: VecDeque<ExecutionEntry>,
}

impl ExecutionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, node: NodeId, progress: ProgressSnapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ExecutionEntry { node, progress });
    }

    /// Change the capacity, keeping the newest entries
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
        self.capacity = capacity;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ExecutionEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The most recent `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<ExecutionEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).copied().collect()
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.entries.back().map(|e| e.node)
    }

    /// Node ids, oldest first
    pub fn nodes(&self) -> Vec<NodeId> {
        self.entries.iter().map(|e| e.node).collect()
    }
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

/// Workflow progress of one story
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkflowState {
    pub story_id: Uuid,

    // Story content
    pub title: String,
    pub current_chapter: String,
    pub chapters: Vec<Chapter>,
    pub outline: Map<String, Value>,
    pub characters: Map<String, Value>,
    pub world_details: Map<String, Value>,
    pub story_status: StoryStatus,
    pub story_notes: Vec<String>,
    pub retrieved_knowledge: Vec<Value>,

    // Control
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub current_phase: WorkPhase,
    /// Node id hint left by the last agent; validated before it is honored
    pub next_agent: Option<String>,
    pub error_count: u32,
    pub last_error: Option<String>,

    // Hierarchy
    pub current_hierarchical_phase: HierarchicalPhase,
    pub macro_progress: f64,
    pub mid_progress: f64,
    pub micro_progress: f64,
    pub macro_phase_data: Map<String, Value>,
    pub mid_phase_data: Map<String, Value>,
    pub micro_phase_data: Map<String, Value>,
    /// Chapter plans the outline needs before macro planning is complete
    pub target_macro_completion: u32,
    /// Chapters to write
    pub target_mid_completion: u32,
    pub macro_completion_criteria: Map<String, Value>,
    pub mid_completion_criteria: Map<String, Value>,
    pub micro_completion_criteria: Map<String, Value>,

    // History
    pub agent_responses: Vec<AgentResponse>,
    pub execution_log: ExecutionLog,

    // Human loop
    pub human_feedback: Vec<HumanFeedback>,
    pub needs_human_review: bool,
    pub human_review_status: ReviewStatus,

    // Chapter bookkeeping
    pub completed_chapters: Vec<u32>,
    pub current_chapter_index: u32,
}

impl WorkflowState {
    /// Create a fresh state for a story
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            story_id: Uuid::new_v4(),
            title: title.into(),
            current_chapter: String::new(),
            chapters: Vec::new(),
            outline: Map::new(),
            characters: Map::new(),
            world_details: Map::new(),
            story_status: StoryStatus::Draft,
            story_notes: Vec::new(),
            retrieved_knowledge: Vec::new(),
            iteration_count: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            current_phase: WorkPhase::Planning,
            next_agent: None,
            error_count: 0,
            last_error: None,
            current_hierarchical_phase: HierarchicalPhase::Macro,
            macro_progress: 0.0,
            mid_progress: 0.0,
            micro_progress: 0.0,
            macro_phase_data: Map::new(),
            mid_phase_data: Map::new(),
            micro_phase_data: Map::new(),
            target_macro_completion: DEFAULT_TARGET_CHAPTER_PLANS,
            target_mid_completion: DEFAULT_TARGET_CHAPTERS,
            macro_completion_criteria: Map::new(),
            mid_completion_criteria: Map::new(),
            micro_completion_criteria: Map::new(),
            agent_responses: Vec::new(),
            execution_log: ExecutionLog::default(),
            human_feedback: Vec::new(),
            needs_human_review: false,
            human_review_status: ReviewStatus::Pending,
            completed_chapters: Vec::new(),
            current_chapter_index: 0,
        }
    }

    /// Determine if the workflow should keep iterating
    pub fn should_continue(&self) -> bool {
        self.iteration_count < self.max_iterations
            && self.story_status != StoryStatus::Complete
            && self.error_count < MAX_ERRORS
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            macro_progress: self.macro_progress,
            mid_progress: self.mid_progress,
            micro_progress: self.micro_progress,
        }
    }

    /// Data map of the given phase
    pub fn phase_data_mut(&mut self, phase: HierarchicalPhase) -> &mut Map<String, Value> {
        match phase {
            HierarchicalPhase::Macro => &mut self.macro_phase_data,
            HierarchicalPhase::Mid => &mut self.mid_phase_data,
            HierarchicalPhase::Micro => &mut self.micro_phase_data,
        }
    }

    pub fn phase_data(&self, phase: HierarchicalPhase) -> &Map<String, Value> {
        match phase {
            HierarchicalPhase::Macro => &self.macro_phase_data,
            HierarchicalPhase::Mid => &self.mid_phase_data,
            HierarchicalPhase::Micro => &self.micro_phase_data,
        }
    }

    /// Last node the orchestrator ran, if the log still remembers it
    pub fn last_node(&self) -> Option<NodeId> {
        self.execution_log.last_node()
    }

    /// Read-only projection handed to agents
    pub fn agent_context(&self) -> AgentContext {
        let mut fields = Map::new();
        fields.insert("title".into(), json!(self.title));
        fields.insert("current_chapter".into(), json!(self.current_chapter));
        fields.insert("chapters".into(), json!(self.chapters));
        fields.insert("outline".into(), Value::Object(self.outline.clone()));
        fields.insert("characters".into(), Value::Object(self.characters.clone()));
        fields.insert(
            "world_details".into(),
            Value::Object(self.world_details.clone()),
        );
        fields.insert("story_status".into(), json!(self.story_status));
        fields.insert("story_notes".into(), json!(self.story_notes));
        fields.insert("current_phase".into(), json!(self.current_phase));
        fields.insert(
            "hierarchical_phase".into(),
            json!(self.current_hierarchical_phase),
        );
        fields.insert("agent_responses".into(), json!(self.agent_responses));
        fields.insert(
            "retrieved_knowledge".into(),
            json!(self.retrieved_knowledge),
        );
        fields.insert("human_feedback".into(), json!(self.human_feedback));
        AgentContext::new(fields)
    }

    /// Add a chapter, replacing an existing one with the same number
    pub fn add_chapter(&mut self, content: &str, number: u32, title: &str) {
        let chapter = Chapter {
            number,
            title: title.to_string(),
            content: content.to_string(),
            word_count: content.split_whitespace().count(),
            completed_at_iteration: self.iteration_count,
        };

        match self.chapters.iter_mut().find(|c| c.number == number) {
            Some(existing) => *existing = chapter,
            None => self.chapters.push(chapter),
        }

        if !self.completed_chapters.contains(&number) {
            self.completed_chapters.push(number);
        }
        self.current_chapter_index = number;
    }

    /// Chapter most recently committed
    pub fn latest_chapter_mut(&mut self) -> Option<&mut Chapter> {
        let index = self.current_chapter_index;
        self.chapters.iter_mut().find(|c| c.number == index)
    }

    pub fn add_agent_response(&mut self, response: AgentResponse) {
        self.agent_responses.push(response);
    }

    /// Copy of this state with caller feedback recorded
    pub fn with_human_feedback(&self, feedback: &str, target_chapter: Option<u32>) -> Self {
        let mut next = self.clone();
        next.human_feedback.push(HumanFeedback {
            timestamp: Utc::now(),
            feedback: feedback.to_string(),
            target_chapter: target_chapter.unwrap_or(self.chapters.len() as u32),
            kind: "human_input".to_string(),
        });
        next.needs_human_review = false;
        next
    }

    /// Check invariants a persisted snapshot must hold
    pub fn validate(&self) -> Result<(), QuillError> {
        if !self.progress().in_bounds() {
            return Err(QuillError::InvalidState(format!(
                "progress out of [0, 1]: {:?}",
                self.progress()
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, QuillError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self, QuillError> {
        let state: WorkflowState = serde_json::from_str(content)?;
        state.validate()?;
        Ok(state)
    }

    /// Save the state to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), QuillError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a state from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, QuillError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new("")
    }
}
