// SPDX-License-Identifier: MIT

//! Hierarchical phase management
//!
//! Stories move through three nested phases: macro (whole-story structure),
//! mid (chapter plans) and micro (prose). Phases only ever move one level at
//! a time. Every operation here takes a snapshot and returns a new one.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::adk::error::WorkflowError;
use crate::quill::workflow::config::{ForcedTransitionStrategy, PhaseConfig};
use crate::quill::workflow::graph::NodeId;
use crate::quill::workflow::state::{HierarchicalPhase, StoryStatus, WorkflowState};

const MACRO_ROSTER: &[NodeId] = &[NodeId::Planner, NodeId::WorldBuilder, NodeId::PacingAdvisor];
const MID_ROSTER: &[NodeId] = &[NodeId::Planner, NodeId::Archivist, NodeId::ConsistencyChecker];
const MICRO_ROSTER: &[NodeId] = &[
    NodeId::Writer,
    NodeId::Editor,
    NodeId::DialogueSpecialist,
    NodeId::Archivist,
    NodeId::ConsistencyChecker,
    NodeId::Humanizer,
];

/// Outcome of evaluating the current phase
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseCompletion {
    pub phase_complete: bool,
    pub recommended_next_phase: Option<HierarchicalPhase>,
    pub reasoning: String,
    pub progress: f64,
}

/// Computes progress and decides phase transitions
#[derive(Debug, Clone, Default)]
pub struct PhaseManager {
    config: PhaseConfig,
}

impl PhaseManager {
    pub fn new(config: PhaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    /// Recompute the progress of all three phases and their completion criteria
    pub fn update_phase_progress(&self, state: &WorkflowState) -> WorkflowState {
        let mut next = state.clone();
        let cfg = &self.config;

        let has_outline = !state.outline.is_empty();
        let has_world = !state.world_details.is_empty();
        let has_characters = !state.characters.is_empty();
        let has_arc = state.outline.contains_key("story_arc");

        let mut macro_progress = 0.0;
        for (present, weight) in [
            (has_outline, cfg.outline_weight),
            (has_world, cfg.world_weight),
            (has_characters, cfg.characters_weight),
            (has_arc, cfg.story_arc_weight),
        ] {
            if present {
                macro_progress += weight;
            }
        }

        let written = state.chapters.len() as f64;
        let target = state.target_mid_completion.max(1) as f64;
        let has_plans = has_chapter_plans(&state.outline);
        let mid_progress = if has_plans { written / target } else { 0.0 };

        let draft_len = state.current_chapter.chars().count();
        let micro_progress =
            (draft_len as f64 / cfg.chapter_target_length.max(1) as f64).max(written / target);

        next.macro_progress = clamp_unit(macro_progress);
        next.mid_progress = clamp_unit(mid_progress);
        next.micro_progress = clamp_unit(micro_progress);

        next.macro_completion_criteria = criteria(json!({
            "outline": has_outline,
            "world_details": has_world,
            "characters": state.characters.len() >= cfg.macro_min_characters,
            "story_arc": has_arc,
        }));
        next.mid_completion_criteria = criteria(json!({
            "chapter_plans": has_plans,
            "chapters_written": state.chapters.len(),
            "target_chapters": state.target_mid_completion,
        }));
        next.micro_completion_criteria = criteria(json!({
            "draft_length": draft_len,
            "target_length": cfg.chapter_target_length,
            "chapters_written": state.chapters.len(),
        }));
        next
    }

    /// Whether the story is ready to move from its current phase to `target`
    pub fn should_transition_to_phase(
        &self,
        state: &WorkflowState,
        target: HierarchicalPhase,
    ) -> bool {
        use HierarchicalPhase::*;

        let current = state.current_hierarchical_phase;
        if !current.is_adjacent(target) {
            return false;
        }

        match (current, target) {
            (Macro, Mid) => !state.outline.is_empty() && !state.title.trim().is_empty(),
            (Mid, Micro) => has_chapter_plans(&state.outline) && chapters_remaining(state),
            (Micro, Mid) => state.micro_progress >= 1.0 || !chapters_remaining(state),
            (Mid, Macro) => state.story_status == StoryStatus::Replan || state.outline.is_empty(),
            _ => false,
        }
    }

    /// Move to an adjacent phase and initialize its data
    pub fn prepare_phase_transition(
        &self,
        state: &WorkflowState,
        target: HierarchicalPhase,
    ) -> Result<WorkflowState, WorkflowError> {
        let current = state.current_hierarchical_phase;
        if !current.is_adjacent(target) {
            return Err(WorkflowError::IllegalTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }

        let mut next = state.clone();
        next.current_hierarchical_phase = target;

        let iteration = next.iteration_count;
        let data = next.phase_data_mut(target);
        if data.is_empty() {
            data.insert("started_at_iteration".into(), json!(iteration));
        }
        data.insert("entered_from".into(), json!(current));

        let counter = match target {
            HierarchicalPhase::Micro => "creation_iteration",
            _ => "planning_iteration",
        };
        bump(data, counter);

        log::info!("Phase transition {} -> {}", current, target);
        Ok(next)
    }

    /// Static capability table
    pub fn should_execute_agent_in_phase(node: NodeId, phase: HierarchicalPhase) -> bool {
        use HierarchicalPhase::*;

        match node {
            NodeId::Planner | NodeId::WorldBuilder | NodeId::PacingAdvisor => {
                matches!(phase, Macro | Mid)
            }
            NodeId::Archivist => true,
            NodeId::ConsistencyChecker => matches!(phase, Mid | Micro),
            NodeId::Writer | NodeId::Editor | NodeId::DialogueSpecialist | NodeId::Humanizer => {
                phase == Micro
            }
            NodeId::HumanReview | NodeId::End => true,
        }
    }

    /// Default agent roster of a phase, in priority order
    pub fn agents_for_phase(phase: HierarchicalPhase) -> &'static [NodeId] {
        match phase {
            HierarchicalPhase::Macro => MACRO_ROSTER,
            HierarchicalPhase::Mid => MID_ROSTER,
            HierarchicalPhase::Micro => MICRO_ROSTER,
        }
    }

    pub fn evaluate_phase_completion(&self, state: &WorkflowState) -> PhaseCompletion {
        let phase = state.current_hierarchical_phase;
        let progress = state.progress().of(phase);

        let (phase_complete, recommended_next_phase, reasoning) = match phase {
            HierarchicalPhase::Macro => {
                if self.should_transition_to_phase(state, HierarchicalPhase::Mid) {
                    (
                        true,
                        Some(HierarchicalPhase::Mid),
                        "story structure is in place".to_string(),
                    )
                } else {
                    (false, None, "outline or title still missing".to_string())
                }
            }
            HierarchicalPhase::Mid => {
                if self.should_transition_to_phase(state, HierarchicalPhase::Macro) {
                    (
                        false,
                        Some(HierarchicalPhase::Macro),
                        "story structure needs replanning".to_string(),
                    )
                } else if !has_chapter_plans(&state.outline) {
                    (false, None, "no chapter plans yet".to_string())
                } else if chapters_remaining(state) {
                    (
                        true,
                        Some(HierarchicalPhase::Micro),
                        format!(
                            "chapter plans ready, {} of {} chapters written",
                            state.chapters.len(),
                            state.target_mid_completion
                        ),
                    )
                } else {
                    (true, None, "all planned chapters are written".to_string())
                }
            }
            HierarchicalPhase::Micro => {
                if self.should_transition_to_phase(state, HierarchicalPhase::Mid) {
                    (
                        true,
                        Some(HierarchicalPhase::Mid),
                        "chapter draft is complete".to_string(),
                    )
                } else {
                    (
                        false,
                        None,
                        format!("draft at {:.0}%", state.micro_progress * 100.0),
                    )
                }
            }
        };

        PhaseCompletion {
            phase_complete,
            recommended_next_phase,
            reasoning,
            progress,
        }
    }

    /// Take at most one natural transition, forward neighbour first
    pub fn advance(&self, state: &WorkflowState) -> WorkflowState {
        let current = state.current_hierarchical_phase;
        for target in current.neighbours() {
            if self.should_transition_to_phase(state, target) {
                match self.prepare_phase_transition(state, target) {
                    Ok(next) => return next,
                    Err(e) => log::warn!("Skipping transition: {}", e),
                }
            }
        }
        state.clone()
    }

    /// One adjacent step that ignores the transition predicates
    pub fn mark_forced_transition(
        &self,
        state: &WorkflowState,
        strategy: ForcedTransitionStrategy,
    ) -> WorkflowState {
        let current = state.current_hierarchical_phase;
        let target = match strategy {
            ForcedTransitionStrategy::TowardMicro => match current {
                HierarchicalPhase::Macro => HierarchicalPhase::Mid,
                HierarchicalPhase::Mid => HierarchicalPhase::Micro,
                HierarchicalPhase::Micro => HierarchicalPhase::Mid,
            },
            ForcedTransitionStrategy::LeastProgress => {
                let progress = state.progress();
                let mut best: Option<HierarchicalPhase> = None;
                for candidate in current.neighbours() {
                    best = match best {
                        Some(b) if progress.of(b) <= progress.of(candidate) => Some(b),
                        _ => Some(candidate),
                    };
                }
                match best {
                    Some(phase) => phase,
                    None => return state.clone(),
                }
            }
        };

        let mut next = match self.prepare_phase_transition(state, target) {
            Ok(next) => next,
            Err(e) => {
                log::error!("Forced transition refused: {}", e);
                return state.clone();
            }
        };
        bump(next.phase_data_mut(target), "forced_transitions");
        next.next_agent = None;
        log::warn!("Forced phase transition {} -> {}", current, target);
        next
    }

    /// A draft longer than the in-progress threshold exists
    pub fn chapter_in_progress(&self, state: &WorkflowState) -> bool {
        state.current_chapter.chars().count() > self.config.chapter_in_progress_threshold
    }

    pub fn world_sparse(&self, state: &WorkflowState) -> bool {
        state.world_details.len() < self.config.min_world_details
    }

    pub fn phase_complete(&self, state: &WorkflowState) -> bool {
        self.evaluate_phase_completion(state).phase_complete
    }
}

/// Fewer chapters written than the target
pub fn chapters_remaining(state: &WorkflowState) -> bool {
    (state.completed_chapters.len() as u32) < state.target_mid_completion
}

/// The outline carries chapter-level plans
pub(crate) fn has_chapter_plans(outline: &Map<String, Value>) -> bool {
    let plans = outline
        .get("chapters")
        .map(|v| match v {
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => false,
        })
        .unwrap_or(false);
    plans || outline.contains_key("current_chapter_outline")
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn criteria(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn bump(data: &mut Map<String, Value>, key: &str) {
    let count = data.get(key).and_then(Value::as_u64).unwrap_or(0);
    data.insert(key.to_string(), json!(count + 1));
}
