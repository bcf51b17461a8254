// SPDX-License-Identifier: MIT

//! Next-node selection
//!
//! Each node has a fixed follow-up edge. Agent hints and edge targets are
//! only suggestions: a node is dispatched only if the current phase allows
//! it and a collaborator is attached. Anything refused falls through to the
//! phase's priority list.

use std::collections::{HashMap, HashSet};

use super::types::NodeId;
use crate::adk::error::WorkflowError;
use crate::quill::workflow::phase::{chapters_remaining, PhaseManager};
use crate::quill::workflow::state::{HierarchicalPhase, ReviewStatus, WorkflowState};

/// Follow-up edge of one node
pub type EdgeFn = fn(&Router, &WorkflowState) -> NodeId;

pub struct Router {
    edges: HashMap<NodeId, EdgeFn>,
    available: HashSet<NodeId>,
    phases: PhaseManager,
}

impl Router {
    /// Build the edge table for the given set of attached agent nodes
    pub fn new(phases: PhaseManager, agents: impl IntoIterator<Item = NodeId>) -> Self {
        let mut available: HashSet<NodeId> = agents.into_iter().collect();
        available.insert(NodeId::HumanReview);
        available.insert(NodeId::End);

        let mut edges: HashMap<NodeId, EdgeFn> = HashMap::new();
        edges.insert(NodeId::Planner, Router::route_after_planner);
        edges.insert(NodeId::Writer, Router::route_after_writer);
        edges.insert(NodeId::Humanizer, Router::route_after_humanizer);
        edges.insert(NodeId::Editor, Router::route_after_editor);
        edges.insert(
            NodeId::ConsistencyChecker,
            Router::route_after_consistency_checker,
        );
        edges.insert(
            NodeId::DialogueSpecialist,
            Router::route_after_dialogue_specialist,
        );
        edges.insert(NodeId::Archivist, Router::route_after_archivist);
        edges.insert(NodeId::WorldBuilder, Router::route_after_world_builder);
        edges.insert(NodeId::PacingAdvisor, Router::route_after_pacing_advisor);
        edges.insert(NodeId::HumanReview, Router::route_after_human_review);

        Self {
            edges,
            available,
            phases,
        }
    }

    pub fn is_available(&self, node: NodeId) -> bool {
        self.available.contains(&node)
    }

    /// Attached and allowed in the current phase
    pub fn can_run(&self, node: NodeId, state: &WorkflowState) -> bool {
        self.is_available(node)
            && PhaseManager::should_execute_agent_in_phase(node, state.current_hierarchical_phase)
    }

    fn target_met(state: &WorkflowState) -> bool {
        !chapters_remaining(state)
    }

    /// Pick the node to run after `previous`
    pub fn resolve(&self, previous: Option<NodeId>, state: &WorkflowState) -> NodeId {
        if Self::target_met(state) {
            return NodeId::End;
        }
        if state.next_agent.is_some() {
            return self.route_workflow_logic(state);
        }
        let Some(previous) = previous else {
            return self.route_workflow_logic(state);
        };

        let candidate = self.route_after(previous, state);
        if self.can_run(candidate, state) {
            candidate
        } else {
            log::debug!(
                "Edge {} -> {} refused in {} phase",
                previous,
                candidate,
                state.current_hierarchical_phase
            );
            self.route_workflow_logic(state)
        }
    }

    /// Raw edge target, before validation
    pub fn route_after(&self, node: NodeId, state: &WorkflowState) -> NodeId {
        match self.edges.get(&node) {
            Some(edge) => edge(self, state),
            None => NodeId::End,
        }
    }

    /// Honor a valid agent hint, otherwise walk the phase priority list
    pub fn route_workflow_logic(&self, state: &WorkflowState) -> NodeId {
        if let Some(hint) = state.next_agent.as_deref() {
            match self.validate_hint(hint, state) {
                Ok(node) => return node,
                Err(e) => log::warn!("Ignoring next_agent hint: {}", e),
            }
        }
        self.fallback(state)
    }

    fn validate_hint(&self, hint: &str, state: &WorkflowState) -> Result<NodeId, WorkflowError> {
        let node: NodeId = hint.parse()?;
        let phase = state.current_hierarchical_phase;
        if !PhaseManager::should_execute_agent_in_phase(node, phase) {
            return Err(WorkflowError::NodeNotAllowed {
                node: node.to_string(),
                phase: phase.to_string(),
            });
        }
        if !self.is_available(node) {
            return Err(WorkflowError::NodeNotAllowed {
                node: node.to_string(),
                phase: "any (no collaborator attached)".to_string(),
            });
        }
        Ok(node)
    }

    /// First runnable node of the phase priority list, then the phase roster
    pub fn fallback(&self, state: &WorkflowState) -> NodeId {
        if Self::target_met(state) {
            return NodeId::End;
        }

        let phase = state.current_hierarchical_phase;
        let priority: Vec<NodeId> = match phase {
            HierarchicalPhase::Macro => {
                if state.outline.is_empty() {
                    vec![NodeId::Planner]
                } else if self.phases.world_sparse(state) {
                    vec![NodeId::WorldBuilder]
                } else {
                    vec![NodeId::PacingAdvisor]
                }
            }
            HierarchicalPhase::Mid => {
                if self.phases.phase_complete(state) {
                    vec![NodeId::Writer]
                } else {
                    vec![NodeId::Planner]
                }
            }
            HierarchicalPhase::Micro => {
                if self.phases.chapter_in_progress(state) {
                    vec![NodeId::Editor, NodeId::Humanizer, NodeId::Writer]
                } else {
                    vec![NodeId::Writer, NodeId::Planner]
                }
            }
        };

        priority
            .into_iter()
            .chain(PhaseManager::agents_for_phase(phase).iter().copied())
            .find(|node| self.can_run(*node, state))
            .unwrap_or(NodeId::End)
    }

    fn route_after_planner(&self, state: &WorkflowState) -> NodeId {
        match state.current_hierarchical_phase {
            HierarchicalPhase::Macro => {
                if self.phases.world_sparse(state) {
                    NodeId::WorldBuilder
                } else {
                    NodeId::PacingAdvisor
                }
            }
            HierarchicalPhase::Mid => {
                if chapters_remaining(state) {
                    NodeId::Planner
                } else {
                    NodeId::End
                }
            }
            HierarchicalPhase::Micro => NodeId::Writer,
        }
    }

    fn route_after_writer(&self, state: &WorkflowState) -> NodeId {
        if state.needs_human_review {
            NodeId::HumanReview
        } else {
            NodeId::Humanizer
        }
    }

    fn route_after_humanizer(&self, state: &WorkflowState) -> NodeId {
        if self.phases.chapter_in_progress(state) {
            NodeId::Editor
        } else {
            NodeId::Archivist
        }
    }

    fn route_after_editor(&self, _state: &WorkflowState) -> NodeId {
        NodeId::ConsistencyChecker
    }

    fn route_after_consistency_checker(&self, state: &WorkflowState) -> NodeId {
        if state.current_hierarchical_phase == HierarchicalPhase::Micro {
            NodeId::DialogueSpecialist
        } else {
            NodeId::Planner
        }
    }

    fn route_after_dialogue_specialist(&self, _state: &WorkflowState) -> NodeId {
        NodeId::Archivist
    }

    fn route_after_archivist(&self, state: &WorkflowState) -> NodeId {
        if state.needs_human_review {
            NodeId::HumanReview
        } else if state.current_hierarchical_phase == HierarchicalPhase::Micro
            && chapters_remaining(state)
        {
            NodeId::Writer
        } else {
            NodeId::Planner
        }
    }

    fn route_after_world_builder(&self, _state: &WorkflowState) -> NodeId {
        NodeId::PacingAdvisor
    }

    fn route_after_pacing_advisor(&self, state: &WorkflowState) -> NodeId {
        if state.needs_human_review {
            NodeId::HumanReview
        } else if !state.completed_chapters.is_empty() {
            NodeId::Planner
        } else {
            NodeId::Editor
        }
    }

    fn route_after_human_review(&self, state: &WorkflowState) -> NodeId {
        if state.human_review_status == ReviewStatus::Rejected {
            return NodeId::Editor;
        }
        match state.current_hierarchical_phase {
            HierarchicalPhase::Micro => {
                if self.phases.phase_complete(state) {
                    NodeId::Planner
                } else {
                    NodeId::Writer
                }
            }
            _ => NodeId::Planner,
        }
    }
}
