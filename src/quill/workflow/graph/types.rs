//! Workflow node identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::adk::error::WorkflowError;

/// A named step in the story workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Planner,
    Writer,
    Archivist,
    Editor,
    ConsistencyChecker,
    DialogueSpecialist,
    WorldBuilder,
    PacingAdvisor,
    Humanizer,
    HumanReview,
    End,
}

impl NodeId {
    /// Every node, in declaration order
    pub const ALL: [NodeId; 11] = [
        NodeId::Planner,
        NodeId::Writer,
        NodeId::Archivist,
        NodeId::Editor,
        NodeId::ConsistencyChecker,
        NodeId::DialogueSpecialist,
        NodeId::WorldBuilder,
        NodeId::PacingAdvisor,
        NodeId::Humanizer,
        NodeId::HumanReview,
        NodeId::End,
    ];

    /// Nodes backed by an agent collaborator
    pub const AGENTS: [NodeId; 9] = [
        NodeId::Planner,
        NodeId::Writer,
        NodeId::Archivist,
        NodeId::Editor,
        NodeId::ConsistencyChecker,
        NodeId::DialogueSpecialist,
        NodeId::WorldBuilder,
        NodeId::PacingAdvisor,
        NodeId::Humanizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Planner => "planner",
            NodeId::Writer => "writer",
            NodeId::Archivist => "archivist",
            NodeId::Editor => "editor",
            NodeId::ConsistencyChecker => "consistency_checker",
            NodeId::DialogueSpecialist => "dialogue_specialist",
            NodeId::WorldBuilder => "world_builder",
            NodeId::PacingAdvisor => "pacing_advisor",
            NodeId::Humanizer => "humanizer",
            NodeId::HumanReview => "human_review",
            NodeId::End => "end",
        }
    }

    /// True for nodes dispatched to an `Agent`
    pub fn is_agent(&self) -> bool {
        !matches!(self, NodeId::HumanReview | NodeId::End)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeId {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        NodeId::ALL
            .iter()
            .copied()
            .find(|node| node.as_str() == needle)
            .ok_or_else(|| WorkflowError::UnknownNode(s.to_string()))
    }
}
