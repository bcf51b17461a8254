// SPDX-License-Identifier: MIT

//! State schema definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall story lifecycle
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Draft,
    InProgress,
    Complete,
    /// Structure must be revisited; pulls the workflow back to macro planning
    Replan,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Complete => "complete",
            StoryStatus::Replan => "replan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(StoryStatus::Draft),
            "in_progress" => Some(StoryStatus::InProgress),
            "complete" => Some(StoryStatus::Complete),
            "replan" => Some(StoryStatus::Replan),
            _ => None,
        }
    }
}

/// Coarse activity label shown to agents
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkPhase {
    #[default]
    Planning,
    Writing,
    Editing,
    Review,
}

/// Nested workflow granularity
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HierarchicalPhase {
    /// Whole-story architecture
    #[default]
    Macro,
    /// Chapter-level planning
    Mid,
    /// Paragraph and sentence level writing
    Micro,
}

impl HierarchicalPhase {
    pub const ALL: [HierarchicalPhase; 3] = [
        HierarchicalPhase::Macro,
        HierarchicalPhase::Mid,
        HierarchicalPhase::Micro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchicalPhase::Macro => "macro",
            HierarchicalPhase::Mid => "mid",
            HierarchicalPhase::Micro => "micro",
        }
    }

    fn depth(&self) -> u8 {
        match self {
            HierarchicalPhase::Macro => 0,
            HierarchicalPhase::Mid => 1,
            HierarchicalPhase::Micro => 2,
        }
    }

    /// True when a transition between the two phases is legal
    pub fn is_adjacent(&self, other: HierarchicalPhase) -> bool {
        self.depth().abs_diff(other.depth()) == 1
    }

    /// Next phase toward micro
    pub fn forward(&self) -> Option<HierarchicalPhase> {
        match self {
            HierarchicalPhase::Macro => Some(HierarchicalPhase::Mid),
            HierarchicalPhase::Mid => Some(HierarchicalPhase::Micro),
            HierarchicalPhase::Micro => None,
        }
    }

    /// Next phase toward macro
    pub fn backward(&self) -> Option<HierarchicalPhase> {
        match self {
            HierarchicalPhase::Macro => None,
            HierarchicalPhase::Mid => Some(HierarchicalPhase::Macro),
            HierarchicalPhase::Micro => Some(HierarchicalPhase::Mid),
        }
    }

    /// Adjacent phases, forward neighbour first
    pub fn neighbours(&self) -> impl Iterator<Item = HierarchicalPhase> {
        self.forward().into_iter().chain(self.backward())
    }
}

impl fmt::Display for HierarchicalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human review state
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    NotNeeded,
}

/// A committed chapter
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Chapter {
    pub number: u32,
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub completed_at_iteration: u32,
}

/// Feedback left by a human reviewer or the caller
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HumanFeedback {
    pub timestamp: DateTime<Utc>,
    pub feedback: String,
    pub target_chapter: u32,
    /// `human_input` for caller feedback, `review` for checkpoint decisions
    pub kind: String,
}

/// Progress of all three phases at one point in time
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub macro_progress: f64,
    pub mid_progress: f64,
    pub micro_progress: f64,
}

impl ProgressSnapshot {
    pub fn of(&self, phase: HierarchicalPhase) -> f64 {
        match phase {
            HierarchicalPhase::Macro => self.macro_progress,
            HierarchicalPhase::Mid => self.mid_progress,
            HierarchicalPhase::Micro => self.micro_progress,
        }
    }

    pub fn in_bounds(&self) -> bool {
        [self.macro_progress, self.mid_progress, self.micro_progress]
            .iter()
            .all(|p| (0.0..=1.0).contains(p))
    }
}
