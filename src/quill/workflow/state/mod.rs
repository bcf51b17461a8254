// SPDX-License-Identifier: MIT

//! Story state for the workflow
//!
//! This module provides:
//! - `schema` - the enums and records the state is built from
//! - `store` - `WorkflowState`, the per-story snapshot, and its execution log

mod schema;
mod store;

pub use schema::{
    Chapter, HierarchicalPhase, HumanFeedback, ProgressSnapshot, ReviewStatus, StoryStatus,
    WorkPhase,
};
pub use store::{ExecutionEntry, ExecutionLog, WorkflowState, MAX_ERRORS};
