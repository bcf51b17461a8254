// SPDX-License-Identifier: MIT

//! Graph-based story workflow execution
//!
//! This module provides the node identifiers, the router that picks the
//! next node, the cycle guard and the orchestrator loop that drives them.

pub mod cycle;
pub mod executor;
mod merge;
pub mod router;
pub mod types;

pub use cycle::{CycleGuard, CycleReport};
pub use executor::{
    Orchestrator, OrchestratorBuilder, RunReport, StopReason, StopSignal, WorkflowEvent,
};
pub use router::Router;
pub use types::NodeId;
