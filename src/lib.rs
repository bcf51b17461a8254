// SPDX-License-Identifier: MIT

//! quill-rs: a phase-aware orchestration engine for multi-agent story writing.
//!
//! - `adk` holds the collaborator contracts (agents, knowledge store, reviewer)
//!   and the error taxonomy.
//! - `quill` holds the workflow engine: state model, phase manager, router,
//!   orchestrator loop and the story control surface.

pub mod adk;
pub mod quill;
