// SPDX-License-Identifier: MIT

//! Agent development kit - collaborator contracts consumed by the engine
//!
//! - `Agent` - one specialised story agent (planner, writer, ...)
//! - `KnowledgeStore` - side-log of node outputs
//! - `Reviewer` - the human review checkpoint

pub mod agent;
pub mod error;
pub mod knowledge;
pub mod review;
