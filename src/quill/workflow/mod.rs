// SPDX-License-Identifier: MIT

pub mod config;
pub mod engine;
pub mod graph;
pub mod phase;
pub mod registry;
pub mod state;
