// SPDX-License-Identifier: MIT

//! Detection of unproductive routing loops

use serde::Serialize;

use super::types::NodeId;
use crate::quill::workflow::config::{CycleConfig, ForcedTransitionStrategy};
use crate::quill::workflow::state::ExecutionLog;

/// A repeating node pattern found in the execution log
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CycleReport {
    pub period: usize,
    pub pattern: Vec<NodeId>,
}

/// Watches the execution log for node sequences that repeat without progress
#[derive(Debug, Clone)]
pub struct CycleGuard {
    min_period: usize,
    max_period: usize,
    strategy: ForcedTransitionStrategy,
}

impl CycleGuard {
    pub fn new(config: &CycleConfig) -> Self {
        Self {
            min_period: config.min_period.max(1),
            max_period: config.max_period.max(config.min_period.max(1)),
            strategy: config.strategy,
        }
    }

    pub fn strategy(&self) -> ForcedTransitionStrategy {
        self.strategy
    }

    /// Find a period `p` whose last two repetitions match while progress stood still
    pub fn detect_cycle(&self, log: &ExecutionLog) -> Option<CycleReport> {
        for period in self.min_period..=self.max_period {
            let span = period * 2;
            if log.len() < span {
                break;
            }

            let window = log.tail(span);
            let repeats = (0..period).all(|i| window[i].node == window[i + period].node);
            let stalled = window.iter().all(|e| e.progress == window[0].progress);

            if repeats && stalled {
                return Some(CycleReport {
                    period,
                    pattern: window[period..].iter().map(|e| e.node).collect(),
                });
            }
        }
        None
    }
}

impl Default for CycleGuard {
    fn default() -> Self {
        Self::new(&CycleConfig::default())
    }
}
