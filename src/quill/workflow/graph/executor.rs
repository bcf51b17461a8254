// SPDX-License-Identifier: MIT

//! Story workflow executor
//!
//! The orchestrator drives one story at a time through the node graph:
//! route, dispatch one agent under a timeout, merge the result into a fresh
//! snapshot, recompute progress, take a phase step and check for loops.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::cycle::CycleGuard;
use super::merge;
use super::router::Router;
use super::types::NodeId;
use crate::adk::agent::AgentResponse;
use crate::adk::error::{NodeError, QuillError};
use crate::adk::knowledge::{KnowledgeStore, NullKnowledgeStore};
use crate::adk::review::{PolicyReviewer, ReviewDecision, ReviewRequest, Reviewer};
use crate::quill::workflow::config::EngineConfig;
use crate::quill::workflow::phase::PhaseManager;
use crate::quill::workflow::registry::AgentRegistry;
use crate::quill::workflow::state::{HierarchicalPhase, StoryStatus, WorkflowState, MAX_ERRORS};

const EXCERPT_CHARS: usize = 500;

/// Why a run stopped
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Chapter target reached or an agent marked the story complete
    Completed,
    IterationLimit,
    ErrorLimit,
    Cancelled,
    NoRunnableNode,
}

/// Progress events emitted while a story runs
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    NodeStarted {
        story_id: Uuid,
        iteration: u32,
        node: NodeId,
    },
    NodeCompleted {
        story_id: Uuid,
        iteration: u32,
        node: NodeId,
    },
    NodeFailed {
        story_id: Uuid,
        iteration: u32,
        node: NodeId,
        error: String,
    },
    PhaseChanged {
        story_id: Uuid,
        from: HierarchicalPhase,
        to: HierarchicalPhase,
        forced: bool,
    },
    CycleDetected {
        story_id: Uuid,
        period: usize,
        pattern: Vec<NodeId>,
    },
    Finished {
        story_id: Uuid,
        reason: StopReason,
        iterations: u32,
    },
}

/// Final state of a run and why it ended
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: WorkflowState,
    pub reason: StopReason,
}

/// Cooperative cancellation flag for a running story
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Create a signal and the sender that trips it
    pub fn channel() -> (watch::Sender<bool>, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, StopSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> StopSignal {
        let (_tx, signal) = Self::channel();
        signal
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is tripped
    async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

enum Outcome {
    Agent(AgentResponse),
    Review(ReviewDecision),
}

/// Builder for `Orchestrator`
pub struct OrchestratorBuilder {
    config: EngineConfig,
    registry: AgentRegistry,
    reviewer: Option<Arc<dyn Reviewer>>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    events: Option<mpsc::Sender<WorkflowEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            config: EngineConfig::default(),
            registry,
            reviewer: None,
            knowledge: None,
            events: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn events(mut self, tx: mpsc::Sender<WorkflowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn build(self) -> Result<Orchestrator, QuillError> {
        self.config.validate()?;

        let phases = PhaseManager::new(self.config.phase.clone());
        let router = Router::new(phases.clone(), self.registry.available());
        let cycle = CycleGuard::new(&self.config.cycle);
        let reviewer = self
            .reviewer
            .unwrap_or_else(|| Arc::new(PolicyReviewer::new(self.config.review.policy)));
        let knowledge = self
            .knowledge
            .unwrap_or_else(|| Arc::new(NullKnowledgeStore));

        log::info!(
            "Orchestrator ready with {} agents: {:?}",
            self.registry.len(),
            self.registry.available()
        );

        Ok(Orchestrator {
            config: self.config,
            registry: self.registry,
            router,
            phases,
            cycle,
            reviewer,
            knowledge,
            events: self.events,
        })
    }
}

/// Drives stories through the workflow graph
pub struct Orchestrator {
    config: EngineConfig,
    registry: AgentRegistry,
    router: Router,
    phases: PhaseManager,
    cycle: CycleGuard,
    reviewer: Arc<dyn Reviewer>,
    knowledge: Arc<dyn KnowledgeStore>,
    events: Option<mpsc::Sender<WorkflowEvent>>,
}

impl Orchestrator {
    pub fn builder(registry: AgentRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn knowledge(&self) -> Arc<dyn KnowledgeStore> {
        self.knowledge.clone()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn phases(&self) -> &PhaseManager {
        &self.phases
    }

    /// Run a story to completion
    pub async fn run(
        &self,
        initial: WorkflowState,
        max_iterations: u32,
        target_chapters: u32,
    ) -> RunReport {
        self.run_until(initial, max_iterations, target_chapters, StopSignal::never())
            .await
    }

    /// Run a story until it finishes or `stop` fires
    pub async fn run_until(
        &self,
        initial: WorkflowState,
        max_iterations: u32,
        target_chapters: u32,
        mut stop: StopSignal,
    ) -> RunReport {
        let mut state = initial;
        state.max_iterations = max_iterations;
        state.target_mid_completion = target_chapters;
        state.execution_log.resize(self.config.cycle.window);
        if state.story_status == StoryStatus::Draft {
            state.story_status = StoryStatus::InProgress;
        }
        state = self.phases.update_phase_progress(&state);
        let story_id = state.story_id;

        log::info!(
            "Starting story '{}' ({}) for up to {} iterations, {} chapters",
            state.title,
            story_id,
            max_iterations,
            target_chapters
        );

        while state.should_continue()
            && (state.completed_chapters.len() as u32) < target_chapters
        {
            if stop.is_stopped() {
                return self.finish(state, StopReason::Cancelled).await;
            }

            let node = self.router.resolve(state.last_node(), &state);
            if node == NodeId::End {
                break;
            }

            let mut next = state.clone();
            next.iteration_count += 1;
            next.next_agent = None;
            let iteration = next.iteration_count;

            log::info!(
                "Iteration {}: {} in {} phase",
                iteration,
                node,
                next.current_hierarchical_phase
            );
            self.emit(WorkflowEvent::NodeStarted {
                story_id,
                iteration,
                node,
            })
            .await;

            let outcome = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    log::warn!("Story {} cancelled during {}", story_id, node);
                    return self.finish(state, StopReason::Cancelled).await;
                }
                outcome = self.dispatch(node, &next) => outcome,
            };

            let merged = outcome.and_then(|outcome| match outcome {
                Outcome::Agent(response) => {
                    let record = json!({
                        "agent": response.agent_name,
                        "content": response.content,
                    });
                    merge::apply_response(
                        &mut next,
                        node,
                        response,
                        self.config.review.enabled,
                    )
                    .map(|_| Some(record))
                }
                Outcome::Review(decision) => {
                    merge::apply_review(&mut next, decision);
                    Ok(None)
                }
            });

            match merged {
                Ok(record) => {
                    if let Some(record) = record {
                        self.remember(&next, node, record).await;
                    }
                    self.emit(WorkflowEvent::NodeCompleted {
                        story_id,
                        iteration,
                        node,
                    })
                    .await;
                }
                Err(e) => {
                    next.error_count += 1;
                    next.last_error = Some(format!("{} node error: {}", node, e));
                    log::warn!(
                        "Node {} failed ({}/{}): {}",
                        node,
                        next.error_count,
                        MAX_ERRORS,
                        e
                    );
                    self.emit(WorkflowEvent::NodeFailed {
                        story_id,
                        iteration,
                        node,
                        error: e.to_string(),
                    })
                    .await;
                }
            }

            next = self.phases.update_phase_progress(&next);
            let before = next.current_hierarchical_phase;
            next = self.phases.advance(&next);
            self.phase_event(story_id, before, &next, false).await;

            let progress = next.progress();
            next.execution_log.push(node, progress);

            if let Some(report) = self.cycle.detect_cycle(&next.execution_log) {
                log::warn!(
                    "Cycle of period {} detected in story {}: {:?}",
                    report.period,
                    story_id,
                    report.pattern
                );
                self.emit(WorkflowEvent::CycleDetected {
                    story_id,
                    period: report.period,
                    pattern: report.pattern,
                })
                .await;

                let before = next.current_hierarchical_phase;
                next = self
                    .phases
                    .mark_forced_transition(&next, self.cycle.strategy());
                next.execution_log.clear();
                self.phase_event(story_id, before, &next, true).await;
            }

            state = next;
        }

        let reason = if state.completed_chapters.len() as u32 >= target_chapters {
            state.story_status = StoryStatus::Complete;
            StopReason::Completed
        } else if state.error_count >= MAX_ERRORS {
            log::error!(
                "Story {} stopped after {} errors, last: {}",
                story_id,
                state.error_count,
                state.last_error.as_deref().unwrap_or("none")
            );
            StopReason::ErrorLimit
        } else if state.story_status == StoryStatus::Complete {
            StopReason::Completed
        } else if state.iteration_count >= max_iterations {
            log::error!("Story {} hit the iteration cap of {}", story_id, max_iterations);
            StopReason::IterationLimit
        } else {
            log::warn!(
                "No runnable node for story {} in {} phase",
                story_id,
                state.current_hierarchical_phase
            );
            StopReason::NoRunnableNode
        };

        self.finish(state, reason).await
    }

    async fn finish(&self, state: WorkflowState, reason: StopReason) -> RunReport {
        log::info!(
            "Story {} finished after {} iterations: {:?}",
            state.story_id,
            state.iteration_count,
            reason
        );
        self.emit(WorkflowEvent::Finished {
            story_id: state.story_id,
            reason,
            iterations: state.iteration_count,
        })
        .await;
        RunReport { state, reason }
    }

    /// Execute one node against a snapshot
    async fn dispatch(&self, node: NodeId, state: &WorkflowState) -> Result<Outcome, NodeError> {
        if node == NodeId::HumanReview {
            let secs = self.config.review.timeout_secs;
            let review = self.reviewer.review(review_request(state));
            let decision = match tokio::time::timeout(Duration::from_secs(secs), review).await {
                Ok(decision) => decision?,
                Err(_) => {
                    log::warn!(
                        "No review of story {} within {}s, applying {:?} policy",
                        state.story_id,
                        secs,
                        self.config.review.policy
                    );
                    self.config
                        .review
                        .policy
                        .decide(&format!("review timed out after {}s", secs))?
                }
            };
            return Ok(Outcome::Review(decision));
        }

        let agent = self
            .registry
            .get(node)
            .ok_or_else(|| NodeError::MissingCollaborator(node.to_string()))?;

        let secs = self.config.agent_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), agent.process(state.agent_context()))
            .await
        {
            Ok(Ok(response)) => Ok(Outcome::Agent(response)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NodeError::Timeout {
                node: node.to_string(),
                secs,
            }),
        }
    }

    /// Side-log a node output; failures never affect the run
    async fn remember(&self, state: &WorkflowState, node: NodeId, record: serde_json::Value) {
        let key = format!("{}/{}_{}", state.story_id, node, state.iteration_count);
        let metadata = json!({
            "story_id": state.story_id,
            "node": node,
            "iteration": state.iteration_count,
            "hierarchical_phase": state.current_hierarchical_phase,
        });
        if let Err(e) = self.knowledge.store_memory(&key, record, Some(metadata)).await {
            log::warn!("Could not store {} in knowledge store: {}", key, e);
        }
    }

    async fn phase_event(
        &self,
        story_id: Uuid,
        from: HierarchicalPhase,
        state: &WorkflowState,
        forced: bool,
    ) {
        let to = state.current_hierarchical_phase;
        if from != to {
            self.emit(WorkflowEvent::PhaseChanged {
                story_id,
                from,
                to,
                forced,
            })
            .await;
        }
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

fn review_request(state: &WorkflowState) -> ReviewRequest {
    ReviewRequest {
        story_id: state.story_id.to_string(),
        title: state.title.clone(),
        chapter_number: (state.current_chapter_index > 0).then_some(state.current_chapter_index),
        excerpt: state.current_chapter.chars().take(EXCERPT_CHARS).collect(),
        hierarchical_phase: state.current_hierarchical_phase.to_string(),
    }
}
