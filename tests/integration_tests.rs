//! Integration tests for story orchestration
//!
//! These tests drive whole runs end-to-end using mock agents and reviewers.

use async_trait::async_trait;
use quill_rs::adk::agent::{Agent, AgentContext, AgentResponse};
use quill_rs::adk::error::{NodeError, QuillError};
use quill_rs::adk::knowledge::InMemoryKnowledgeStore;
use quill_rs::adk::review::{ReviewDecision, ReviewRequest, Reviewer};
use quill_rs::quill::workflow::config::{ConfigLoader, EngineConfig};
use quill_rs::quill::workflow::engine::{StorySeed, StoryEngine};
use quill_rs::quill::workflow::graph::{NodeId, Orchestrator, StopReason, WorkflowEvent};
use quill_rs::quill::workflow::phase::PhaseManager;
use quill_rs::quill::workflow::registry::AgentRegistry;
use quill_rs::quill::workflow::state::{
    HierarchicalPhase, ReviewStatus, StoryStatus, WorkflowState, MAX_ERRORS,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Mock Components
// ============================================================================

type Respond = fn(&AgentContext) -> Result<AgentResponse, NodeError>;

/// Mock agent that answers with a fixed function and records where it ran
struct MockAgent {
    name: String,
    respond: Respond,
    calls: AtomicU32,
    phases: Mutex<Vec<HierarchicalPhase>>,
}

impl MockAgent {
    fn new(name: &str, respond: Respond) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            respond,
            calls: AtomicU32::new(0),
            phases: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn phases(&self) -> Vec<HierarchicalPhase> {
        self.phases.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, context: AgentContext) -> Result<AgentResponse, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(phase) = context
            .get("hierarchical_phase")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
        {
            self.phases.lock().unwrap().push(phase);
        }
        (self.respond)(&context)
    }
}

/// Mock agent that never answers
struct StalledAgent;

#[async_trait]
impl Agent for StalledAgent {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn process(&self, _context: AgentContext) -> Result<AgentResponse, NodeError> {
        std::future::pending::<()>().await;
        Err(NodeError::from("unreachable"))
    }
}

/// Mock reviewer that never answers
struct SilentReviewer;

#[async_trait]
impl Reviewer for SilentReviewer {
    async fn review(&self, _request: ReviewRequest) -> Result<ReviewDecision, NodeError> {
        std::future::pending::<()>().await;
        Err(NodeError::Review("unreachable".into()))
    }
}

/// Mock reviewer replaying scripted decisions, approving once the script runs out
struct ScriptedReviewer {
    decisions: Mutex<VecDeque<ReviewDecision>>,
    requests: Mutex<Vec<ReviewRequest>>,
}

impl ScriptedReviewer {
    fn new(decisions: Vec<ReviewDecision>) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.into()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    async fn review(&self, request: ReviewRequest) -> Result<ReviewDecision, NodeError> {
        self.requests.lock().unwrap().push(request);
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ReviewDecision::approve))
    }
}

const PLAN: &str = r#"{"premise": "a lighthouse keeper", "chapters": [{"title": "Dusk"}, {"title": "Dawn"}, {"title": "Noon"}]}"#;

fn plan(_: &AgentContext) -> Result<AgentResponse, NodeError> {
    Ok(AgentResponse::success("planner", PLAN))
}

fn plan_premise(_: &AgentContext) -> Result<AgentResponse, NodeError> {
    Ok(AgentResponse::success("planner", r#"{"premise": "a storm"}"#))
}

fn write(ctx: &AgentContext) -> Result<AgentResponse, NodeError> {
    Ok(AgentResponse::success(
        "writer",
        format!("{} chapter {}", ctx.title(), ctx.chapter_count() + 1),
    ))
}

fn fail_write(_: &AgentContext) -> Result<AgentResponse, NodeError> {
    Err(NodeError::agent("writer", "model quota exhausted"))
}

fn write_with_bad_hint(ctx: &AgentContext) -> Result<AgentResponse, NodeError> {
    Ok(write(ctx)?.with_metadata("next_agent", json!("world_builder")))
}

fn build_world(_: &AgentContext) -> Result<AgentResponse, NodeError> {
    Ok(AgentResponse::success("world_builder", r#"{"island": "windswept"}"#))
}

fn edit(_: &AgentContext) -> Result<AgentResponse, NodeError> {
    Ok(AgentResponse::success("editor", "Tightened."))
}

fn registry(agents: &[(NodeId, Arc<MockAgent>)]) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for (node, agent) in agents {
        registry.register(*node, agent.clone()).unwrap();
    }
    registry
}

fn drain(rx: &mut mpsc::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn started_nodes(events: &[WorkflowEvent]) -> Vec<NodeId> {
    events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeStarted { node, .. } => Some(*node),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Run Loop Tests
// ============================================================================

#[tokio::test]
async fn test_planner_and_writer_finish_two_chapters() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", write);
    let (tx, mut rx) = mpsc::channel(1024);
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner.clone()),
        (NodeId::Writer, writer.clone()),
    ]))
    .events(tx)
    .build()
    .unwrap();

    let report = orchestrator.run(WorkflowState::new("Light"), 5, 2).await;
    let state = report.state;

    assert_eq!(report.reason, StopReason::Completed);
    assert_eq!(state.story_status, StoryStatus::Complete);
    assert_eq!(state.chapters.len(), 2);
    assert!(state.iteration_count <= 5);
    assert_eq!(state.iteration_count, 4);
    assert_eq!(state.error_count, 0);
    assert_eq!(state.chapters[1].title, "Dawn");

    let events = drain(&mut rx);
    assert_eq!(
        started_nodes(&events),
        vec![NodeId::Planner, NodeId::Planner, NodeId::Writer, NodeId::Writer]
    );
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::Finished {
            reason: StopReason::Completed,
            iterations: 4,
            ..
        })
    ));
}

#[tokio::test]
async fn test_outline_without_chapter_plans_still_reaches_writing() {
    let planner = MockAgent::new("planner", plan_premise);
    let writer = MockAgent::new("writer", write);
    let (tx, mut rx) = mpsc::channel(1024);
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner.clone()),
        (NodeId::Writer, writer.clone()),
    ]))
    .events(tx)
    .build()
    .unwrap();

    let report = orchestrator.run(WorkflowState::new("Storm"), 5, 2).await;
    let state = report.state;

    assert_eq!(report.reason, StopReason::Completed);
    assert_eq!(state.chapters.len(), 2);
    assert!(state.iteration_count <= 5);
    assert_eq!(state.chapters[0].title, "Chapter 1");
    assert!(state.outline.contains_key("current_chapter_outline"));
    assert_eq!(planner.calls(), 2);
    assert_eq!(writer.calls(), 2);
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, WorkflowEvent::CycleDetected { .. })));
}

#[tokio::test]
async fn test_failing_writer_stops_at_error_cap() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", fail_write);
    let (tx, mut rx) = mpsc::channel(1024);
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner),
        (NodeId::Writer, writer.clone()),
    ]))
    .events(tx)
    .build()
    .unwrap();

    let report = orchestrator.run(WorkflowState::new("Quota"), 50, 3).await;
    let state = report.state;

    assert_eq!(report.reason, StopReason::ErrorLimit);
    assert_eq!(state.error_count, MAX_ERRORS);
    assert!(!state.should_continue());
    assert_eq!(writer.calls(), MAX_ERRORS);
    assert_eq!(
        state.last_error.as_deref(),
        Some("writer node error: model quota exhausted")
    );
    assert!(state.chapters.is_empty());

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::CycleDetected { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::PhaseChanged {
            from: HierarchicalPhase::Micro,
            to: HierarchicalPhase::Mid,
            forced: true,
            ..
        }
    )));
}

#[tokio::test]
async fn test_disallowed_hint_is_never_dispatched() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", write_with_bad_hint);
    let world_builder = MockAgent::new("world_builder", build_world);
    let agents = [
        (NodeId::Planner, planner.clone()),
        (NodeId::Writer, writer.clone()),
        (NodeId::WorldBuilder, world_builder.clone()),
    ];
    let orchestrator = Orchestrator::builder(registry(&agents)).build().unwrap();

    let mut seed = WorkflowState::new("Hints");
    for place in ["harbour", "lighthouse", "village"] {
        seed.world_details.insert(place.into(), json!("known"));
    }
    let report = orchestrator.run(seed, 20, 2).await;

    assert_eq!(report.reason, StopReason::Completed);
    assert_eq!(world_builder.calls(), 0);
    assert_eq!(writer.calls(), 2);
    for (node, agent) in &agents {
        for phase in agent.phases() {
            assert!(
                PhaseManager::should_execute_agent_in_phase(*node, phase),
                "{} ran in {}",
                node,
                phase
            );
        }
    }
}

#[tokio::test]
async fn test_phase_changes_are_adjacent() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", fail_write);
    let (tx, mut rx) = mpsc::channel(1024);
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner),
        (NodeId::Writer, writer),
    ]))
    .events(tx)
    .build()
    .unwrap();

    orchestrator.run(WorkflowState::new("Steps"), 50, 3).await;

    let changes: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkflowEvent::PhaseChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert!(!changes.is_empty());
    for (from, to) in changes {
        assert!(from.is_adjacent(to), "{} -> {}", from, to);
    }
}

// ============================================================================
// Human Review Tests
// ============================================================================

#[tokio::test]
async fn test_rejected_review_routes_to_editor() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", write);
    let editor = MockAgent::new("editor", edit);
    let reviewer = ScriptedReviewer::new(vec![ReviewDecision::reject("slower opening")]);

    let mut config = EngineConfig::default();
    config.review.enabled = true;
    let (tx, mut rx) = mpsc::channel(1024);
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner),
        (NodeId::Writer, writer),
        (NodeId::Editor, editor.clone()),
    ]))
    .config(config)
    .reviewer(reviewer.clone())
    .events(tx)
    .build()
    .unwrap();

    let report = orchestrator.run(WorkflowState::new("Review"), 12, 3).await;
    let state = report.state;

    assert_eq!(report.reason, StopReason::Completed);
    assert_eq!(
        started_nodes(&drain(&mut rx)),
        vec![
            NodeId::Planner,
            NodeId::Planner,
            NodeId::Writer,
            NodeId::HumanReview,
            NodeId::Editor,
            NodeId::Writer,
            NodeId::HumanReview,
            NodeId::Writer,
        ]
    );
    assert_eq!(editor.calls(), 1);
    assert_eq!(state.chapters[0].content, "Tightened.");
    assert_eq!(state.human_feedback.len(), 1);
    assert_eq!(state.human_feedback[0].feedback, "slower opening");
    assert_eq!(state.human_feedback[0].kind, "review");

    let requests = reviewer.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].chapter_number, Some(1));
    assert_eq!(requests[1].chapter_number, Some(2));
}

#[tokio::test]
async fn test_default_policy_never_approves_silently() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", write);
    let mut config = EngineConfig::default();
    config.review.enabled = true;
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner),
        (NodeId::Writer, writer),
    ]))
    .config(config)
    .build()
    .unwrap();

    let report = orchestrator.run(WorkflowState::new("Unreviewed"), 4, 3).await;
    let state = report.state;

    assert_ne!(state.human_review_status, ReviewStatus::Approved);
    assert_eq!(state.error_count, 1);
    assert!(state
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("human_review node error: review failed"));
}

#[tokio::test]
async fn test_silent_reviewer_does_not_hang_the_run() {
    let planner = MockAgent::new("planner", plan);
    let writer = MockAgent::new("writer", write);
    let mut config = EngineConfig::default();
    config.agent_timeout_secs = 1;
    config.review.enabled = true;
    config.review.timeout_secs = 1;
    let orchestrator = Orchestrator::builder(registry(&[
        (NodeId::Planner, planner),
        (NodeId::Writer, writer),
    ]))
    .config(config)
    .reviewer(Arc::new(SilentReviewer))
    .build()
    .unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(WorkflowState::new("Waiting"), 4, 3),
    )
    .await
    .expect("run should finish once the review times out");
    let state = report.state;

    assert_eq!(state.iteration_count, 4);
    assert_ne!(state.human_review_status, ReviewStatus::Approved);
    assert_eq!(
        state.last_error.as_deref(),
        Some("human_review node error: review failed: review timed out after 1s")
    );
}

// ============================================================================
// Story Engine Tests
// ============================================================================

fn engine_with(agents: &[(NodeId, Arc<MockAgent>)]) -> (StoryEngine, Arc<InMemoryKnowledgeStore>) {
    let store = Arc::new(InMemoryKnowledgeStore::new());
    let orchestrator = Orchestrator::builder(registry(agents))
        .knowledge(store.clone())
        .build()
        .unwrap();
    (StoryEngine::new(orchestrator), store)
}

#[tokio::test]
async fn test_engine_run_and_status() {
    let (engine, _) = engine_with(&[
        (NodeId::Planner, MockAgent::new("planner", plan)),
        (NodeId::Writer, MockAgent::new("writer", write)),
    ]);
    let handle = engine.create_story(StorySeed::new("Harbour")).await.unwrap();

    let state = engine.run(&handle, 10, 2).await.unwrap();
    assert_eq!(state.story_status, StoryStatus::Complete);

    let status = engine.get_status(&handle).await.unwrap();
    assert!(!status.is_running);
    assert_eq!(status.completed_chapters, 2);
    assert_eq!(status.iteration_count, 4);
    assert!(status.progress.in_bounds());
}

#[tokio::test]
async fn test_engine_cancel_keeps_last_good_state() {
    let mut registry = registry(&[(NodeId::Planner, MockAgent::new("planner", plan))]);
    registry
        .register(NodeId::Writer, Arc::new(StalledAgent))
        .unwrap();
    let engine = StoryEngine::new(Orchestrator::builder(registry).build().unwrap());
    let handle = engine.create_story(StorySeed::new("Halt")).await.unwrap();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.get_status(&handle).await.unwrap().is_running);
        assert!(matches!(
            engine.run(&handle, 10, 2).await,
            Err(QuillError::AlreadyRunning(_))
        ));
        assert!(engine.cancel(&handle).await.unwrap());
    };
    let (result, _) = tokio::join!(engine.run(&handle, 10, 2), cancel);

    let state = result.unwrap();
    assert_eq!(state.iteration_count, 2);
    assert!(state.chapters.is_empty());
    assert!(!engine.get_status(&handle).await.unwrap().is_running);
    assert_eq!(engine.snapshot(&handle).await.unwrap(), state);
}

#[tokio::test]
async fn test_concurrent_stories_stay_isolated() {
    let (engine, store) = engine_with(&[
        (NodeId::Planner, MockAgent::new("planner", plan)),
        (NodeId::Writer, MockAgent::new("writer", write)),
    ]);

    let mut handles = Vec::new();
    for title in ["North", "South", "East"] {
        handles.push(engine.create_story(StorySeed::new(title)).await.unwrap());
    }

    let results =
        futures::future::join_all(handles.iter().map(|h| engine.run(h, 10, 2))).await;

    for (handle, result) in handles.iter().zip(results) {
        let state = result.unwrap();
        assert_eq!(state.story_id, handle.id());
        assert_eq!(state.chapters.len(), 2);
        assert!(state
            .chapters
            .iter()
            .all(|c| c.content.starts_with(&state.title)));
    }

    let keys = store.keys().await;
    for handle in &handles {
        let prefix = format!("{}/", handle);
        assert_eq!(
            keys.iter().filter(|k| k.starts_with(&prefix)).count(),
            5,
            "story record plus four node outputs for {}",
            handle
        );
    }
}

#[tokio::test]
async fn test_save_and_load_story() {
    let (engine, _) = engine_with(&[
        (NodeId::Planner, MockAgent::new("planner", plan)),
        (NodeId::Writer, MockAgent::new("writer", write)),
    ]);
    let handle = engine.create_story(StorySeed::new("Archive")).await.unwrap();
    engine.run(&handle, 10, 2).await.unwrap();
    engine
        .add_human_feedback(&handle, "keep the ending", None)
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.json");
    engine.save_story(&handle, &path).await.unwrap();

    let (other, _) = engine_with(&[]);
    let loaded = other.load_story(&path).await.unwrap();
    assert_eq!(loaded, handle);
    assert_eq!(
        other.snapshot(&loaded).await.unwrap(),
        engine.snapshot(&handle).await.unwrap()
    );
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_file_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quill.yaml");
    std::fs::write(&path, "cycle:\n  window: 6\n").unwrap();

    let err = ConfigLoader::new().load_config(&path).unwrap_err();
    assert!(matches!(err, QuillError::Config(_)));

    std::fs::write(&path, "max_iterations: 20\nphase:\n  min_world_details: 1\n").unwrap();
    let config = ConfigLoader::new().load_config(&path).unwrap();
    assert_eq!(config.max_iterations, 20);
    assert_eq!(config.phase.min_world_details, 1);
}
