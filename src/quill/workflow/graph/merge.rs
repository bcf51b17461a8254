// SPDX-License-Identifier: MIT

//! Applying node results to a state snapshot
//!
//! Every rule validates the response before touching the snapshot, so a
//! rejected response leaves it as it was.

use chrono::Utc;
use serde_json::{Map, Value};

use super::types::NodeId;
use crate::adk::agent::AgentResponse;
use crate::adk::error::NodeError;
use crate::adk::review::{ReviewDecision, ReviewVerdict};
use crate::quill::workflow::phase::has_chapter_plans;
use crate::quill::workflow::state::{
    HierarchicalPhase, HumanFeedback, ReviewStatus, StoryStatus, WorkPhase, WorkflowState,
};

/// Merge an agent response into `state`
pub(crate) fn apply_response(
    state: &mut WorkflowState,
    node: NodeId,
    response: AgentResponse,
    review_enabled: bool,
) -> Result<(), NodeError> {
    if !response.is_success() {
        return Err(NodeError::Failed {
            agent: response.agent_name.clone(),
            message: response.content.clone(),
        });
    }

    match node {
        NodeId::Planner => {
            let plan = parse_object(node, &response.content)?;
            let chapter_plan = Value::Object(plan.clone());
            state.outline.extend(plan);
            if state.current_hierarchical_phase == HierarchicalPhase::Mid
                && !has_chapter_plans(&state.outline)
            {
                state
                    .outline
                    .insert("current_chapter_outline".into(), chapter_plan);
            }
            state.current_phase = WorkPhase::Writing;
        }
        NodeId::WorldBuilder => {
            let details = parse_object(node, &response.content)?;
            state.world_details.extend(details);
        }
        NodeId::Writer => {
            if response.content.trim().is_empty() {
                return Err(NodeError::invalid_output(node.as_str(), "empty chapter"));
            }
            let number = state.chapters.len() as u32 + 1;
            let title = chapter_title(state, &response, number);
            state.add_chapter(&response.content, number, &title);
            state.current_chapter = response.content.clone();
            state.current_phase = WorkPhase::Editing;
            if review_enabled {
                state.needs_human_review = true;
                state.human_review_status = ReviewStatus::Pending;
            }
        }
        NodeId::Editor | NodeId::Humanizer => {
            if !response.content.trim().is_empty() {
                revise_draft(state, &response.content);
            }
            state.current_phase = WorkPhase::Editing;
        }
        NodeId::ConsistencyChecker | NodeId::DialogueSpecialist | NodeId::PacingAdvisor => {
            if response.suggestions.is_empty() {
                let note = response.content.trim();
                if !note.is_empty() {
                    state.story_notes.push(format!("{}: {}", node, note));
                }
            } else {
                state.story_notes.extend(response.suggestions.iter().cloned());
            }
            if node == NodeId::PacingAdvisor {
                state.current_phase = WorkPhase::Review;
            }
        }
        NodeId::Archivist => {
            let record = parse_json(&response.content)
                .unwrap_or_else(|| Value::String(response.content.clone()));
            state.retrieved_knowledge.push(record);
            state.current_chapter.clear();
            state.current_phase = WorkPhase::Planning;
        }
        NodeId::HumanReview | NodeId::End => {
            return Err(NodeError::agent(
                node.as_str(),
                "node does not accept agent responses",
            ));
        }
    }

    apply_directives(state, &response);
    state.add_agent_response(response);
    Ok(())
}

/// Record a reviewer decision
pub(crate) fn apply_review(state: &mut WorkflowState, decision: ReviewDecision) {
    state.needs_human_review = false;
    state.human_review_status = match decision.verdict {
        ReviewVerdict::Approved => ReviewStatus::Approved,
        ReviewVerdict::Rejected => ReviewStatus::Rejected,
    };
    if let Some(feedback) = decision.feedback {
        state.human_feedback.push(HumanFeedback {
            timestamp: Utc::now(),
            feedback,
            target_chapter: state.current_chapter_index,
            kind: "review".to_string(),
        });
    }
}

/// Metadata keys any agent may set
fn apply_directives(state: &mut WorkflowState, response: &AgentResponse) {
    if let Some(hint) = response.meta("next_agent").and_then(Value::as_str) {
        state.next_agent = Some(hint.to_string());
    }
    if let Some(flag) = response.meta("needs_human_review").and_then(Value::as_bool) {
        state.needs_human_review = flag;
        if flag {
            state.human_review_status = ReviewStatus::Pending;
        }
    }
    if let Some(raw) = response.meta("story_status").and_then(Value::as_str) {
        match StoryStatus::parse(raw) {
            Some(status) => state.story_status = status,
            None => log::warn!(
                "{} sent unknown story_status '{}'",
                response.agent_name,
                raw
            ),
        }
    }
}

fn revise_draft(state: &mut WorkflowState, content: &str) {
    state.current_chapter = content.to_string();
    if let Some(chapter) = state.latest_chapter_mut() {
        chapter.content = content.to_string();
        chapter.word_count = content.split_whitespace().count();
    }
}

fn chapter_title(state: &WorkflowState, response: &AgentResponse, number: u32) -> String {
    if let Some(title) = response.meta("title").and_then(Value::as_str) {
        return title.to_string();
    }
    state
        .outline
        .get("chapters")
        .and_then(Value::as_array)
        .and_then(|plans| plans.get(number as usize - 1))
        .and_then(|plan| plan.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Chapter {}", number))
}

/// Parse JSON, tolerating a surrounding markdown code fence
fn parse_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

fn parse_object(node: NodeId, content: &str) -> Result<Map<String, Value>, NodeError> {
    match parse_json(content) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(NodeError::invalid_output(
            node.as_str(),
            "expected a JSON object",
        )),
        None => Err(NodeError::invalid_output(node.as_str(), "output is not JSON")),
    }
}
