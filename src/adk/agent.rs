// SPDX-License-Identifier: MIT

//! Agent collaborator contract
//!
//! Every specialised agent (planner, writer, editor, ...) is driven through
//! the `Agent` trait. The engine hands it a read-only `AgentContext` and
//! merges the returned `AgentResponse` into a fresh state snapshot.

use crate::adk::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Core agent trait for all story agents
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name
    fn name(&self) -> &str;

    /// Process the current story context and produce one response
    async fn process(&self, context: AgentContext) -> Result<AgentResponse, NodeError>;
}

/// Outcome reported by an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Success,
    Failed,
}

/// Standardized response from an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub agent_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl AgentResponse {
    /// Successful response with the given content
    pub fn success(agent_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            content: content.into(),
            reasoning: None,
            suggestions: Vec::new(),
            status: AgentStatus::Success,
            metadata: None,
        }
    }

    /// Failed response carrying the failure message as content
    pub fn failed(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            ..Self::success(agent_name, message)
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Look up a metadata entry
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// Read-only projection of the story state handed to agents
///
/// The projection is a JSON map so agents stay decoupled from the engine's
/// state layout. Typed accessors cover the fields most agents read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentContext {
    fields: Map<String, Value>,
}

impl AgentContext {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string field, empty when absent
    pub fn get_str(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.get_str("title")
    }

    pub fn current_chapter(&self) -> &str {
        self.get_str("current_chapter")
    }

    /// Number of chapters already written
    pub fn chapter_count(&self) -> usize {
        self.fields
            .get("chapters")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
