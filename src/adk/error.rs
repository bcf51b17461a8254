// SPDX-License-Identifier: MIT

//! Typed error handling for quill-rs
//!
//! Errors are split by how the engine recovers from them:
//! - `NodeError` - one agent turn went wrong; the run loop records it and continues
//! - `WorkflowError` - a routing or phase decision was illegal; the router falls back
//! - `ConfigError` - bad input before a story exists; returned to the caller
//! - `QuillError` - top-level error for the control surface

use thiserror::Error;

/// Top-level error type for quill-rs
#[derive(Debug, Error)]
pub enum QuillError {
    /// Configuration errors (missing story fields, invalid engine config)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Workflow-specific errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// A node failed outside the run loop
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// No story is registered under the handle
    #[error("Story '{0}' not found")]
    StoryNotFound(String),

    /// The story already has a run in flight
    #[error("Story '{0}' is already running")]
    AlreadyRunning(String),

    /// A persisted snapshot violates a state invariant
    #[error("Invalid story state: {0}")]
    InvalidState(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Failure of a single node execution
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NodeError {
    /// The agent collaborator raised an error
    #[error("{message}")]
    Agent { node: String, message: String },

    /// The agent answered with a `failed` status
    #[error("agent '{agent}' reported failure: {message}")]
    Failed { agent: String, message: String },

    /// The agent's output could not be merged into the story
    #[error("invalid output from {node}: {message}")]
    InvalidOutput { node: String, message: String },

    /// The agent call exceeded the per-call timeout
    #[error("{node} timed out after {secs}s")]
    Timeout { node: String, secs: u64 },

    /// No collaborator is registered for the node
    #[error("no collaborator registered for {0}")]
    MissingCollaborator(String),

    /// The reviewer could not produce a decision
    #[error("review failed: {0}")]
    Review(String),
}

/// Workflow-specific errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    /// Requested phase transition skips a level or stays in place
    #[error("Illegal phase transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// A hint or route named a node that does not exist
    #[error("Unknown node id: {0}")]
    UnknownNode(String),

    /// The node may not run in the current phase
    #[error("Node {node} is not allowed in the {phase} phase")]
    NodeNotAllowed { node: String, phase: String },

    /// Only agent nodes can be backed by a collaborator
    #[error("Node {0} cannot be backed by an agent")]
    NotAnAgent(String),
}

/// Configuration errors, fatal before the first iteration
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A required story field is missing or blank
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// An engine setting is out of range
    #[error("Invalid setting '{key}': {message}")]
    Invalid { key: String, message: String },
}

/// Knowledge store backend errors
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Knowledge store error: {0}")]
pub struct KnowledgeError(pub String);

impl NodeError {
    /// Create an agent error
    pub fn agent(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create an invalid output error
    pub fn invalid_output(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOutput {
            node: node.into(),
            message: message.into(),
        }
    }
}

impl ConfigError {
    /// Create an invalid setting error
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<&str> for NodeError {
    fn from(s: &str) -> Self {
        Self::Agent {
            node: "unknown".to_string(),
            message: s.to_string(),
        }
    }
}

impl From<String> for NodeError {
    fn from(s: String) -> Self {
        Self::Agent {
            node: "unknown".to_string(),
            message: s,
        }
    }
}
