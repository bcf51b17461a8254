// SPDX-License-Identifier: MIT

use crate::adk::agent::Agent;
use crate::adk::error::WorkflowError;
use crate::quill::workflow::graph::NodeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Agents attached to workflow nodes, fixed once the orchestrator is built
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<NodeId, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: NodeId, agent: Arc<dyn Agent>) -> Result<(), WorkflowError> {
        if !node.is_agent() {
            return Err(WorkflowError::NotAnAgent(node.to_string()));
        }
        log::debug!("Registering agent '{}' for node {}", agent.name(), node);
        self.agents.insert(node, agent);
        Ok(())
    }

    /// Builder form of `register`
    pub fn with(mut self, node: NodeId, agent: Arc<dyn Agent>) -> Result<Self, WorkflowError> {
        self.register(node, agent)?;
        Ok(self)
    }

    pub fn get(&self, node: NodeId) -> Option<Arc<dyn Agent>> {
        self.agents.get(&node).cloned()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.agents.contains_key(&node)
    }

    /// Nodes with an attached agent, in declaration order
    pub fn available(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.agents.keys().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
