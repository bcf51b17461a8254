// SPDX-License-Identifier: MIT

//! Knowledge store collaborator contract
//!
//! The engine only writes to the store (node outputs, feedback, story
//! creation). Nothing read back from it drives routing.

use crate::adk::error::KnowledgeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub metadata: Option<Value>,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Store a memory under `key`
    async fn store_memory(
        &self,
        key: &str,
        value: Value,
        metadata: Option<Value>,
    ) -> Result<(), KnowledgeError>;

    /// Search stored memories
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, KnowledgeError>;
}

/// Store that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullKnowledgeStore;

#[async_trait]
impl KnowledgeStore for NullKnowledgeStore {
    async fn store_memory(
        &self,
        _key: &str,
        _value: Value,
        _metadata: Option<Value>,
    ) -> Result<(), KnowledgeError> {
        Ok(())
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
struct Memory {
    value: Value,
    metadata: Option<Value>,
}

/// In-process store keyed by exact memory key
///
/// `search` is a case-insensitive substring match over keys and values with
/// a constant score; it is meant for tests and local runs, not retrieval.
#[derive(Clone, Default)]
pub struct InMemoryKnowledgeStore {
    memories: Arc<RwLock<BTreeMap<String, Memory>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored value by key
    pub async fn get(&self, key: &str) -> Option<Value> {
        let memories = self.memories.read().await;
        memories.get(key).map(|m| m.value.clone())
    }

    /// All stored keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        let memories = self.memories.read().await;
        memories.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memories.read().await.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn store_memory(
        &self,
        key: &str,
        value: Value,
        metadata: Option<Value>,
    ) -> Result<(), KnowledgeError> {
        let mut memories = self.memories.write().await;
        memories.insert(key.to_string(), Memory { value, metadata });
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
        let needle = query.to_lowercase();
        let memories = self.memories.read().await;

        let hits = memories
            .iter()
            .filter_map(|(key, memory)| {
                let text = match &memory.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let matches = key.to_lowercase().contains(&needle)
                    || text.to_lowercase().contains(&needle);
                matches.then(|| SearchHit {
                    text,
                    metadata: memory.metadata.clone(),
                    score: 1.0,
                })
            })
            .take(top_k)
            .collect();

        Ok(hits)
    }
}
