// SPDX-License-Identifier: MIT

//! Human review checkpoint
//!
//! Approval is always an explicit decision: either a reviewer answers, or a
//! caller-chosen `ReviewPolicy` does. Nothing is approved silently.

use crate::adk::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// What the reviewer is asked to look at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRequest {
    pub story_id: String,
    pub title: String,
    pub chapter_number: Option<u32>,
    pub excerpt: String,
    pub hierarchical_phase: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewVerdict {
    Approved,
    Rejected,
}

/// A reviewer's answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewDecision {
    pub verdict: ReviewVerdict,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl ReviewDecision {
    pub fn approve() -> Self {
        Self {
            verdict: ReviewVerdict::Approved,
            feedback: None,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            verdict: ReviewVerdict::Rejected,
            feedback: Some(feedback.into()),
        }
    }
}

/// Decision applied when no reviewer answers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPolicy {
    Approve,
    Reject,
    /// Surface a node error instead of deciding
    #[default]
    Fail,
}

impl ReviewPolicy {
    /// Produce the decision this policy stands for
    pub fn decide(&self, reason: &str) -> Result<ReviewDecision, NodeError> {
        match self {
            ReviewPolicy::Approve => Ok(ReviewDecision::approve()),
            ReviewPolicy::Reject => Ok(ReviewDecision::reject(format!(
                "rejected by policy: {}",
                reason
            ))),
            ReviewPolicy::Fail => Err(NodeError::Review(reason.to_string())),
        }
    }
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, request: ReviewRequest) -> Result<ReviewDecision, NodeError>;
}

/// Reviewer that answers every request with a fixed policy
#[derive(Debug, Clone, Copy)]
pub struct PolicyReviewer {
    policy: ReviewPolicy,
}

impl PolicyReviewer {
    pub fn new(policy: ReviewPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Reviewer for PolicyReviewer {
    async fn review(&self, request: ReviewRequest) -> Result<ReviewDecision, NodeError> {
        log::info!(
            "Review of '{}' decided by {:?} policy",
            request.title,
            self.policy
        );
        self.policy.decide("no reviewer attached")
    }
}

/// Reviewer backed by channels to an external UI
///
/// Each request is forwarded on `requests`; the next decision received on
/// `decisions` answers it. When no decision arrives within `timeout`, or the
/// UI side hung up, `on_timeout` decides.
pub struct ChannelReviewer {
    requests: mpsc::Sender<ReviewRequest>,
    decisions: Mutex<mpsc::Receiver<ReviewDecision>>,
    timeout: Duration,
    on_timeout: ReviewPolicy,
}

impl ChannelReviewer {
    pub fn new(
        requests: mpsc::Sender<ReviewRequest>,
        decisions: mpsc::Receiver<ReviewDecision>,
        timeout: Duration,
        on_timeout: ReviewPolicy,
    ) -> Self {
        Self {
            requests,
            decisions: Mutex::new(decisions),
            timeout,
            on_timeout,
        }
    }
}

#[async_trait]
impl Reviewer for ChannelReviewer {
    async fn review(&self, request: ReviewRequest) -> Result<ReviewDecision, NodeError> {
        if self.requests.send(request).await.is_err() {
            log::warn!("Review UI disconnected, applying {:?} policy", self.on_timeout);
            return self.on_timeout.decide("review UI disconnected");
        }

        let mut decisions = self.decisions.lock().await;
        match tokio::time::timeout(self.timeout, decisions.recv()).await {
            Ok(Some(decision)) => Ok(decision),
            Ok(None) => self.on_timeout.decide("review UI disconnected"),
            Err(_) => {
                log::warn!(
                    "No review decision within {:?}, applying {:?} policy",
                    self.timeout,
                    self.on_timeout
                );
                self.on_timeout.decide("review timed out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ReviewRequest {
        ReviewRequest {
            story_id: "s1".to_string(),
            title: "T".to_string(),
            chapter_number: Some(1),
            excerpt: "Once".to_string(),
            hierarchical_phase: "micro".to_string(),
        }
    }

    #[tokio::test]
    async fn test_policy_reviewer_approve() {
        let reviewer = PolicyReviewer::new(ReviewPolicy::Approve);
        let decision = reviewer.review(request()).await.unwrap();
        assert_eq!(decision.verdict, ReviewVerdict::Approved);
    }

    #[tokio::test]
    async fn test_default_policy_fails_instead_of_approving() {
        let reviewer = PolicyReviewer::new(ReviewPolicy::default());
        let err = reviewer.review(request()).await.unwrap_err();
        assert!(matches!(err, NodeError::Review(_)));
    }

    #[tokio::test]
    async fn test_channel_reviewer_forwards_decision() {
        let (req_tx, mut req_rx) = mpsc::channel(1);
        let (dec_tx, dec_rx) = mpsc::channel(1);
        let reviewer = ChannelReviewer::new(
            req_tx,
            dec_rx,
            Duration::from_secs(5),
            ReviewPolicy::Fail,
        );

        let ui = tokio::spawn(async move {
            let req = req_rx.recv().await.unwrap();
            assert_eq!(req.chapter_number, Some(1));
            dec_tx
                .send(ReviewDecision::reject("more tension"))
                .await
                .unwrap();
        });

        let decision = reviewer.review(request()).await.unwrap();
        ui.await.unwrap();
        assert_eq!(decision.verdict, ReviewVerdict::Rejected);
        assert_eq!(decision.feedback.as_deref(), Some("more tension"));
    }

    #[tokio::test]
    async fn test_channel_reviewer_timeout_applies_policy() {
        let (req_tx, _req_rx) = mpsc::channel(1);
        let (_dec_tx, dec_rx) = mpsc::channel(1);
        let reviewer = ChannelReviewer::new(
            req_tx,
            dec_rx,
            Duration::from_millis(20),
            ReviewPolicy::Reject,
        );

        let decision = reviewer.review(request()).await.unwrap();
        assert_eq!(decision.verdict, ReviewVerdict::Rejected);
        assert!(decision.feedback.unwrap().contains("timed out"));
    }
}
