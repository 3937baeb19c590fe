//! Per-issue proofreading decisions for one review session.
//!
//! The store keeps insertion order so "N/M decided" counters and issue lists
//! stay stable across saves and restores.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::db::now_secs;
use crate::error::{Error, Result};
use crate::types::{ArticleId, Decision, Verdict};
use crate::worklist::Worklist;

/// Counts per verdict over every tracked issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecisionSummary {
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub modified: usize,
}

impl DecisionSummary {
    pub fn decided(&self) -> usize {
        self.accepted + self.rejected + self.modified
    }

    pub fn total(&self) -> usize {
        self.decided() + self.pending
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionStore {
    entries: Vec<Decision>,
    index: HashMap<String, usize>,
}

impl DecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from previously saved decisions, keeping their order.
    ///
    /// A repeated issue id keeps its first position and its last value.
    pub fn from_decisions(decisions: Vec<Decision>) -> Self {
        let mut store = Self::new();
        for decision in decisions {
            store.upsert(decision);
        }
        store
    }

    fn upsert(&mut self, decision: Decision) {
        match self.index.get(&decision.issue_id) {
            Some(&pos) => self.entries[pos] = decision,
            None => {
                self.index.insert(decision.issue_id.clone(), self.entries.len());
                self.entries.push(decision);
            }
        }
    }

    /// Makes `issue_id` known as pending. Returns `false` if it was already tracked.
    pub fn register_issue(&mut self, issue_id: impl Into<String>) -> bool {
        let issue_id = issue_id.into();
        if self.index.contains_key(&issue_id) {
            return false;
        }
        self.upsert(Decision::pending(issue_id, now_secs()));
        true
    }

    /// Records a verdict for `issue_id`, overwriting any previous one.
    ///
    /// Returns `true` if anything changed; repeating the current decision is a
    /// no-op. `custom_text` is kept only for `Verdict::Modified`.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for an empty issue id, for `Verdict::Pending`
    /// (decisions never revert), and for `Modified` without custom text.
    pub fn set_decision(
        &mut self,
        issue_id: &str,
        verdict: Verdict,
        custom_text: Option<String>,
    ) -> Result<bool> {
        if issue_id.trim().is_empty() {
            return Err(Error::Validation("issue id must not be empty".to_owned()));
        }
        let custom_text = match verdict {
            Verdict::Pending => {
                return Err(Error::Validation(format!(
                    "issue {issue_id}: a decision cannot be reset to pending"
                )))
            }
            Verdict::Modified => match custom_text {
                Some(text) if !text.trim().is_empty() => Some(text),
                _ => {
                    return Err(Error::Validation(format!(
                        "issue {issue_id}: a modified decision needs replacement text"
                    )))
                }
            },
            Verdict::Accepted | Verdict::Rejected => None,
        };

        if let Some(current) = self.decision(issue_id) {
            if current.verdict == verdict && current.custom_text == custom_text {
                return Ok(false);
            }
        }

        debug!(issue_id, %verdict, "decision recorded");
        self.upsert(Decision {
            issue_id: issue_id.to_owned(),
            verdict,
            custom_text,
            decided_at: now_secs(),
        });
        Ok(true)
    }

    /// The verdict for `issue_id`; `Pending` for unknown issues.
    pub fn get_decision(&self, issue_id: &str) -> Verdict {
        self.decision(issue_id)
            .map(|d| d.verdict)
            .unwrap_or_default()
    }

    pub fn decision(&self, issue_id: &str) -> Option<&Decision> {
        self.index.get(issue_id).map(|&pos| &self.entries[pos])
    }

    /// Every tracked issue in first-seen order.
    pub fn get_all(&self) -> &[Decision] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> DecisionSummary {
        self.entries
            .iter()
            .fold(DecisionSummary::default(), |mut s, d| {
                match d.verdict {
                    Verdict::Pending => s.pending += 1,
                    Verdict::Accepted => s.accepted += 1,
                    Verdict::Rejected => s.rejected += 1,
                    Verdict::Modified => s.modified += 1,
                }
                s
            })
    }

    /// Saves every tracked decision through `worklist`.
    pub async fn persist(&self, worklist: &dyn Worklist, article_id: ArticleId) -> Result<()> {
        worklist.save_decisions(article_id, &self.entries).await?;
        debug!(article_id, count = self.entries.len(), "decisions persisted");
        Ok(())
    }

    /// Loads the decisions saved for `article_id`.
    pub async fn restore(worklist: &dyn Worklist, article_id: ArticleId) -> Result<Self> {
        let decisions = worklist.load_decisions(article_id).await?;
        debug!(article_id, count = decisions.len(), "decisions restored");
        Ok(Self::from_decisions(decisions))
    }
}
