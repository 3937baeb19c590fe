use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric identifier of an article in the worklist.
pub type ArticleId = i64;

/// The three steps of the review workflow, in display order.
///
/// Ordering is meaningful: `Parsing < Proofreading < Publish`. Navigation
/// rules compare steps with `<` / `>` to tell backward from forward moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Parsing review: structure and metadata extracted from the source document.
    Parsing,
    /// Proofreading review: per-issue accept / reject / modify decisions.
    Proofreading,
    /// Publish preview of the final article.
    Publish,
}

impl Step {
    /// All steps in workflow order.
    pub const ALL: [Step; 3] = [Step::Parsing, Step::Proofreading, Step::Publish];

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Parsing => "parsing",
            Step::Proofreading => "proofreading",
            Step::Publish => "publish",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A reviewer's verdict on one proofreading issue.
///
/// Every issue starts as `Pending`. Once decided, the verdict may change to any
/// other decided verdict but never back to `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Pending,
    Accepted,
    Rejected,
    /// Accepted with reviewer-supplied replacement text.
    Modified,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Accepted => "accepted",
            Verdict::Rejected => "rejected",
            Verdict::Modified => "modified",
        }
    }

    pub fn is_decided(self) -> bool {
        self != Verdict::Pending
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Verdict::Pending),
            "accepted" => Ok(Verdict::Accepted),
            "rejected" => Ok(Verdict::Rejected),
            "modified" => Ok(Verdict::Modified),
            other => Err(format!("unknown verdict '{other}'")),
        }
    }
}

/// The decision recorded for a single proofreading issue.
///
/// Unique per `issue_id` within a session. `custom_text` is only set for
/// `Verdict::Modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub issue_id: String,
    pub verdict: Verdict,
    pub custom_text: Option<String>,
    pub decided_at: i64, // Unix timestamp seconds
}

impl Decision {
    /// A fresh, undecided entry for `issue_id`.
    pub fn pending(issue_id: impl Into<String>, now: i64) -> Self {
        Self {
            issue_id: issue_id.into(),
            verdict: Verdict::Pending,
            custom_text: None,
            decided_at: now,
        }
    }
}
