//! Word-level text diffs for proofreading suggestions.
//!
//! Text is tokenized on Unicode word boundaries (UAX #29), so CJK text is
//! compared per ideograph and no segment ever starts or ends inside a
//! multi-byte character. Runs of changes of the same kind are merged into a
//! single [`Segment`].
//!
//! Among the minimal-edit alignments the one whose first matching run is the
//! longest wins. Inputs whose token grid exceeds [`EXACT_ALIGNMENT_MAX_CELLS`]
//! keep the plain Myers alignment.

use serde::Serialize;
use similar::{Algorithm, ChangeTag, TextDiff};

/// Largest `(old tokens + 1) * (new tokens + 1)` aligned exactly.
pub const EXACT_ALIGNMENT_MAX_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Equal,
    Insert,
    Delete,
}

impl From<ChangeTag> for SegmentKind {
    fn from(tag: ChangeTag) -> Self {
        match tag {
            ChangeTag::Equal => SegmentKind::Equal,
            ChangeTag::Insert => SegmentKind::Insert,
            ChangeTag::Delete => SegmentKind::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Character counts, not bytes: "春天" counts as 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub chars_added: usize,
    pub chars_removed: usize,
    pub identical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub original_text: String,
    pub suggested_text: String,
    pub segments: Vec<Segment>,
    pub stats: DiffStats,
}

impl DiffResult {
    /// Callers show a "no changes" state instead of an empty diff when true.
    pub fn is_identical(&self) -> bool {
        self.stats.identical
    }

    /// Concatenation of equal and deleted segments.
    pub fn original_from_segments(&self) -> String {
        self.collect(SegmentKind::Delete)
    }

    /// Concatenation of equal and inserted segments.
    pub fn suggested_from_segments(&self) -> String {
        self.collect(SegmentKind::Insert)
    }

    fn collect(&self, side: SegmentKind) -> String {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Equal || s.kind == side)
            .map(|s| s.text.as_str())
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        self.segments.iter().any(|s| s.kind != SegmentKind::Equal)
    }
}

/// Computes the word-level diff between `original` and `suggested`.
///
/// Infallible and deterministic. Identical inputs yield one `Equal` segment;
/// an empty side yields a single `Insert` or `Delete` of the other side.
pub fn compute_diff(original: &str, suggested: &str) -> DiffResult {
    if original == suggested {
        return DiffResult {
            original_text: original.to_owned(),
            suggested_text: suggested.to_owned(),
            segments: vec![Segment {
                kind: SegmentKind::Equal,
                text: original.to_owned(),
            }],
            stats: DiffStats {
                identical: true,
                ..DiffStats::default()
            },
        };
    }

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_unicode_words(original, suggested);

    let changes: Vec<(SegmentKind, &str)> =
        match align_tokens(diff.old_slices(), diff.new_slices()) {
            Some(changes) => changes,
            None => diff
                .iter_all_changes()
                .map(|change| (SegmentKind::from(change.tag()), change.value()))
                .collect(),
        };

    let mut segments: Vec<Segment> = Vec::new();
    let mut stats = DiffStats::default();
    for (kind, text) in changes {
        match kind {
            SegmentKind::Insert => stats.chars_added += text.chars().count(),
            SegmentKind::Delete => stats.chars_removed += text.chars().count(),
            SegmentKind::Equal => {}
        }
        match segments.last_mut() {
            Some(last) if last.kind == kind => last.text.push_str(text),
            _ => segments.push(Segment {
                kind,
                text: text.to_owned(),
            }),
        }
    }

    DiffResult {
        original_text: original.to_owned(),
        suggested_text: suggested.to_owned(),
        segments,
        stats,
    }
}

/// Minimal-edit token alignment with the longest possible first matching run.
///
/// Returns `None` when no token is shared or the grid is too large, leaving the
/// caller with the Myers result. Equal first runs resolve to the earliest
/// position; deletions come before insertions.
fn align_tokens<'a>(old: &[&'a str], new: &[&'a str]) -> Option<Vec<(SegmentKind, &'a str)>> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    let cells = (n + 1).checked_mul(width)?;
    if cells > EXACT_ALIGNMENT_MAX_CELLS {
        return None;
    }

    // lcs[i * width + j]: longest common subsequence of old[i..] and new[j..].
    let mut lcs = vec![0u32; cells];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if old[i] == new[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }
    let at = |i: usize, j: usize| lcs[i * width + j];
    let total = at(0, 0);
    if total == 0 {
        return None;
    }

    // A first run can start at (i, j) only if everything before it is edited
    // and the rest still reaches the full common subsequence.
    let mut best: Option<(usize, usize, usize)> = None;
    for i in 0..n {
        for j in 0..m {
            if old[i] != new[j] || at(i, j) != total {
                continue;
            }
            let run = old[i..]
                .iter()
                .zip(&new[j..])
                .take_while(|(a, b)| a == b)
                .count();
            if best.map_or(true, |(_, _, longest)| run > longest) {
                best = Some((i, j, run));
            }
        }
    }
    let (i, j, run) = best?;

    let mut changes: Vec<(SegmentKind, &'a str)> = Vec::with_capacity(n + m);
    changes.extend(old[..i].iter().map(|t| (SegmentKind::Delete, *t)));
    changes.extend(new[..j].iter().map(|t| (SegmentKind::Insert, *t)));
    changes.extend(old[i..i + run].iter().map(|t| (SegmentKind::Equal, *t)));

    let (mut i, mut j) = (i + run, j + run);
    while i < n && j < m {
        if old[i] == new[j] {
            changes.push((SegmentKind::Equal, old[i]));
            i += 1;
            j += 1;
        } else if at(i + 1, j) >= at(i, j + 1) {
            changes.push((SegmentKind::Delete, old[i]));
            i += 1;
        } else {
            changes.push((SegmentKind::Insert, new[j]));
            j += 1;
        }
    }
    changes.extend(old[i..].iter().map(|t| (SegmentKind::Delete, *t)));
    changes.extend(new[j..].iter().map(|t| (SegmentKind::Insert, *t)));
    Some(changes)
}
