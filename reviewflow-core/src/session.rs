//! Review Session Controller: the three-step review state machine.
//!
//! A [`ReviewSession`] is created by [`ReviewController::open`] and lives
//! until it is closed or dropped. While it is alive no second session can be
//! opened for the same article. Every transition that leaves a step with
//! unsaved decisions saves them first; if that save fails the transition does
//! not happen.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::decisions::{DecisionStore, DecisionSummary};
use crate::error::{Error, Result};
use crate::types::{ArticleId, Decision, Step, Verdict};
use crate::worklist::Worklist;

/// Decides whether a step counts as complete for forward navigation.
///
/// The step being left is always treated as complete; the rule is consulted
/// for every other step before the navigation target.
pub trait CompletionRule: Send + Sync {
    fn is_complete(&self, session: &ReviewSession, step: Step) -> bool;
}

/// A step is complete once the reviewer has visited it.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisitedCompletion;

impl CompletionRule for VisitedCompletion {
    fn is_complete(&self, session: &ReviewSession, step: Step) -> bool {
        session.has_visited(step)
    }
}

/// Like [`VisitedCompletion`], but proofreading additionally requires every
/// tracked issue to carry a decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecidedCompletion;

impl CompletionRule for DecidedCompletion {
    fn is_complete(&self, session: &ReviewSession, step: Step) -> bool {
        match step {
            Step::Proofreading => {
                session.has_visited(step) && session.decisions.summary().pending == 0
            }
            _ => session.has_visited(step),
        }
    }
}

type OpenArticles = Arc<Mutex<HashSet<ArticleId>>>;

/// An article's entry in the open-session registry, removed on drop, so a
/// session abandoned without `close` still frees its article.
struct OpenSlot {
    article_id: ArticleId,
    open: OpenArticles,
}

impl Drop for OpenSlot {
    fn drop(&mut self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        open.remove(&self.article_id);
        debug!(article_id = self.article_id, "review slot released");
    }
}

/// One open review of one article.
pub struct ReviewSession {
    id: Uuid,
    article_id: ArticleId,
    current_step: Step,
    visited_steps: BTreeSet<Step>,
    exited_steps: BTreeSet<Step>,
    dirty: bool,
    parsing_confirmed: bool,
    decisions: DecisionStore,
    _slot: OpenSlot,
}

impl std::fmt::Debug for ReviewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewSession")
            .field("id", &self.id)
            .field("article_id", &self.article_id)
            .field("current_step", &self.current_step)
            .field("visited_steps", &self.visited_steps)
            .field("exited_steps", &self.exited_steps)
            .field("dirty", &self.dirty)
            .field("decisions", &self.decisions.len())
            .finish()
    }
}

impl ReviewSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn article_id(&self) -> ArticleId {
        self.article_id
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    pub fn has_visited(&self, step: Step) -> bool {
        self.visited_steps.contains(&step)
    }

    /// True once the reviewer has navigated away from `step` at least once.
    pub fn has_exited(&self, step: Step) -> bool {
        self.exited_steps.contains(&step)
    }

    pub fn visited_steps(&self) -> impl Iterator<Item = Step> + '_ {
        self.visited_steps.iter().copied()
    }

    /// True when decisions changed since the last successful save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn decisions(&self) -> &DecisionStore {
        &self.decisions
    }

    pub fn register_issue(&mut self, issue_id: impl Into<String>) -> bool {
        self.decisions.register_issue(issue_id)
    }

    /// Records a verdict and marks the session dirty when anything changed.
    ///
    /// # Errors
    ///
    /// See [`DecisionStore::set_decision`].
    pub fn set_decision(
        &mut self,
        issue_id: &str,
        verdict: Verdict,
        custom_text: Option<String>,
    ) -> Result<bool> {
        let changed = self.decisions.set_decision(issue_id, verdict, custom_text)?;
        self.dirty |= changed;
        Ok(changed)
    }

    pub fn get_decision(&self, issue_id: &str) -> Verdict {
        self.decisions.get_decision(issue_id)
    }

    pub fn all_decisions(&self) -> &[Decision] {
        self.decisions.get_all()
    }

    pub fn progress(&self) -> SessionProgress {
        let summary = self.decisions.summary();
        SessionProgress {
            step: self.current_step,
            decided: summary.decided(),
            total: summary.total(),
            summary,
        }
    }
}

/// Status-bar view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    pub step: Step,
    pub decided: usize,
    pub total: usize,
    pub summary: DecisionSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub from: Step,
    pub to: Step,
    /// Decisions were saved on the way out of `from`.
    pub saved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Refuse to close a dirty session and hand it back for confirmation.
    Prompt,
    SaveAndClose,
    Discard,
}

#[must_use]
#[derive(Debug)]
pub enum CloseOutcome {
    Closed { saved: bool },
    /// The session is dirty and the caller asked to be prompted.
    ConfirmationRequired(ReviewSession),
    /// Saving failed; the session is still open and still dirty.
    SaveFailed { session: ReviewSession, error: Error },
}

impl CloseOutcome {
    pub fn is_closed(&self) -> bool {
        matches!(self, CloseOutcome::Closed { .. })
    }
}

pub struct ReviewController {
    worklist: Arc<dyn Worklist>,
    rule: Box<dyn CompletionRule>,
    open: OpenArticles,
}

impl ReviewController {
    /// Controller with [`VisitedCompletion`].
    pub fn new(worklist: Arc<dyn Worklist>) -> Self {
        Self::with_rule(worklist, Box::new(VisitedCompletion))
    }

    pub fn with_rule(worklist: Arc<dyn Worklist>, rule: Box<dyn CompletionRule>) -> Self {
        Self {
            worklist,
            rule,
            open: Arc::default(),
        }
    }

    pub fn is_open(&self, article_id: ArticleId) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&article_id)
    }

    /// Opens a session on the parsing step with previously saved decisions.
    ///
    /// # Errors
    ///
    /// - `Error::SessionAlreadyOpen` if a session for `article_id` is alive.
    /// - Any worklist error while restoring decisions; the slot is released.
    #[instrument(skip(self))]
    pub async fn open(&self, article_id: ArticleId) -> Result<ReviewSession> {
        let slot = {
            let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
            if !open.insert(article_id) {
                return Err(Error::SessionAlreadyOpen(article_id));
            }
            OpenSlot {
                article_id,
                open: Arc::clone(&self.open),
            }
        };

        let decisions = DecisionStore::restore(self.worklist.as_ref(), article_id).await?;
        let session = ReviewSession {
            id: Uuid::new_v4(),
            article_id,
            current_step: Step::Parsing,
            visited_steps: BTreeSet::from([Step::Parsing]),
            exited_steps: BTreeSet::new(),
            dirty: false,
            parsing_confirmed: false,
            decisions,
            _slot: slot,
        };
        info!(
            article_id,
            session_id = %session.id,
            restored = session.decisions.len(),
            "review session opened"
        );
        Ok(session)
    }

    /// Moves `session` to `target`.
    ///
    /// Backward moves are always allowed. A forward move requires every step
    /// before `target`, other than the one being left, to satisfy the
    /// completion rule. Navigating to the current step does nothing.
    ///
    /// # Errors
    ///
    /// - `Error::NavigationBlocked` when a skipped step is incomplete.
    /// - `Error::Persistence` when the save on the way out fails. The session
    ///   stays on its current step and stays dirty.
    #[instrument(skip(self, session), fields(article_id = session.article_id))]
    pub async fn navigate(
        &self,
        session: &mut ReviewSession,
        target: Step,
    ) -> Result<NavigationOutcome> {
        let from = session.current_step;
        if target == from {
            return Ok(NavigationOutcome {
                from,
                to: target,
                saved: false,
            });
        }

        let forward = target > from;
        if forward {
            let blocking = Step::ALL
                .into_iter()
                .filter(|&step| step < target && step != from)
                .find(|&step| !self.rule.is_complete(session, step));
            if let Some(step) = blocking {
                return Err(Error::NavigationBlocked {
                    from,
                    to: target,
                    reason: format!("step {step} is not complete"),
                });
            }
        }

        let saved = self.save_if_dirty(session).await?;

        if forward && from == Step::Parsing && !session.parsing_confirmed {
            // A failed status update is retried on the next forward move.
            match self.worklist.mark_parsing_confirmed(session.article_id).await {
                Ok(()) => session.parsing_confirmed = true,
                Err(err) => warn!(
                    article_id = session.article_id,
                    error = %err,
                    "could not mark parsing confirmed"
                ),
            }
        }

        session.exited_steps.insert(from);
        session.visited_steps.insert(target);
        session.current_step = target;
        debug!(
            article_id = session.article_id,
            %from,
            to = %target,
            saved,
            "navigated"
        );
        Ok(NavigationOutcome {
            from,
            to: target,
            saved,
        })
    }

    /// Saves pending changes. Returns `true` if anything was written.
    ///
    /// # Errors
    ///
    /// `Error::Persistence` when the worklist rejects the save.
    pub async fn save(&self, session: &mut ReviewSession) -> Result<bool> {
        self.save_if_dirty(session).await
    }

    /// Closes `session` according to `mode`.
    ///
    /// A clean session always closes. Dropping the returned session of a
    /// `ConfirmationRequired` or `SaveFailed` outcome releases the article.
    pub async fn close(&self, mut session: ReviewSession, mode: CloseMode) -> CloseOutcome {
        let article_id = session.article_id;
        if !session.dirty {
            info!(article_id, "review session closed");
            return CloseOutcome::Closed { saved: false };
        }

        match mode {
            CloseMode::Prompt => CloseOutcome::ConfirmationRequired(session),
            CloseMode::Discard => {
                info!(article_id, "review session closed, unsaved decisions discarded");
                CloseOutcome::Closed { saved: false }
            }
            CloseMode::SaveAndClose => {
                let result = self.save_if_dirty(&mut session).await;
                match result {
                    Ok(saved) => {
                        info!(article_id, "review session saved and closed");
                        CloseOutcome::Closed { saved }
                    }
                    Err(error) => CloseOutcome::SaveFailed { session, error },
                }
            }
        }
    }

    async fn save_if_dirty(&self, session: &mut ReviewSession) -> Result<bool> {
        if !session.dirty {
            return Ok(false);
        }
        let article_id = session.article_id;
        session
            .decisions
            .persist(self.worklist.as_ref(), article_id)
            .await
            .map_err(|err| {
                warn!(article_id, error = %err, "decision save failed");
                Error::Persistence {
                    article_id,
                    reason: err.to_string(),
                }
            })?;
        session.dirty = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklist::MockWorklist;

    fn lenient_worklist() -> MockWorklist {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist.expect_save_decisions().returning(|_, _| Ok(()));
        worklist.expect_mark_parsing_confirmed().returning(|_| Ok(()));
        worklist
    }

    fn controller(worklist: MockWorklist) -> ReviewController {
        ReviewController::new(Arc::new(worklist))
    }

    #[tokio::test]
    async fn opens_on_parsing() {
        let ctl = controller(lenient_worklist());
        let session = ctl.open(7).await.unwrap();
        assert_eq!(session.current_step(), Step::Parsing);
        assert!(session.has_visited(Step::Parsing));
        assert!(!session.is_dirty());
        assert!(ctl.is_open(7));
    }

    #[tokio::test]
    async fn second_open_is_rejected_until_close() {
        let ctl = controller(lenient_worklist());
        let session = ctl.open(7).await.unwrap();
        assert!(matches!(ctl.open(7).await, Err(Error::SessionAlreadyOpen(7))));
        assert!(ctl.open(8).await.is_ok());

        assert!(ctl.close(session, CloseMode::Prompt).await.is_closed());
        assert!(!ctl.is_open(7));
        assert!(ctl.open(7).await.is_ok());
    }

    #[tokio::test]
    async fn dropping_a_session_releases_the_article() {
        let ctl = controller(lenient_worklist());
        drop(ctl.open(3).await.unwrap());
        assert!(!ctl.is_open(3));
    }

    #[tokio::test]
    async fn failed_restore_releases_the_article() {
        let mut worklist = MockWorklist::new();
        worklist
            .expect_load_decisions()
            .returning(|id| Err(Error::not_found("article", id)));
        let ctl = controller(worklist);
        assert!(ctl.open(5).await.unwrap_err().is_not_found());
        assert!(!ctl.is_open(5));
    }

    #[tokio::test]
    async fn forward_skip_requires_visited_steps() {
        let ctl = controller(lenient_worklist());
        let mut session = ctl.open(1).await.unwrap();

        let err = ctl.navigate(&mut session, Step::Publish).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NavigationBlocked {
                from: Step::Parsing,
                to: Step::Publish,
                ..
            }
        ));
        assert_eq!(session.current_step(), Step::Parsing);

        ctl.navigate(&mut session, Step::Proofreading).await.unwrap();
        ctl.navigate(&mut session, Step::Publish).await.unwrap();
        ctl.navigate(&mut session, Step::Parsing).await.unwrap();
        // Every step has been visited, so jumping straight ahead is fine now.
        ctl.navigate(&mut session, Step::Publish).await.unwrap();
        assert!(session.has_exited(Step::Proofreading));
    }

    #[tokio::test]
    async fn navigating_to_the_current_step_is_a_no_op() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist.expect_save_decisions().never();
        worklist.expect_mark_parsing_confirmed().never();
        let ctl = controller(worklist);
        let mut session = ctl.open(1).await.unwrap();
        session.set_decision("i1", Verdict::Accepted, None).unwrap();

        let outcome = ctl.navigate(&mut session, Step::Parsing).await.unwrap();
        assert!(!outcome.saved);
        assert!(session.is_dirty());
    }

    #[tokio::test]
    async fn leaving_a_dirty_step_saves_first() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist
            .expect_save_decisions()
            .withf(|id, decisions| *id == 9 && decisions.len() == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        worklist.expect_mark_parsing_confirmed().times(1).returning(|_| Ok(()));
        let ctl = controller(worklist);

        let mut session = ctl.open(9).await.unwrap();
        ctl.navigate(&mut session, Step::Proofreading).await.unwrap();
        session.set_decision("i1", Verdict::Rejected, None).unwrap();
        assert!(session.is_dirty());

        let outcome = ctl.navigate(&mut session, Step::Publish).await.unwrap();
        assert!(outcome.saved);
        assert!(!session.is_dirty());

        // Clean now: going back writes nothing.
        let outcome = ctl.navigate(&mut session, Step::Proofreading).await.unwrap();
        assert!(!outcome.saved);
    }

    #[tokio::test]
    async fn explicit_save_clears_dirty() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist.expect_save_decisions().times(1).returning(|_, _| Ok(()));
        let ctl = controller(worklist);

        let mut session = ctl.open(12).await.unwrap();
        assert!(!ctl.save(&mut session).await.unwrap(), "nothing to save yet");
        session.set_decision("i1", Verdict::Accepted, None).unwrap();
        assert!(ctl.save(&mut session).await.unwrap());
        assert!(!session.is_dirty());
        assert!(!ctl.save(&mut session).await.unwrap());
    }

    #[tokio::test]
    async fn failed_save_blocks_the_transition() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist
            .expect_save_decisions()
            .returning(|id, _| Err(Error::not_found("article", id)));
        worklist.expect_mark_parsing_confirmed().never();
        let ctl = controller(worklist);

        let mut session = ctl.open(2).await.unwrap();
        session.set_decision("i1", Verdict::Accepted, None).unwrap();
        let err = ctl.navigate(&mut session, Step::Proofreading).await.unwrap_err();
        assert!(matches!(err, Error::Persistence { article_id: 2, .. }));
        assert_eq!(session.current_step(), Step::Parsing);
        assert!(session.is_dirty());
        assert!(!session.has_visited(Step::Proofreading));
    }

    #[tokio::test]
    async fn parsing_is_confirmed_once() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist
            .expect_mark_parsing_confirmed()
            .withf(|id| *id == 4)
            .times(1)
            .returning(|_| Ok(()));
        let ctl = controller(worklist);

        let mut session = ctl.open(4).await.unwrap();
        ctl.navigate(&mut session, Step::Proofreading).await.unwrap();
        ctl.navigate(&mut session, Step::Parsing).await.unwrap();
        ctl.navigate(&mut session, Step::Proofreading).await.unwrap();
    }

    #[tokio::test]
    async fn close_modes_on_a_dirty_session() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist.expect_save_decisions().times(1).returning(|_, _| Ok(()));
        let ctl = controller(worklist);

        let mut session = ctl.open(6).await.unwrap();
        session.set_decision("i1", Verdict::Accepted, None).unwrap();

        let session = match ctl.close(session, CloseMode::Prompt).await {
            CloseOutcome::ConfirmationRequired(session) => session,
            other => panic!("expected a prompt, got {other:?}"),
        };
        assert!(ctl.is_open(6));

        let outcome = ctl.close(session, CloseMode::SaveAndClose).await;
        assert!(matches!(outcome, CloseOutcome::Closed { saved: true }));
        assert!(!ctl.is_open(6));

        let mut session = ctl.open(6).await.unwrap();
        session.set_decision("i2", Verdict::Rejected, None).unwrap();
        let outcome = ctl.close(session, CloseMode::Discard).await;
        assert!(matches!(outcome, CloseOutcome::Closed { saved: false }));
    }

    #[tokio::test]
    async fn save_failure_on_close_keeps_the_session() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| Ok(Vec::new()));
        worklist
            .expect_save_decisions()
            .returning(|id, _| Err(Error::not_found("article", id)));
        let ctl = controller(worklist);

        let mut session = ctl.open(6).await.unwrap();
        session.set_decision("i1", Verdict::Accepted, None).unwrap();
        match ctl.close(session, CloseMode::SaveAndClose).await {
            CloseOutcome::SaveFailed { session, error } => {
                assert!(session.is_dirty());
                assert!(matches!(error, Error::Persistence { .. }));
                assert!(ctl.is_open(6));
            }
            other => panic!("expected a save failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn decided_rule_blocks_on_pending_issues() {
        let ctl = ReviewController::with_rule(Arc::new(lenient_worklist()), Box::new(DecidedCompletion));
        let mut session = ctl.open(1).await.unwrap();
        ctl.navigate(&mut session, Step::Proofreading).await.unwrap();
        session.register_issue("i1");
        ctl.navigate(&mut session, Step::Parsing).await.unwrap();

        assert!(ctl.navigate(&mut session, Step::Publish).await.is_err());
        session.set_decision("i1", Verdict::Accepted, None).unwrap();
        ctl.navigate(&mut session, Step::Publish).await.unwrap();
    }

    #[tokio::test]
    async fn progress_counts_decisions() {
        let mut worklist = MockWorklist::new();
        worklist.expect_load_decisions().returning(|_| {
            Ok(vec![
                Decision::pending("i1", 0),
                Decision {
                    issue_id: "i2".into(),
                    verdict: Verdict::Accepted,
                    custom_text: None,
                    decided_at: 1,
                },
            ])
        });
        let ctl = controller(worklist);
        let mut session = ctl.open(1).await.unwrap();
        assert_eq!((session.progress().decided, session.progress().total), (1, 2));

        session.set_decision("i1", Verdict::Modified, Some("new".into())).unwrap();
        let progress = session.progress();
        assert_eq!((progress.decided, progress.total), (2, 2));
        assert_eq!(progress.summary.modified, 1);
    }
}
