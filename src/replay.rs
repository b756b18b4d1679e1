//! Conflict-resilient commit replay.
//!
//! Commits are cherry-picked one at a time onto whatever branch the target
//! currently has checked out. A content conflict never stops the replay: every
//! conflicted path is resolved wholesale to one side according to the
//! [`ConflictPolicy`] and the pick is committed. The default policy keeps the
//! destination branch's content, which can drop the incoming commit's changes
//! to those paths.

use std::{collections::HashSet, fmt};

use serde::Serialize;

use crate::git::GitError;

/// Outcome of a single cherry-pick attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickResult {
    /// Applied cleanly and committed.
    Applied,
    /// Stopped with unmerged paths; the pick is still in progress.
    Conflicted,
    /// Nothing to apply, the change is already on the branch; the pick is still in progress.
    Empty,
}

/// Which side of a conflicted path to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    /// The checked-out branch (`--ours` during a cherry-pick).
    Ours,
    /// The commit being picked (`--theirs` during a cherry-pick).
    Theirs,
}

/// Uniform resolution applied to every conflicted path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the content already on the destination branch. Lossy for the source commit.
    #[default]
    PreferDestination,
    /// Keep the incoming source commit's content.
    PreferSource,
}

impl ConflictPolicy {
    pub fn side(self) -> ConflictSide {
        match self {
            Self::PreferDestination => ConflictSide::Ours,
            Self::PreferSource => ConflictSide::Theirs,
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreferDestination => write!(f, "prefer-destination"),
            Self::PreferSource => write!(f, "prefer-source"),
        }
    }
}

/// The operations replay needs from a working copy.
pub trait ReplayTarget {
    /// Whether `commit`, or a recorded cherry-pick of it, is already on the checked-out branch.
    fn contains_commit(&mut self, commit: &str) -> Result<bool, GitError>;
    fn cherry_pick(&mut self, commit: &str) -> Result<PickResult, GitError>;
    /// Paths currently marked unmerged.
    fn conflicted_paths(&self) -> Result<Vec<String>, GitError>;
    /// Take one side's version of `path` and stage it.
    fn resolve_path(&mut self, path: &str, side: ConflictSide) -> Result<(), GitError>;
    /// Commit the in-progress pick with its original message.
    fn conclude_pick(&mut self) -> Result<(), GitError>;
    /// Drop an in-progress pick that turned out empty.
    fn skip_pick(&mut self) -> Result<(), GitError>;
    /// Abandon an in-progress pick and restore the branch tip.
    fn abort_pick(&mut self) -> Result<(), GitError>;
}

/// Counts for one replay. `applied` includes conflicted picks that were resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub applied: usize,
    pub conflicted: usize,
    pub skipped: usize,
}

pub struct CommitReplayEngine {
    policy: ConflictPolicy,
}

impl CommitReplayEngine {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Replay `commits` in order onto the target's current branch.
    ///
    /// Errors other than content conflicts and empty picks abort the in-progress
    /// pick and are returned; the caller treats them as fatal for this unit of work.
    pub fn replay<T: ReplayTarget + ?Sized>(
        &self,
        target: &mut T,
        commits: &[String],
    ) -> Result<ReplayOutcome, GitError> {
        let mut outcome = ReplayOutcome::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for commit in commits {
            if !seen.insert(commit.as_str()) {
                tracing::debug!(commit = %commit, "Commit listed twice, replaying once");
                continue;
            }
            if target.contains_commit(commit)? {
                tracing::info!(commit = %commit, "Commit already present, skipping");
                outcome.skipped += 1;
                continue;
            }

            match self.pick_one(target, commit) {
                Ok(PickResult::Applied) => {
                    tracing::debug!(commit = %commit, "Applied cleanly");
                    outcome.applied += 1;
                }
                Ok(PickResult::Conflicted) => {
                    outcome.applied += 1;
                    outcome.conflicted += 1;
                }
                Ok(PickResult::Empty) => {
                    tracing::info!(commit = %commit, "Cherry-pick is empty, change already applied");
                    outcome.skipped += 1;
                }
                Err(error) => {
                    if let Err(abort_error) = target.abort_pick() {
                        tracing::debug!(error = %abort_error, "No cherry-pick to abort");
                    }
                    return Err(error);
                }
            }
        }

        Ok(outcome)
    }

    fn pick_one<T: ReplayTarget + ?Sized>(
        &self,
        target: &mut T,
        commit: &str,
    ) -> Result<PickResult, GitError> {
        match target.cherry_pick(commit)? {
            PickResult::Applied => Ok(PickResult::Applied),
            PickResult::Empty => {
                target.skip_pick()?;
                Ok(PickResult::Empty)
            }
            PickResult::Conflicted => {
                let paths = target.conflicted_paths()?;
                tracing::warn!(
                    commit = %commit,
                    policy = %self.policy,
                    files = ?paths,
                    "Cherry-pick conflicted, resolving every file to one side"
                );
                let side = self.policy.side();
                for path in &paths {
                    target.resolve_path(path, side)?;
                }
                target.conclude_pick()?;
                Ok(PickResult::Conflicted)
            }
        }
    }
}
