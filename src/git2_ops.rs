//! git2 wrapper for fast read-only queries against a working copy.
//!
//! Anything that mutates the repository goes through the `git` binary in
//! [`crate::git`]; this module only reads refs, the index and the object store.

use std::{collections::HashSet, path::Path};

use git2::{BranchType, Oid, Repository, StatusOptions};

use crate::git::GitError;

pub const DEFAULT_REMOTE: &str = "origin";

pub struct GitRepo {
    repo: Repository,
}

impl GitRepo {
    pub fn open(path: &Path) -> Result<Self, GitError> {
        Ok(Self {
            repo: Repository::open(path)?,
        })
    }

    /// Returns true if `path` already holds a git repository.
    pub fn exists_at(path: &Path) -> bool {
        Repository::open(path).is_ok()
    }

    /// Check if a local branch exists.
    /// Equivalent to `git rev-parse --verify refs/heads/<branch>`
    pub fn branch_exists(&self, branch: &str) -> bool {
        self.repo.find_branch(branch, BranchType::Local).is_ok()
    }

    /// Check if a remote-tracking branch `<remote>/<branch>` exists.
    pub fn remote_branch_exists(&self, remote: &str, branch: &str) -> bool {
        self.repo
            .find_reference(&format!("refs/remotes/{}/{}", remote, branch))
            .is_ok()
    }

    /// URL of a registered remote, or `None` if no remote has that name.
    pub fn remote_url(&self, name: &str) -> Option<String> {
        let remote = self.repo.find_remote(name).ok()?;
        remote.url().map(|url| url.to_string())
    }

    /// Get current branch name, or `None` on an unborn or detached HEAD.
    /// Equivalent to `git rev-parse --abbrev-ref HEAD`
    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if !head.is_branch() {
            return None;
        }
        head.shorthand().map(|name| name.to_string())
    }

    /// True when the index or working tree differs from HEAD, untracked files included.
    pub fn is_dirty(&self) -> Result<bool, GitError> {
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(!statuses.is_empty())
    }

    /// Check whether `commit` is reachable from HEAD.
    /// Equivalent to `git merge-base --is-ancestor <commit> HEAD`
    ///
    /// A commit that is not in the object store at all is reported as absent.
    pub fn head_contains(&self, commit: &str) -> Result<bool, GitError> {
        let Ok(oid) = Oid::from_str(commit) else {
            return Ok(false);
        };
        if self.repo.find_commit(oid).is_err() {
            return Ok(false);
        }
        let Some(head) = self.repo.head().ok().and_then(|head| head.target()) else {
            return Ok(false);
        };
        if head == oid {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(head, oid)?)
    }

    /// Source ids of every commit in HEAD's history that carries a
    /// `(cherry picked from commit <id>)` trailer. One walk over the history.
    pub fn picked_sources(&self) -> Result<HashSet<String>, GitError> {
        let mut sources = HashSet::new();
        if self.repo.head().is_err() {
            return Ok(sources);
        }
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        for oid in walk {
            let found = self.repo.find_commit(oid?)?;
            if let Some(message) = found.message() {
                sources.extend(pick_trailers(message).map(str::to_string));
            }
        }
        Ok(sources)
    }

    /// Number of parents of `commit`; merge commits have more than one.
    pub fn parent_count(&self, commit: &str) -> Result<usize, GitError> {
        let oid = Oid::from_str(commit)?;
        Ok(self.repo.find_commit(oid)?.parent_count())
    }
}

/// Commit ids named by `-x` trailers in a commit message.
fn pick_trailers(message: &str) -> impl Iterator<Item = &str> {
    message.lines().filter_map(|line| {
        line.trim()
            .strip_prefix("(cherry picked from commit ")
            .and_then(|rest| rest.strip_suffix(')'))
    })
}
