//! A local clone bound to one remote repository.
//!
//! All git state the engine depends on (current branch, dirty flag) lives on
//! the [`WorkingCopy`] value; commands run with `git -C <path>` so the process
//! working directory is never consulted.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use crate::{
    git::{GitError, failure_detail, redact, run_git, run_git_ok, run_git_raw},
    git2_ops::{DEFAULT_REMOTE, GitRepo},
    replay::{ConflictSide, PickResult, ReplayTarget},
};

/// Branch-level operations on a local clone.
pub trait Workspace: ReplayTarget {
    fn path(&self) -> &Path;
    fn current_branch(&self) -> Option<&str>;
    /// Fetch exactly `branch` from `remote` into `refs/remotes/<remote>/<branch>`.
    fn fetch_branch(&mut self, remote: &str, branch: &str) -> Result<(), GitError>;
    /// Check out `branch`, creating it to track `origin/<branch>` on first sight.
    fn checkout_branch(&mut self, branch: &str) -> Result<(), GitError>;
    /// Create `branch` at `start_point` (or reset it there) and check it out.
    fn create_branch(&mut self, branch: &str, start_point: &str) -> Result<(), GitError>;
    /// Add a remote unless one with this name is already registered.
    fn register_remote(&mut self, name: &str, url: &str) -> Result<(), GitError>;
    /// Push the current branch to `remote` as `branch`. Never forces.
    fn push_branch(&mut self, remote: &str, branch: &str) -> Result<(), GitError>;
}

pub struct WorkingCopy {
    path: PathBuf,
    repo: GitRepo,
    current_branch: Option<String>,
    dirty: bool,
    /// Sources of the `-x` picks on the checked-out branch, built on first use.
    picked: Option<HashSet<String>>,
    /// Commit of a cherry-pick that stopped and still needs concluding.
    pending_pick: Option<String>,
}

impl WorkingCopy {
    /// Clone `url` into `path` unless a repository is already there.
    pub fn ensure_cloned(url: &str, path: &Path) -> Result<Self, GitError> {
        if GitRepo::exists_at(path) {
            tracing::info!("Reusing existing clone at {}", path.display());
        } else {
            tracing::info!("Cloning {} into {}", redact(url), path.display());
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(parent)?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| GitError::Clone {
                    url: redact(url),
                    detail: format!("{} has no directory name", path.display()),
                })?;
            let out = run_git_raw(parent, &["clone", url, &name])?;
            if !out.success() {
                return Err(GitError::Clone {
                    url: redact(url),
                    detail: failure_detail(&out),
                });
            }
        }
        Self::open(path)
    }

    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = GitRepo::open(path)?;
        let current_branch = repo.current_branch();
        let dirty = repo.is_dirty()?;
        Ok(Self {
            path: path.to_path_buf(),
            repo,
            current_branch,
            dirty,
            picked: None,
            pending_pick: None,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Keep the pick index in step with a commit this copy just created.
    fn record_pick(&mut self, commit: String) {
        if let Some(picked) = self.picked.as_mut() {
            picked.insert(commit);
        }
    }

    fn refresh(&mut self) -> Result<(), GitError> {
        self.current_branch = self.repo.current_branch();
        self.dirty = self.repo.is_dirty()?;
        Ok(())
    }

    /// Stash local changes so a checkout cannot fail on them.
    fn stash_if_dirty(&mut self) -> Result<(), GitError> {
        self.dirty = self.repo.is_dirty()?;
        if !self.dirty {
            return Ok(());
        }
        let message = format!(
            "git-migrate: autostash on {}",
            self.current_branch.as_deref().unwrap_or("HEAD")
        );
        tracing::warn!(
            "Working copy {} is dirty, stashing changes ({})",
            self.path.display(),
            message
        );
        run_git(
            &self.path,
            &["stash", "push", "--include-untracked", "-m", &message],
        )?;
        self.dirty = false;
        Ok(())
    }
}

impl Workspace for WorkingCopy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn current_branch(&self) -> Option<&str> {
        self.current_branch.as_deref()
    }

    fn fetch_branch(&mut self, remote: &str, branch: &str) -> Result<(), GitError> {
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, remote);
        let out = run_git_raw(&self.path, &["fetch", remote, &refspec])?;
        if !out.success() {
            return Err(GitError::Fetch {
                remote: remote.to_string(),
                branch: branch.to_string(),
                detail: failure_detail(&out),
            });
        }
        Ok(())
    }

    fn checkout_branch(&mut self, branch: &str) -> Result<(), GitError> {
        self.stash_if_dirty()?;
        let out = if self.repo.branch_exists(branch) {
            run_git_raw(&self.path, &["checkout", branch])?
        } else {
            if !self.repo.remote_branch_exists(DEFAULT_REMOTE, branch) {
                return Err(GitError::Checkout {
                    branch: branch.to_string(),
                    detail: format!("no local branch and no {}/{} to track", DEFAULT_REMOTE, branch),
                });
            }
            let upstream = format!("{}/{}", DEFAULT_REMOTE, branch);
            run_git_raw(&self.path, &["checkout", "-b", branch, "--track", &upstream])?
        };
        if !out.success() {
            return Err(GitError::Checkout {
                branch: branch.to_string(),
                detail: failure_detail(&out),
            });
        }
        self.picked = None;
        self.refresh()
    }

    fn create_branch(&mut self, branch: &str, start_point: &str) -> Result<(), GitError> {
        self.stash_if_dirty()?;
        let out = run_git_raw(&self.path, &["checkout", "-B", branch, start_point])?;
        if !out.success() {
            return Err(GitError::Checkout {
                branch: branch.to_string(),
                detail: failure_detail(&out),
            });
        }
        self.picked = None;
        self.refresh()
    }

    fn register_remote(&mut self, name: &str, url: &str) -> Result<(), GitError> {
        match self.repo.remote_url(name) {
            Some(existing) if existing == url => {
                tracing::debug!("Remote '{}' already registered", name);
                Ok(())
            }
            Some(existing) => Err(GitError::RemoteMismatch {
                name: name.to_string(),
                existing: redact(&existing),
                requested: redact(url),
            }),
            None => {
                tracing::info!("Registering remote '{}' -> {}", name, redact(url));
                run_git(&self.path, &["remote", "add", name, url])?;
                Ok(())
            }
        }
    }

    fn push_branch(&mut self, remote: &str, branch: &str) -> Result<(), GitError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let out = run_git_raw(&self.path, &["push", remote, &refspec])?;
        if !out.success() {
            return Err(GitError::Push {
                remote: remote.to_string(),
                branch: branch.to_string(),
                detail: failure_detail(&out),
            });
        }
        Ok(())
    }
}

/// Marker git prints when a pick would produce no change.
fn is_empty_pick(output: &str) -> bool {
    output.contains("is now empty")
        || output.contains("nothing to commit")
        || output.contains("--allow-empty")
}

impl ReplayTarget for WorkingCopy {
    fn contains_commit(&mut self, commit: &str) -> Result<bool, GitError> {
        if self.repo.head_contains(commit)? {
            return Ok(true);
        }
        if self.picked.is_none() {
            self.picked = Some(self.repo.picked_sources()?);
        }
        Ok(self.picked.as_ref().is_some_and(|picked| picked.contains(commit)))
    }

    fn cherry_pick(&mut self, commit: &str) -> Result<PickResult, GitError> {
        // -x records provenance so a later run can recognise rewritten picks.
        let mut args = vec!["cherry-pick", "-x"];
        if self.repo.parent_count(commit)? > 1 {
            args.extend(["-m", "1"]);
        }
        args.push(commit);

        let out = run_git_raw(&self.path, &args)?;
        if out.success() {
            self.record_pick(commit.to_string());
            return Ok(PickResult::Applied);
        }
        if !self.conflicted_paths()?.is_empty() {
            self.dirty = true;
            self.pending_pick = Some(commit.to_string());
            return Ok(PickResult::Conflicted);
        }
        if is_empty_pick(&out.combined()) {
            self.pending_pick = Some(commit.to_string());
            return Ok(PickResult::Empty);
        }
        Err(GitError::Command {
            args: args.join(" "),
            detail: failure_detail(&out),
        })
    }

    fn conflicted_paths(&self) -> Result<Vec<String>, GitError> {
        let out = run_git(&self.path, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .as_ref()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn resolve_path(&mut self, path: &str, side: ConflictSide) -> Result<(), GitError> {
        let flag = match side {
            ConflictSide::Ours => "--ours",
            ConflictSide::Theirs => "--theirs",
        };
        if run_git_ok(&self.path, &["checkout", flag, "--", path])? {
            run_git(&self.path, &["add", "--", path])?;
        } else {
            // The preferred side deleted the file.
            run_git(&self.path, &["rm", "--quiet", "--force", "--", path])?;
        }
        Ok(())
    }

    fn conclude_pick(&mut self) -> Result<(), GitError> {
        run_git(&self.path, &["commit", "--no-edit", "--allow-empty"])?;
        if let Some(commit) = self.pending_pick.take() {
            self.record_pick(commit);
        }
        self.refresh()
    }

    fn skip_pick(&mut self) -> Result<(), GitError> {
        self.pending_pick = None;
        run_git(&self.path, &["cherry-pick", "--skip"])?;
        self.refresh()
    }

    fn abort_pick(&mut self) -> Result<(), GitError> {
        self.pending_pick = None;
        run_git(&self.path, &["cherry-pick", "--abort"])?;
        self.refresh()
    }
}
