//! Orchestrates a migration run.
//!
//! Phases run strictly in order on a single thread, because both working
//! copies are mutated in place:
//! Initialized → BranchesSynced → DefaultBranchSet → MigratingPullRequests → Complete.
//! A failed pull request is recorded in the summary and never stops the run.

use std::fmt;

use anyhow::{Context, Result, anyhow};

use crate::{
    github::{PullRequest, RepoIdentifier, RepositoryHandle, authenticated_clone_url},
    recreate::{PrOutcome, PullRequestRecreator, SOURCE_REMOTE},
    replay::{CommitReplayEngine, ConflictPolicy},
    report::RunSummary,
    sync::{BranchSynchronizer, SyncOptions, TARGET_REMOTE, set_default_branch},
    working_copy::Workspace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initialized,
    BranchesSynced,
    DefaultBranchSet,
    MigratingPullRequests,
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::BranchesSynced => "branches-synced",
            Self::DefaultBranchSet => "default-branch-set",
            Self::MigratingPullRequests => "migrating-pull-requests",
            Self::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub conflict_policy: ConflictPolicy,
    /// Skip branch sync and the default-branch update.
    pub skip_branches: bool,
    /// Stop after the default-branch update.
    pub branches_only: bool,
}

/// One side of the migration, as verified at startup.
#[derive(Debug, Clone)]
pub struct RemoteRepository {
    pub id: RepoIdentifier,
    pub default_branch: String,
    /// Clone URL with credentials embedded; never log unredacted.
    pub clone_url: String,
}

impl RemoteRepository {
    /// Look the repository up. Authentication failures and missing
    /// repositories are fatal and surface before anything is mutated.
    pub fn resolve<R: RepositoryHandle + ?Sized>(handle: &R, token: &str) -> Result<Self> {
        let id = handle.identifier().clone();
        let info = handle.info().map_err(|error| {
            if error.is_fatal() {
                anyhow!("cannot access {}: {}", id.full_name(), error)
            } else {
                anyhow!("failed to read {}: {}", id.full_name(), error)
            }
        })?;
        tracing::info!(
            "Resolved {} (default branch '{}')",
            info.full_name,
            info.default_branch
        );
        Ok(Self {
            id,
            default_branch: info.default_branch,
            clone_url: authenticated_clone_url(&info.clone_url, token),
        })
    }
}

pub struct MigrationRunner<'a, S: ?Sized, D: ?Sized, W> {
    source: &'a S,
    destination: &'a D,
    source_remote: RemoteRepository,
    destination_remote: RemoteRepository,
    source_copy: W,
    dest_copy: W,
    options: RunOptions,
    phase: RunPhase,
}

impl<'a, S, D, W> MigrationRunner<'a, S, D, W>
where
    S: RepositoryHandle + ?Sized,
    D: RepositoryHandle + ?Sized,
    W: Workspace,
{
    pub fn new(
        source: &'a S,
        destination: &'a D,
        source_remote: RemoteRepository,
        destination_remote: RemoteRepository,
        source_copy: W,
        dest_copy: W,
        options: RunOptions,
    ) -> Self {
        Self {
            source,
            destination,
            source_remote,
            destination_remote,
            source_copy,
            dest_copy,
            options,
            phase: RunPhase::Initialized,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, phase: RunPhase) {
        tracing::info!(from = %self.phase, to = %phase, "Run phase");
        self.phase = phase;
    }

    /// Run every phase. Returns an error only for failures that make the rest of the run meaningless.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(
            self.source_remote.id.full_name(),
            self.destination_remote.id.full_name(),
            self.options.dry_run,
            self.options.conflict_policy,
        );

        self.register_remotes()?;

        let mut base_branch = self.destination_remote.default_branch.clone();
        if !self.options.skip_branches {
            self.sync_branches(&mut summary)?;
            self.transition(RunPhase::BranchesSynced);

            let branch = self.source_remote.default_branch.clone();
            match set_default_branch(self.destination, &branch, self.options.dry_run) {
                Ok(()) => {
                    summary.default_branch = Some(branch.clone());
                    base_branch = branch;
                }
                Err(error) => {
                    tracing::warn!("Could not set destination default branch: {}", error);
                    summary.default_branch_error = Some(error.to_string());
                }
            }
            self.transition(RunPhase::DefaultBranchSet);
        }

        if self.options.branches_only {
            self.transition(RunPhase::Complete);
            summary.finish();
            return Ok(summary);
        }

        self.transition(RunPhase::MigratingPullRequests);
        let prs = self
            .source
            .list_open_pull_requests()
            .map_err(|e| anyhow!("{}", e))
            .context("listing open source pull requests")?;
        tracing::info!("{} open pull request(s) to migrate", prs.len());

        for pr in &prs {
            let outcome = self.migrate_pull_request(pr, &base_branch);
            summary.record(outcome);
        }

        self.transition(RunPhase::Complete);
        summary.finish();
        tracing::info!(
            "Run complete: {} pull request(s) migrated, {} failed",
            summary.prs_succeeded(),
            summary.prs_failed()
        );
        Ok(summary)
    }

    /// Register the cross-remotes both phases push and fetch through.
    ///
    /// Runs before anything is pushed, so a conflicting remote aborts the run
    /// while both sides are still untouched.
    fn register_remotes(&mut self) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        if !self.options.skip_branches {
            self.source_copy
                .register_remote(TARGET_REMOTE, &self.destination_remote.clone_url)
                .context("registering target remote in source clone")?;
        }
        if !self.options.branches_only {
            self.dest_copy
                .register_remote(SOURCE_REMOTE, &self.source_remote.clone_url)
                .context("registering source remote in destination clone")?;
        }
        Ok(())
    }

    /// Push source branches the destination lacks.
    pub fn sync_branches(&mut self, summary: &mut RunSummary) -> Result<()> {
        let source_branches = branch_names(self.source)?;
        let destination_branches = branch_names(self.destination)?;

        let synchronizer = BranchSynchronizer::new(
            &self.destination_remote.clone_url,
            SyncOptions {
                dry_run: self.options.dry_run,
            },
        );
        summary.branches = synchronizer
            .sync(&mut self.source_copy, &source_branches, &destination_branches)
            .context("syncing branches")?;
        Ok(())
    }

    /// Recreate one pull request against `base_branch` on the destination.
    pub fn migrate_pull_request(&mut self, pr: &PullRequest, base_branch: &str) -> PrOutcome {
        let recreator = PullRequestRecreator::new(
            self.source,
            self.destination,
            base_branch,
            CommitReplayEngine::new(self.options.conflict_policy),
            self.options.dry_run,
        );
        recreator.migrate(pr, &mut self.dest_copy)
    }
}

fn branch_names<R: RepositoryHandle + ?Sized>(handle: &R) -> Result<Vec<String>> {
    let branches = handle
        .list_branches()
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("listing branches of {}", handle.identifier().full_name()))?;
    Ok(branches.into_iter().map(|b| b.name).collect())
}
