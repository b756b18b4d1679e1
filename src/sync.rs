//! Branch synchronization from the source clone to the destination remote.
//!
//! Staged like a plan/apply tool:
//! 1. Plan: diff source branch names against destination branch names
//! 2. Apply: fetch, check out and push each missing branch to the `target` remote
//!
//! Branches that already exist at the destination are skipped, never compared
//! or force-updated, so a partially failed sync can simply be re-run.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use colored::Colorize;
use serde::Serialize;

use crate::{
    git::GitError,
    git2_ops::DEFAULT_REMOTE,
    github::{GitHubError, RepositoryHandle},
    working_copy::Workspace,
};

/// Remote name under which the destination is registered in the source clone.
pub const TARGET_REMOTE: &str = "target";

/// Result of diffing branch names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSyncPlan {
    /// Source branches missing at the destination, in source order.
    pub to_push: Vec<String>,
    /// Source branches the destination already has.
    pub skipped: Vec<String>,
}

impl BranchSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_push.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchSyncReport {
    pub pushed: BTreeSet<String>,
    pub skipped: BTreeSet<String>,
    pub failed: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Show plan without applying
    pub dry_run: bool,
}

/// Diff source branches against destination branches by name.
pub fn plan_branch_sync(source: &[String], destination: &[String]) -> BranchSyncPlan {
    let existing: HashSet<&str> = destination.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut plan = BranchSyncPlan::default();

    for name in source {
        if !seen.insert(name.as_str()) {
            continue;
        }
        if existing.contains(name.as_str()) {
            plan.skipped.push(name.clone());
        } else {
            plan.to_push.push(name.clone());
        }
    }
    plan
}

pub struct BranchSynchronizer<'a> {
    target_url: &'a str,
    options: SyncOptions,
}

impl<'a> BranchSynchronizer<'a> {
    pub fn new(target_url: &'a str, options: SyncOptions) -> Self {
        Self {
            target_url,
            options,
        }
    }

    /// Push every source branch the destination lacks.
    ///
    /// Per-branch failures are recorded in the report; only failing to register
    /// the `target` remote is returned as an error.
    pub fn sync<W: Workspace + ?Sized>(
        &self,
        source_copy: &mut W,
        source_branches: &[String],
        destination_branches: &[String],
    ) -> Result<BranchSyncReport, GitError> {
        let plan = plan_branch_sync(source_branches, destination_branches);
        print_plan(&plan, self.options.dry_run);

        let mut report = BranchSyncReport {
            skipped: plan.skipped.iter().cloned().collect(),
            ..Default::default()
        };
        for name in &plan.skipped {
            tracing::info!(branch = %name, "Branch already exists at destination, skipping");
        }

        if self.options.dry_run || plan.is_empty() {
            return Ok(report);
        }

        source_copy.register_remote(TARGET_REMOTE, self.target_url)?;
        let starting_branch = source_copy.current_branch().map(str::to_string);

        for name in &plan.to_push {
            match self.push_one(source_copy, name) {
                Ok(()) => {
                    tracing::info!(branch = %name, "Pushed branch to destination");
                    report.pushed.insert(name.clone());
                }
                Err(error) => {
                    tracing::warn!(branch = %name, error = %error, "Failed to sync branch");
                    report.failed.insert(name.clone(), error.to_string());
                }
            }
        }

        if let Some(branch) = starting_branch
            && source_copy.current_branch() != Some(branch.as_str())
            && let Err(error) = source_copy.checkout_branch(&branch)
        {
            tracing::warn!("Could not restore branch '{}': {}", branch, error);
        }

        Ok(report)
    }

    /// Sync a single branch: fetch, check out, push.
    pub fn push_one<W: Workspace + ?Sized>(
        &self,
        source_copy: &mut W,
        branch: &str,
    ) -> Result<(), GitError> {
        source_copy.fetch_branch(DEFAULT_REMOTE, branch)?;
        source_copy.checkout_branch(branch)?;
        source_copy.push_branch(TARGET_REMOTE, branch)
    }
}

/// Point the destination's default branch at `branch`. A pure overwrite, safe to repeat.
pub fn set_default_branch<R: RepositoryHandle + ?Sized>(
    destination: &R,
    branch: &str,
    dry_run: bool,
) -> Result<(), GitHubError> {
    if dry_run {
        println!(
            "  Would set default branch of {} to '{}'",
            destination.identifier().full_name(),
            branch.green()
        );
        return Ok(());
    }
    destination.set_default_branch(branch)?;
    tracing::info!(
        "Default branch of {} set to '{}'",
        destination.identifier().full_name(),
        branch
    );
    Ok(())
}

fn print_plan(plan: &BranchSyncPlan, dry_run: bool) {
    if plan.is_empty() {
        println!("{}", "All source branches already exist at destination.".green());
        return;
    }
    let verb = if dry_run { "Would push" } else { "Pushing" };
    println!("{} {} branch(es):", verb, plan.to_push.len());
    for name in &plan.to_push {
        println!("  {} {}", "+".green(), name.yellow());
    }
}
