//! Per-run tally and its terminal/JSON rendering.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::{
    recreate::{PrOutcome, PrStage},
    replay::ConflictPolicy,
    sync::BranchSyncReport,
};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub conflict_policy: ConflictPolicy,
    pub branches: BranchSyncReport,
    /// Default branch the destination was pointed at, if that step ran.
    pub default_branch: Option<String>,
    pub default_branch_error: Option<String>,
    pub pull_requests: Vec<PrOutcome>,
}

impl RunSummary {
    pub fn new(source: String, destination: String, dry_run: bool, conflict_policy: ConflictPolicy) -> Self {
        Self {
            source,
            destination,
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            conflict_policy,
            branches: BranchSyncReport::default(),
            default_branch: None,
            default_branch_error: None,
            pull_requests: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: PrOutcome) {
        self.pull_requests.push(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn prs_succeeded(&self) -> usize {
        self.pull_requests.iter().filter(|pr| pr.succeeded()).count()
    }

    pub fn prs_failed(&self) -> usize {
        self.pull_requests
            .iter()
            .filter(|pr| pr.stage == PrStage::Failed)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.prs_failed() > 0 || !self.branches.failed.is_empty()
    }

    pub fn print(&self) {
        println!();
        println!(
            "{} {} → {}{}",
            "Migration summary:".bold(),
            self.source,
            self.destination,
            if self.dry_run { " (dry run)" } else { "" }
        );
        println!(
            "  Branches: {} pushed, {} skipped, {} failed",
            self.branches.pushed.len().to_string().green(),
            self.branches.skipped.len(),
            colored_count(self.branches.failed.len())
        );
        for (branch, error) in &self.branches.failed {
            println!("    {} {}: {}", "✗".red(), branch.yellow(), error);
        }
        match (&self.default_branch, &self.default_branch_error) {
            (_, Some(error)) => println!("  Default branch: {} ({})", "not set".red(), error),
            (Some(branch), None) => println!("  Default branch: {}", branch.green()),
            (None, None) => {}
        }
        println!(
            "  Pull requests: {} migrated, {} failed (conflict policy: {})",
            self.prs_succeeded().to_string().green(),
            colored_count(self.prs_failed()),
            self.conflict_policy
        );
        for pr in &self.pull_requests {
            print_outcome(pr);
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("writing report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}

fn colored_count(count: usize) -> colored::ColoredString {
    if count == 0 {
        count.to_string().normal()
    } else {
        count.to_string().red().bold()
    }
}

fn print_outcome(pr: &PrOutcome) {
    match &pr.failure {
        Some(failure) => println!(
            "    {} #{} {} ({}) {}",
            "✗".red(),
            pr.source_number,
            pr.title,
            pr.head.yellow(),
            failure.to_string().red()
        ),
        None => {
            let target = match (pr.destination_number, pr.reused_existing) {
                (Some(number), true) => format!("→ #{} (existing)", number),
                (Some(number), false) => format!("→ #{}", number),
                (None, _) => "(planned)".to_string(),
            };
            println!(
                "    {} #{} {} ({}) {}",
                "✓".green(),
                pr.source_number,
                pr.title,
                pr.head.yellow(),
                target.green()
            );
            if pr.replay.conflicted > 0 {
                println!(
                    "        {} commit(s) had conflicts resolved by policy",
                    pr.replay.conflicted.to_string().yellow()
                );
            }
            if !pr.reviewers_skipped.is_empty() {
                println!(
                    "        reviewers skipped: {}",
                    pr.reviewers_skipped.join(", ").yellow()
                );
            }
        }
    }
}
