//! Recreate one source pull request on the destination.
//!
//! The per-PR sub-state machine runs Fetching → Replaying → CreatingPr →
//! MigratingComments → MigratingReviewers → Done. A failure while fetching,
//! replaying or creating ends the PR in `Failed`; comment and reviewer
//! mirroring is best effort and never fails the PR.

use std::fmt;

use serde::Serialize;

use crate::{
    git::GitError,
    git2_ops::DEFAULT_REMOTE,
    github::{
        Comment, CreatePrRequest, GitHubError, PR_COMMITS_LIMIT, PullRequest, RepositoryHandle,
    },
    replay::{CommitReplayEngine, ReplayOutcome},
    working_copy::Workspace,
};

/// Remote name under which the source is registered in the destination clone.
pub const SOURCE_REMOTE: &str = "source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStage {
    Fetching,
    Replaying,
    CreatingPr,
    MigratingComments,
    MigratingReviewers,
    Done,
    Failed,
}

impl fmt::Display for PrStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Replaying => "replaying",
            Self::CreatingPr => "creating-pr",
            Self::MigratingComments => "migrating-comments",
            Self::MigratingReviewers => "migrating-reviewers",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Why a pull request could not be recreated, and where it stopped.
#[derive(Debug, Clone, Serialize)]
pub struct PrFailure {
    pub stage: PrStage,
    pub message: String,
}

impl fmt::Display for PrFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed while {}: {}", self.stage, self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrOutcome {
    pub source_number: u64,
    pub title: String,
    pub head: String,
    /// `Done` or `Failed`.
    pub stage: PrStage,
    pub failure: Option<PrFailure>,
    pub destination_number: Option<u64>,
    pub destination_url: Option<String>,
    /// An open destination PR for the head branch already existed and was reused.
    pub reused_existing: bool,
    pub replay: ReplayOutcome,
    pub comments_mirrored: usize,
    pub comments_failed: usize,
    pub reviewers_requested: Vec<String>,
    pub reviewers_skipped: Vec<String>,
}

impl PrOutcome {
    fn new(pr: &PullRequest) -> Self {
        Self {
            source_number: pr.number,
            title: pr.title.clone(),
            head: pr.head.ref_name.clone(),
            stage: PrStage::Fetching,
            failure: None,
            destination_number: None,
            destination_url: None,
            reused_existing: false,
            replay: ReplayOutcome::default(),
            comments_mirrored: 0,
            comments_failed: 0,
            reviewers_requested: Vec::new(),
            reviewers_skipped: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.stage == PrStage::Done
    }

    fn enter(&mut self, stage: PrStage) {
        tracing::debug!(pr = self.source_number, stage = %stage, "PR stage");
        self.stage = stage;
    }

    fn fail(mut self, message: impl fmt::Display) -> Self {
        let failure = PrFailure {
            stage: self.stage,
            message: message.to_string(),
        };
        tracing::warn!(pr = self.source_number, "Pull request #{} {}", self.source_number, failure);
        self.failure = Some(failure);
        self.stage = PrStage::Failed;
        self
    }
}

/// Body used for a mirrored comment, attributed to its original author.
pub fn mirrored_comment_body(comment: &Comment) -> String {
    match &comment.user {
        Some(user) => format!("**{}** commented on the source pull request:\n\n{}", user.login, comment.body),
        None => comment.body.clone(),
    }
}

pub struct PullRequestRecreator<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a D,
    /// Destination default branch, the base of every recreated PR.
    base_branch: &'a str,
    engine: CommitReplayEngine,
    dry_run: bool,
}

impl<'a, S, D> PullRequestRecreator<'a, S, D>
where
    S: RepositoryHandle + ?Sized,
    D: RepositoryHandle + ?Sized,
{
    pub fn new(
        source: &'a S,
        destination: &'a D,
        base_branch: &'a str,
        engine: CommitReplayEngine,
        dry_run: bool,
    ) -> Self {
        Self {
            source,
            destination,
            base_branch,
            engine,
            dry_run,
        }
    }

    /// Run every stage for `pr`. Never returns an error; failures are in the outcome.
    pub fn migrate<W: Workspace + ?Sized>(&self, pr: &PullRequest, dest_copy: &mut W) -> PrOutcome {
        let mut outcome = PrOutcome::new(pr);
        let head = pr.head.ref_name.as_str();
        tracing::info!(
            pr = pr.number,
            workdir = %dest_copy.path().display(),
            "Migrating pull request #{} '{}' ({}, was against '{}')",
            pr.number,
            pr.title,
            head,
            pr.base.ref_name
        );

        if self.dry_run {
            return self.plan_only(pr, outcome);
        }

        // Fetching
        if let Err(error) = self.prepare_branch(dest_copy, head) {
            return outcome.fail(error);
        }

        // Replaying
        outcome.enter(PrStage::Replaying);
        let commits = match self.source.pull_request_commits(pr.number) {
            Ok(commits) => commits,
            Err(error) => return outcome.fail(error),
        };
        if commits.len() >= PR_COMMITS_LIMIT {
            return outcome.fail(format!(
                "commit list truncated at {} by the API; replaying it would drop commits",
                commits.len()
            ));
        }
        match self.engine.replay(dest_copy, &commits) {
            Ok(replay) => {
                tracing::info!(
                    pr = pr.number,
                    "Replayed {} of {} commit(s) ({} conflicted, {} already present)",
                    replay.applied,
                    commits.len(),
                    replay.conflicted,
                    replay.skipped
                );
                outcome.replay = replay;
            }
            Err(error) => return outcome.fail(error),
        }

        // CreatingPr
        outcome.enter(PrStage::CreatingPr);
        if let Err(error) = dest_copy.push_branch(DEFAULT_REMOTE, head) {
            return outcome.fail(error);
        }
        let (dest_pr, reused) = match self.find_or_create(pr) {
            Ok(found) => found,
            Err(error) => return outcome.fail(error),
        };
        outcome.destination_number = Some(dest_pr.number);
        outcome.destination_url = Some(dest_pr.html_url.clone());
        outcome.reused_existing = reused;

        outcome.enter(PrStage::MigratingComments);
        self.mirror_comments(pr.number, dest_pr.number, &mut outcome);

        outcome.enter(PrStage::MigratingReviewers);
        self.mirror_reviewers(pr.number, dest_pr.number, &mut outcome);

        outcome.enter(PrStage::Done);
        tracing::info!(
            pr = pr.number,
            "Pull request #{} recreated as #{}",
            pr.number,
            dest_pr.number
        );
        outcome
    }

    /// Fetch the source head and check it out, creating it from the base when the destination lacks it.
    fn prepare_branch<W: Workspace + ?Sized>(
        &self,
        dest_copy: &mut W,
        head: &str,
    ) -> Result<(), GitError> {
        dest_copy.fetch_branch(SOURCE_REMOTE, head)?;
        match dest_copy.fetch_branch(DEFAULT_REMOTE, head) {
            Ok(()) => dest_copy.checkout_branch(head),
            Err(error) => {
                tracing::info!(
                    "Branch '{}' not on destination ({}), starting it from '{}'",
                    head,
                    error,
                    self.base_branch
                );
                dest_copy.fetch_branch(DEFAULT_REMOTE, self.base_branch)?;
                dest_copy.create_branch(head, &format!("{}/{}", DEFAULT_REMOTE, self.base_branch))
            }
        }
    }

    fn find_or_create(&self, pr: &PullRequest) -> Result<(PullRequest, bool), GitHubError> {
        let head = pr.head.ref_name.as_str();
        if let Some(existing) = self.destination.find_open_pull_request(head)? {
            tracing::info!(
                pr = pr.number,
                "Destination already has open PR #{} for '{}', reusing it",
                existing.number,
                head
            );
            return Ok((existing, true));
        }

        let request = CreatePrRequest {
            title: &pr.title,
            body: pr.body.as_deref().unwrap_or(""),
            head,
            base: self.base_branch,
        };
        match self.destination.create_pull_request(&request) {
            Ok(created) => Ok((created, false)),
            Err(GitHubError::PrAlreadyExists { .. }) => self
                .destination
                .find_open_pull_request(head)?
                .map(|existing| (existing, true))
                .ok_or(GitHubError::PrAlreadyExists {
                    head: head.to_string(),
                }),
            Err(error) => Err(error),
        }
    }

    fn mirror_comments(&self, source_number: u64, dest_number: u64, outcome: &mut PrOutcome) {
        let comments = match self.source.list_issue_comments(source_number) {
            Ok(comments) => comments,
            Err(error) => {
                tracing::warn!(pr = source_number, "Could not list comments: {}", error);
                return;
            }
        };
        for comment in &comments {
            match self
                .destination
                .create_issue_comment(dest_number, &mirrored_comment_body(comment))
            {
                Ok(()) => outcome.comments_mirrored += 1,
                Err(error) => {
                    tracing::warn!(pr = source_number, "Could not mirror comment: {}", error);
                    outcome.comments_failed += 1;
                }
            }
        }
    }

    fn mirror_reviewers(&self, source_number: u64, dest_number: u64, outcome: &mut PrOutcome) {
        let reviewers = match self.source.requested_reviewers(source_number) {
            Ok(reviewers) => reviewers,
            Err(error) => {
                tracing::warn!(pr = source_number, "Could not list review requests: {}", error);
                return;
            }
        };
        for login in reviewers {
            match self.destination.user_exists(&login) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        pr = source_number,
                        "Reviewer '{}' does not exist on destination, skipping",
                        login
                    );
                    outcome.reviewers_skipped.push(login);
                    continue;
                }
                Err(error) => {
                    tracing::warn!(pr = source_number, "Could not look up reviewer '{}': {}", login, error);
                    outcome.reviewers_skipped.push(login);
                    continue;
                }
            }
            match self.destination.request_reviewer(dest_number, &login) {
                Ok(()) => outcome.reviewers_requested.push(login),
                Err(error) => {
                    tracing::warn!(pr = source_number, "Could not request review from '{}': {}", login, error);
                    outcome.reviewers_skipped.push(login);
                }
            }
        }
    }

    fn plan_only(&self, pr: &PullRequest, mut outcome: PrOutcome) -> PrOutcome {
        let commits = self
            .source
            .pull_request_commits(pr.number)
            .map(|c| c.len())
            .unwrap_or(0);
        println!(
            "  Would replay {} commit(s) of #{} onto '{}' and open a PR against '{}'",
            commits, pr.number, pr.head.ref_name, self.base_branch
        );
        outcome.enter(PrStage::Done);
        outcome
    }
}
