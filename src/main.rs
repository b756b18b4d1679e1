use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{MigrationConfig, SideConfig, load_config_file},
    github::{GitHubClient, GitHubConfig, GitHubRepo},
    replay::ConflictPolicy,
    runner::{MigrationRunner, RemoteRepository, RunOptions},
    working_copy::{WorkingCopy, Workspace},
};

mod config;
mod git;
mod git2_ops;
mod github;
mod recreate;
mod replay;
mod report;
mod runner;
mod sync;
#[cfg(test)]
mod testing;
mod working_copy;

#[derive(Parser)]
#[command(author, version, about, arg_required_else_help = true)]
struct Cli {
    #[arg(long, short, global = true, help = "Enable verbose output")]
    verbose: bool,

    /// Path to the YAML config file (defaults to the XDG config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RepoArgs {
    /// Source repository, as `owner/name` or a remote URL.
    #[arg(long)]
    source: String,

    /// Destination repository, as `owner/name` or a remote URL.
    #[arg(long)]
    dest: String,

    /// Root directory for the local working copies.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Show what would happen without pushing or calling mutating APIs.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync branches, set the default branch, and recreate every open pull request.
    Migrate {
        #[command(flatten)]
        repos: RepoArgs,

        /// How cherry-pick conflicts are resolved.
        #[arg(long, value_enum, default_value_t = ConflictPolicy::PreferDestination)]
        conflict_policy: ConflictPolicy,

        /// Skip the branch sync and default-branch phases.
        #[arg(long)]
        skip_branches: bool,

        /// Write the run summary as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Exit with status 2 if any pull request failed.
        #[arg(long)]
        fail_on_pr_errors: bool,
    },
    /// Push missing branches and set the default branch only.
    SyncBranches {
        #[command(flatten)]
        repos: RepoArgs,
    },
    /// Print shell completions.
    Completions { shell: clap_complete::Shell },
}

fn main() {
    match inner_main() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = ?e);
            std::process::exit(1);
        }
    }
}

fn inner_main() -> Result<i32> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "git-migrate", &mut std::io::stdout());
            Ok(0)
        }
        Commands::SyncBranches { repos } => {
            let options = RunOptions {
                dry_run: repos.dry_run,
                branches_only: true,
                ..Default::default()
            };
            let summary = migrate(&cli.config, &repos, options)?;
            summary.print();
            Ok(0)
        }
        Commands::Migrate {
            repos,
            conflict_policy,
            skip_branches,
            report,
            fail_on_pr_errors,
        } => {
            let options = RunOptions {
                dry_run: repos.dry_run,
                conflict_policy,
                skip_branches,
                branches_only: false,
            };
            let summary = migrate(&cli.config, &repos, options)?;
            summary.print();
            if summary.has_failures() {
                tracing::warn!("Migration finished with failures; re-run to retry them");
            }
            if let Some(path) = report {
                summary.write_json(&path)?;
            }
            if fail_on_pr_errors && summary.prs_failed() > 0 {
                return Ok(2);
            }
            Ok(0)
        }
    }
}

fn repository_handle(side: &SideConfig) -> GitHubRepo {
    let client = GitHubClient::new(GitHubConfig::for_host(&side.repo.host, side.token.clone()));
    GitHubRepo::new(client, side.repo.clone())
}

fn migrate(
    config_path: &Option<PathBuf>,
    repos: &RepoArgs,
    options: RunOptions,
) -> Result<report::RunSummary> {
    let file = load_config_file(config_path.as_deref())?;
    let config = MigrationConfig::resolve(&repos.source, &repos.dest, repos.workdir.as_deref(), &file)?;

    let source = repository_handle(&config.source);
    let destination = repository_handle(&config.destination);

    // Fatal checks first: nothing is cloned or pushed until both sides answer.
    let source_remote = RemoteRepository::resolve(&source, &config.source.token)
        .context("checking source repository")?;
    let destination_remote = RemoteRepository::resolve(&destination, &config.destination.token)
        .context("checking destination repository")?;

    let source_copy = WorkingCopy::ensure_cloned(&source_remote.clone_url, &config.source.workdir)
        .context("preparing source working copy")?;
    let dest_copy = WorkingCopy::ensure_cloned(
        &destination_remote.clone_url,
        &config.destination.workdir,
    )
    .context("preparing destination working copy")?;
    for copy in [&source_copy, &dest_copy] {
        if copy.is_dirty() {
            tracing::warn!(
                "{} has local changes; they will be stashed before checkouts",
                copy.path().display()
            );
        }
    }

    let mut runner = MigrationRunner::new(
        &source,
        &destination,
        source_remote,
        destination_remote,
        source_copy,
        dest_copy,
        options,
    );
    runner.run()
}
