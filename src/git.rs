use std::{
    fmt,
    path::Path,
    process::{Command, ExitStatus},
};

#[derive(Debug)]
pub struct GitOutput {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
    /// stdout and stderr together, for matching git's human-readable hints.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

impl AsRef<str> for GitOutput {
    fn as_ref(&self) -> &str {
        &self.stdout
    }
}

/// Errors raised by the version-control layer. Each carries the offending ref or path.
#[derive(Debug)]
pub enum GitError {
    /// `git clone` failed
    Clone { url: String, detail: String },
    /// Remote ref missing or unreachable
    Fetch {
        remote: String,
        branch: String,
        detail: String,
    },
    /// Push rejected by the remote
    Push {
        remote: String,
        branch: String,
        detail: String,
    },
    /// Checkout (plain or tracking) failed
    Checkout { branch: String, detail: String },
    /// A remote with this name is already registered under another URL
    RemoteMismatch {
        name: String,
        existing: String,
        requested: String,
    },
    /// Any other git subprocess failure
    Command { args: String, detail: String },
    /// libgit2 read failure
    Repository(git2::Error),
    Io(std::io::Error),
}

impl fmt::Display for GitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clone { url, detail } => write!(f, "Failed to clone {}: {}", url, detail),
            Self::Fetch {
                remote,
                branch,
                detail,
            } => write!(f, "Failed to fetch '{}' from '{}': {}", branch, remote, detail),
            Self::Push {
                remote,
                branch,
                detail,
            } => write!(f, "Push of '{}' to '{}' rejected: {}", branch, remote, detail),
            Self::Checkout { branch, detail } => {
                write!(f, "Failed to check out '{}': {}", branch, detail)
            }
            Self::RemoteMismatch {
                name,
                existing,
                requested,
            } => write!(
                f,
                "Remote '{}' already points at {} (requested {})",
                name, existing, requested
            ),
            Self::Command { args, detail } => write!(f, "git {} failed: {}", args, detail),
            Self::Repository(error) => write!(f, "libgit2 error: {}", error),
            Self::Io(error) => write!(f, "I/O error: {}", error),
        }
    }
}

impl std::error::Error for GitError {}

impl From<git2::Error> for GitError {
    fn from(error: git2::Error) -> Self {
        Self::Repository(error)
    }
}

impl From<std::io::Error> for GitError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

/// Run git inside `dir` and return its output regardless of exit status.
pub(crate) fn run_git_raw(dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    let printable = redact_args(args);
    tracing::debug!("Running `git {}` in {}", printable, dir.display());
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        // Never block on a credential prompt.
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()?;

    Ok(GitOutput {
        status: out.status,
        stdout: String::from_utf8_lossy(&out.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
    })
}

/// Run git inside `dir`, failing with [`GitError::Command`] on a non-zero exit.
pub(crate) fn run_git(dir: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
    let out = run_git_raw(dir, args)?;
    if !out.success() {
        return Err(GitError::Command {
            args: redact_args(args),
            detail: failure_detail(&out),
        });
    }
    Ok(out)
}

pub(crate) fn run_git_ok(dir: &Path, args: &[&str]) -> Result<bool, GitError> {
    Ok(run_git_raw(dir, args)?.success())
}

pub(crate) fn failure_detail(out: &GitOutput) -> String {
    let detail = if out.stderr.is_empty() {
        &out.stdout
    } else {
        &out.stderr
    };
    format!("{} ({})", redact(detail), out.status)
}

fn redact_args(args: &[&str]) -> String {
    args.iter()
        .map(|arg| redact(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip `user:secret@` credentials from any URL embedded in `text`.
pub fn redact(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("://") {
        let (head, tail) = rest.split_at(pos + 3);
        result.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c.is_whitespace())
            .unwrap_or(tail.len());
        match tail[..authority_end].rfind('@') {
            Some(at) => {
                result.push_str("***@");
                rest = &tail[at + 1..];
            }
            None => rest = tail,
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
pub(crate) fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
