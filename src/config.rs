//! Run configuration: hosts, tokens, and working-copy locations for both sides.
//!
//! Values come from the environment first, then the YAML config file, then
//! defaults. A missing token is fatal before anything touches either remote.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::github::{GitHubError, RepoIdentifier};

pub const DEFAULT_DESTINATION_HOST: &str = "github.com";

/// Which end of the migration a setting belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }

    /// Environment variables consulted for (host, token), in priority order.
    fn env_keys(self) -> (&'static [&'static str], &'static [&'static str]) {
        match self {
            Self::Source => (&["SOURCE_HOST", "GHES_HOST"], &["SOURCE_TOKEN", "GHES_TOKEN"]),
            Self::Destination => (&["DEST_HOST", "GHEC_HOST"], &["DEST_TOKEN", "GHEC_TOKEN"]),
        }
    }
}

/// Config file structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub source: SideFile,
    #[serde(default)]
    pub destination: SideFile,
    /// Root directory for working copies.
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SideFile {
    pub host: Option<String>,
    pub token: Option<String>,
    pub workdir: Option<PathBuf>,
}

/// Fully resolved settings for one side.
#[derive(Debug, Clone)]
pub struct SideConfig {
    pub repo: RepoIdentifier,
    pub token: String,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: SideConfig,
    pub destination: SideConfig,
}

impl MigrationConfig {
    /// Resolve both sides from the environment, `config_file`, and the repository arguments.
    pub fn resolve(
        source_repo: &str,
        dest_repo: &str,
        workdir: Option<&Path>,
        config_file: &ConfigFile,
    ) -> Result<Self> {
        let root = match workdir.map(Path::to_path_buf).or(config_file.workdir.clone()) {
            Some(root) => root,
            None => default_workdir_root()?,
        };
        Ok(Self {
            source: resolve_side(Side::Source, source_repo, &root, &config_file.source)?,
            destination: resolve_side(
                Side::Destination,
                dest_repo,
                &root,
                &config_file.destination,
            )?,
        })
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .inspect(|_| tracing::debug!("Using {} from environment", key))
    })
}

fn resolve_side(side: Side, repo_arg: &str, root: &Path, file: &SideFile) -> Result<SideConfig> {
    let (host_keys, token_keys) = side.env_keys();

    let host = first_env(host_keys)
        .or_else(|| file.host.clone())
        .or_else(|| (side == Side::Destination).then(|| DEFAULT_DESTINATION_HOST.to_string()));
    let host = host.map(|h| normalize_host(&h));

    // A full URL names its own host; `owner/name` needs one from config.
    let repo = match &host {
        Some(host) => RepoIdentifier::parse(repo_arg, host),
        None => RepoIdentifier::parse(repo_arg, ""),
    }
    .map_err(|e| anyhow!(e))
    .with_context(|| format!("parsing {} repository", side.label()))?;
    if repo.host.is_empty() {
        bail!(
            "No {} host configured; set {} or `{}.host` in the config file",
            side.label(),
            host_keys[0],
            side.label()
        );
    }

    let token = first_env(token_keys)
        .or_else(|| file.token.clone())
        .ok_or(GitHubError::NoToken)
        .with_context(|| {
            format!(
                "{} token missing; set {} or `{}.token` in the config file",
                side.label(),
                token_keys[0],
                side.label()
            )
        })?;

    let workdir = match &file.workdir {
        Some(path) => path.clone(),
        None => default_workdir(root, side, &repo),
    };

    Ok(SideConfig {
        repo,
        token,
        workdir,
    })
}

/// `https://ghes.example.com/` -> `ghes.example.com`
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/').to_string()
}

/// `<root>/<side>/<owner>-<name>`
pub fn default_workdir(root: &Path, side: Side, repo: &RepoIdentifier) -> PathBuf {
    root.join(side.label())
        .join(format!("{}-{}", repo.owner, repo.repo))
}

fn default_workdir_root() -> Result<PathBuf> {
    let base_dirs = xdg::BaseDirectories::with_prefix(env!("CARGO_PKG_NAME"));
    base_dirs
        .get_data_file("workdirs")
        .ok_or_else(|| anyhow!("Failed to determine a data directory for working copies"))
}

fn default_config_path() -> Option<PathBuf> {
    let base_dirs = xdg::BaseDirectories::with_prefix(env!("CARGO_PKG_NAME"));
    base_dirs.get_config_file("config.yaml")
}

/// Load the config file. An explicit path must exist; the default location may be absent.
pub fn load_config_file(explicit: Option<&Path>) -> Result<ConfigFile> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(ConfigFile::default()),
        },
    };

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if !required => {
            tracing::debug!(
                "No config file at {} ({}), using environment only",
                path.display(),
                error
            );
            return Ok(ConfigFile::default());
        }
        Err(error) => {
            return Err(error).with_context(|| format!("reading {}", path.display()));
        }
    };
    parse_config(&contents).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<ConfigFile> {
    if contents.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(contents)?)
}
