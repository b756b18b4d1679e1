//! In-memory stand-ins for a remote repository and a local working copy.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
};

use crate::{
    git::GitError,
    github::{
        Branch, Comment, CreatePrRequest, EditRepoRequest, GitHubError, PrBranchRef,
        PrState, PullRequest, RepoIdentifier, RepositoryHandle, RepositoryInfo, User,
    },
    replay::{ConflictSide, PickResult, ReplayTarget},
    working_copy::Workspace,
};

// ============== Workspace ==============

/// A working copy whose branches are plain lists of commit ids.
pub struct FakeWorkspace {
    path: PathBuf,
    current: Option<String>,
    local: HashMap<String, Vec<String>>,
    /// (remote, branch) -> commits
    remote_refs: HashMap<(String, String), Vec<String>>,
    /// Branches each remote would serve on fetch.
    served: HashMap<(String, String), Vec<String>>,
    remotes: BTreeMap<String, String>,
    pub pushes: Vec<(String, String)>,
    conflicts: HashMap<String, Vec<String>>,
    empties: HashSet<String>,
    failing_picks: HashSet<String>,
    rejected_pushes: HashSet<String>,
    pending: Option<(String, Vec<String>)>,
    resolutions: Vec<(String, ConflictSide)>,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/fake"),
            current: None,
            local: HashMap::new(),
            remote_refs: HashMap::new(),
            served: HashMap::new(),
            remotes: BTreeMap::new(),
            pushes: Vec::new(),
            conflicts: HashMap::new(),
            empties: HashSet::new(),
            failing_picks: HashSet::new(),
            rejected_pushes: HashSet::new(),
            pending: None,
            resolutions: Vec::new(),
        }
    }

    pub fn on_branch(branch: &str) -> Self {
        let mut ws = Self::new();
        ws.local.insert(branch.to_string(), Vec::new());
        ws.current = Some(branch.to_string());
        ws
    }

    /// Make `remote` serve `branch` at `commits` when fetched.
    pub fn serve(&mut self, remote: &str, branch: &str, commits: &[&str]) {
        self.served.insert(
            (remote.to_string(), branch.to_string()),
            commits.iter().map(|c| c.to_string()).collect(),
        );
    }

    pub fn conflict_on(&mut self, commit: &str, paths: &[&str]) {
        self.conflicts.insert(
            commit.to_string(),
            paths.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn empty_on(&mut self, commit: &str) {
        self.empties.insert(commit.to_string());
    }

    pub fn fail_pick_on(&mut self, commit: &str) {
        self.failing_picks.insert(commit.to_string());
    }

    pub fn reject_push_of(&mut self, branch: &str) {
        self.rejected_pushes.insert(branch.to_string());
    }

    pub fn branch_commits(&self, branch: &str) -> Vec<String> {
        self.local.get(branch).cloned().unwrap_or_default()
    }

    pub fn pick_in_progress(&self) -> bool {
        self.pending.is_some()
    }

    pub fn resolutions(&self) -> Vec<(String, ConflictSide)> {
        self.resolutions.clone()
    }

    pub fn remote_url(&self, name: &str) -> Option<&str> {
        self.remotes.get(name).map(String::as_str)
    }

    fn current_commits(&mut self) -> Result<&mut Vec<String>, GitError> {
        let branch = self.current.clone().ok_or_else(|| GitError::Command {
            args: "cherry-pick".to_string(),
            detail: "no branch checked out".to_string(),
        })?;
        Ok(self.local.entry(branch).or_default())
    }
}

impl Workspace for FakeWorkspace {
    fn path(&self) -> &Path {
        &self.path
    }

    fn current_branch(&self) -> Option<&str> {
        self.current.as_deref()
    }

    fn fetch_branch(&mut self, remote: &str, branch: &str) -> Result<(), GitError> {
        let key = (remote.to_string(), branch.to_string());
        match self.served.get(&key) {
            Some(commits) => {
                self.remote_refs.insert(key, commits.clone());
                Ok(())
            }
            None => Err(GitError::Fetch {
                remote: remote.to_string(),
                branch: branch.to_string(),
                detail: "couldn't find remote ref".to_string(),
            }),
        }
    }

    fn checkout_branch(&mut self, branch: &str) -> Result<(), GitError> {
        if !self.local.contains_key(branch) {
            let upstream = self
                .remote_refs
                .get(&("origin".to_string(), branch.to_string()))
                .cloned()
                .ok_or_else(|| GitError::Checkout {
                    branch: branch.to_string(),
                    detail: "no origin ref to track".to_string(),
                })?;
            self.local.insert(branch.to_string(), upstream);
        }
        self.current = Some(branch.to_string());
        Ok(())
    }

    fn create_branch(&mut self, branch: &str, start_point: &str) -> Result<(), GitError> {
        let commits = match start_point.split_once('/') {
            Some((remote, name)) => self
                .remote_refs
                .get(&(remote.to_string(), name.to_string()))
                .cloned(),
            None => self.local.get(start_point).cloned(),
        }
        .ok_or_else(|| GitError::Checkout {
            branch: branch.to_string(),
            detail: format!("unknown start point {}", start_point),
        })?;
        self.local.insert(branch.to_string(), commits);
        self.current = Some(branch.to_string());
        Ok(())
    }

    fn register_remote(&mut self, name: &str, url: &str) -> Result<(), GitError> {
        match self.remotes.get(name) {
            Some(existing) if existing != url => Err(GitError::RemoteMismatch {
                name: name.to_string(),
                existing: existing.clone(),
                requested: url.to_string(),
            }),
            _ => {
                self.remotes.insert(name.to_string(), url.to_string());
                Ok(())
            }
        }
    }

    fn push_branch(&mut self, remote: &str, branch: &str) -> Result<(), GitError> {
        if self.rejected_pushes.contains(branch) {
            return Err(GitError::Push {
                remote: remote.to_string(),
                branch: branch.to_string(),
                detail: "rejected (fetch first)".to_string(),
            });
        }
        let commits = self
            .current
            .as_ref()
            .and_then(|current| self.local.get(current))
            .cloned()
            .unwrap_or_default();
        self.remote_refs
            .insert((remote.to_string(), branch.to_string()), commits);
        self.pushes.push((remote.to_string(), branch.to_string()));
        Ok(())
    }
}

impl ReplayTarget for FakeWorkspace {
    fn contains_commit(&mut self, commit: &str) -> Result<bool, GitError> {
        Ok(self
            .current
            .as_ref()
            .and_then(|current| self.local.get(current))
            .is_some_and(|commits| commits.iter().any(|c| c == commit)))
    }

    fn cherry_pick(&mut self, commit: &str) -> Result<PickResult, GitError> {
        if self.failing_picks.contains(commit) {
            self.pending = Some((commit.to_string(), Vec::new()));
            return Err(GitError::Command {
                args: format!("cherry-pick {}", commit),
                detail: "bad object".to_string(),
            });
        }
        if self.empties.contains(commit) {
            self.pending = Some((commit.to_string(), Vec::new()));
            return Ok(PickResult::Empty);
        }
        if let Some(paths) = self.conflicts.get(commit).cloned() {
            self.pending = Some((commit.to_string(), paths));
            return Ok(PickResult::Conflicted);
        }
        self.current_commits()?.push(commit.to_string());
        Ok(PickResult::Applied)
    }

    fn conflicted_paths(&self) -> Result<Vec<String>, GitError> {
        Ok(self
            .pending
            .as_ref()
            .map(|(_, paths)| paths.clone())
            .unwrap_or_default())
    }

    fn resolve_path(&mut self, path: &str, side: ConflictSide) -> Result<(), GitError> {
        if let Some((_, paths)) = self.pending.as_mut() {
            paths.retain(|p| p != path);
        }
        self.resolutions.push((path.to_string(), side));
        Ok(())
    }

    fn conclude_pick(&mut self) -> Result<(), GitError> {
        let (commit, unresolved) = self.pending.take().ok_or_else(|| GitError::Command {
            args: "commit".to_string(),
            detail: "no cherry-pick in progress".to_string(),
        })?;
        if !unresolved.is_empty() {
            return Err(GitError::Command {
                args: "commit".to_string(),
                detail: format!("unmerged paths: {:?}", unresolved),
            });
        }
        self.current_commits()?.push(commit);
        Ok(())
    }

    fn skip_pick(&mut self) -> Result<(), GitError> {
        self.pending = None;
        Ok(())
    }

    fn abort_pick(&mut self) -> Result<(), GitError> {
        self.pending = None;
        Ok(())
    }
}

// ============== Repository ==============

pub fn pull_request(number: u64, head: &str, title: &str, body: Option<&str>) -> PullRequest {
    PullRequest {
        number,
        state: PrState::Open,
        title: title.to_string(),
        body: body.map(str::to_string),
        html_url: format!("https://example.test/pull/{}", number),
        base: PrBranchRef {
            ref_name: "main".to_string(),
        },
        head: PrBranchRef {
            ref_name: head.to_string(),
        },
    }
}

/// A repository that keeps everything in memory and records every mutation.
pub struct FakeRepository {
    id: RepoIdentifier,
    default_branch: RefCell<String>,
    branches: RefCell<Vec<String>>,
    prs: RefCell<Vec<PullRequest>>,
    commits: HashMap<u64, Vec<String>>,
    comments: RefCell<HashMap<u64, Vec<Comment>>>,
    reviewers: HashMap<u64, Vec<String>>,
    users: HashSet<String>,
    requested: RefCell<Vec<(u64, String)>>,
    next_number: Cell<u64>,
    pub fail_info: Option<u16>,
    pub fail_create_for: HashSet<String>,
}

impl FakeRepository {
    pub fn new(full_name: &str, default_branch: &str) -> Self {
        let id = RepoIdentifier::parse(full_name, "example.test").unwrap();
        Self {
            id,
            default_branch: RefCell::new(default_branch.to_string()),
            branches: RefCell::new(vec![default_branch.to_string()]),
            prs: RefCell::new(Vec::new()),
            commits: HashMap::new(),
            comments: RefCell::new(HashMap::new()),
            reviewers: HashMap::new(),
            users: HashSet::new(),
            requested: RefCell::new(Vec::new()),
            next_number: Cell::new(100),
            fail_info: None,
            fail_create_for: HashSet::new(),
        }
    }

    pub fn with_branches(self, names: &[&str]) -> Self {
        *self.branches.borrow_mut() = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_pull_request(mut self, pr: PullRequest, commits: &[&str]) -> Self {
        self.commits
            .insert(pr.number, commits.iter().map(|c| c.to_string()).collect());
        self.prs.borrow_mut().push(pr);
        self
    }

    pub fn with_comments(self, number: u64, bodies: &[&str]) -> Self {
        self.comments.borrow_mut().insert(
            number,
            bodies
                .iter()
                .map(|body| Comment {
                    body: body.to_string(),
                    user: Some(User {
                        login: "commenter".to_string(),
                    }),
                })
                .collect(),
        );
        self
    }

    pub fn with_reviewers(mut self, number: u64, logins: &[&str]) -> Self {
        self.reviewers
            .insert(number, logins.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn with_users(mut self, logins: &[&str]) -> Self {
        self.users.extend(logins.iter().map(|l| l.to_string()));
        self
    }

    pub fn default_branch(&self) -> String {
        self.default_branch.borrow().clone()
    }

    pub fn created(&self) -> Vec<PullRequest> {
        self.prs.borrow().clone()
    }

    pub fn comment_bodies(&self, number: u64) -> Vec<String> {
        self.comments
            .borrow()
            .get(&number)
            .map(|cs| cs.iter().map(|c| c.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn requested(&self) -> Vec<(u64, String)> {
        self.requested.borrow().clone()
    }
}

impl RepositoryHandle for FakeRepository {
    fn identifier(&self) -> &RepoIdentifier {
        &self.id
    }

    fn info(&self) -> Result<RepositoryInfo, GitHubError> {
        match self.fail_info {
            Some(401) => return Err(GitHubError::Unauthorized),
            Some(404) => {
                return Err(GitHubError::NotFound {
                    what: format!("repository {}", self.id.full_name()),
                });
            }
            _ => {}
        }
        Ok(RepositoryInfo {
            full_name: self.id.full_name(),
            default_branch: self.default_branch(),
            clone_url: format!("https://example.test/{}.git", self.id.full_name()),
        })
    }

    fn list_branches(&self) -> Result<Vec<Branch>, GitHubError> {
        Ok(self
            .branches
            .borrow()
            .iter()
            .map(|name| Branch { name: name.clone() })
            .collect())
    }

    fn list_open_pull_requests(&self) -> Result<Vec<PullRequest>, GitHubError> {
        Ok(self
            .prs
            .borrow()
            .iter()
            .filter(|pr| pr.state == PrState::Open)
            .cloned()
            .collect())
    }

    fn pull_request_commits(&self, number: u64) -> Result<Vec<String>, GitHubError> {
        Ok(self.commits.get(&number).cloned().unwrap_or_default())
    }

    fn find_open_pull_request(&self, head: &str) -> Result<Option<PullRequest>, GitHubError> {
        Ok(self
            .prs
            .borrow()
            .iter()
            .find(|pr| pr.state == PrState::Open && pr.head.ref_name == head)
            .cloned())
    }

    fn create_pull_request(&self, request: &CreatePrRequest) -> Result<PullRequest, GitHubError> {
        if self.fail_create_for.contains(request.head) {
            return Err(GitHubError::Api {
                status: 422,
                message: "Validation Failed".to_string(),
            });
        }
        let number = self.next_number.get();
        self.next_number.set(number + 1);
        let mut pr = pull_request(number, request.head, request.title, Some(request.body));
        pr.base.ref_name = request.base.to_string();
        self.prs.borrow_mut().push(pr.clone());
        Ok(pr)
    }

    fn list_issue_comments(&self, number: u64) -> Result<Vec<Comment>, GitHubError> {
        Ok(self
            .comments
            .borrow()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    fn create_issue_comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
        self.comments
            .borrow_mut()
            .entry(number)
            .or_default()
            .push(Comment {
                body: body.to_string(),
                user: None,
            });
        Ok(())
    }

    fn requested_reviewers(&self, number: u64) -> Result<Vec<String>, GitHubError> {
        Ok(self.reviewers.get(&number).cloned().unwrap_or_default())
    }

    fn request_reviewer(&self, number: u64, login: &str) -> Result<(), GitHubError> {
        if !self.users.contains(login) {
            return Err(GitHubError::Api {
                status: 422,
                message: format!("{} is not a collaborator", login),
            });
        }
        self.requested
            .borrow_mut()
            .push((number, login.to_string()));
        Ok(())
    }

    fn user_exists(&self, login: &str) -> Result<bool, GitHubError> {
        Ok(self.users.contains(login))
    }

    fn edit_repository(&self, request: &EditRepoRequest) -> Result<(), GitHubError> {
        if let Some(branch) = request.default_branch {
            if !self.branches.borrow().iter().any(|b| b == branch) {
                return Err(GitHubError::Api {
                    status: 422,
                    message: format!("branch {} not found", branch),
                });
            }
            *self.default_branch.borrow_mut() = branch.to_string();
        }
        Ok(())
    }
}
