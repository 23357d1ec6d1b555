use std::path::{Path, PathBuf};

use git2::{Repository, build::CheckoutBuilder};
use thiserror::Error;

use super::registry::Project;

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Remote has no branch named {0}")]
    MissingRemoteBranch(String),
}

/// Repository synchronization and branch setup for the STARTING phase.
/// All operations are blocking libgit2 calls; the executor runs them on
/// a blocking thread.
#[derive(Clone, Default)]
pub struct GitService;

impl GitService {
    pub fn new() -> Self {
        GitService
    }

    /// Bring the project's local clone to the latest default-branch
    /// state and check out the task's working branch (created from the
    /// default branch head if it does not exist yet). Returns the
    /// working directory for the agent.
    pub fn prepare_task_workspace(
        &self,
        workspace_dir: &Path,
        project: &Project,
        task_branch: &str,
    ) -> Result<PathBuf, GitServiceError> {
        let repo_path = workspace_dir.join(&project.id);
        let repo = self.ensure_cloned(&repo_path, &project.repo_url)?;
        self.sync_default_branch(&repo, &project.default_branch)?;
        self.checkout_task_branch(&repo, task_branch, &project.default_branch)?;
        Ok(repo_path)
    }

    fn ensure_cloned(&self, path: &Path, repo_url: &str) -> Result<Repository, GitServiceError> {
        if path.join(".git").exists() {
            return Ok(Repository::open(path)?);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(url = %repo_url, path = %path.display(), "cloning project repository");
        Ok(Repository::clone(repo_url, path)?)
    }

    /// Fetch the default branch and hard-reset the local ref to the
    /// remote head, discarding any leftover local drift.
    fn sync_default_branch(
        &self,
        repo: &Repository,
        branch: &str,
    ) -> Result<(), GitServiceError> {
        let mut remote = repo.find_remote("origin")?;
        remote.fetch(&[branch], None, None).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                GitServiceError::MissingRemoteBranch(branch.to_string())
            } else {
                GitServiceError::Git(e)
            }
        })?;

        let remote_ref = repo
            .find_reference(&format!("refs/remotes/origin/{branch}"))
            .map_err(|_| GitServiceError::MissingRemoteBranch(branch.to_string()))?;
        let target = remote_ref.peel_to_commit()?;

        repo.reference(
            &format!("refs/heads/{branch}"),
            target.id(),
            true,
            "sync to remote head",
        )?;
        repo.set_head(&format!("refs/heads/{branch}"))?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    /// Create the working branch from the default branch head, or reuse
    /// it where a previous attempt already pushed work onto it.
    fn checkout_task_branch(
        &self,
        repo: &Repository,
        task_branch: &str,
        default_branch: &str,
    ) -> Result<(), GitServiceError> {
        let branch_ref = format!("refs/heads/{task_branch}");
        if repo.find_reference(&branch_ref).is_err() {
            let base = repo
                .find_reference(&format!("refs/heads/{default_branch}"))?
                .peel_to_commit()?;
            repo.reference(&branch_ref, base.id(), false, "task branch")?;
        }
        repo.set_head(&branch_ref)?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }
}
