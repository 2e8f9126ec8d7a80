//! Sandbox lifecycle coordination.
//!
//! Composes [`WorktreeManager`] and a [`ContainerRuntime`] into the sandbox
//! state machine: `up` provisions branch, worktree, and environment (rolling
//! back on start failure), `exec` runs agent tasks and appends to the
//! session log, `merge` rebases and fast-forwards or reports conflicts for
//! in-place remediation, `down` and `cleanup` tear resources down.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::container::{ensure_devcontainer_config, ContainerHandle, ContainerRuntime};
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::secrets::CredentialForwarder;
use crate::worktree::{RebaseOutcome, WorktreeInfo, WorktreeManager};

use super::meta::{SandboxMeta, SandboxState, SessionRecord};

/// Identifying info returned by a successful `up`.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxUp {
    pub branch: String,
    pub worktree_path: PathBuf,
    pub container_id: String,
    pub remote_user: String,
    pub remote_workspace_folder: String,
}

/// Result of an `exec` step.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxExec {
    pub worktree_path: PathBuf,
    pub exit_code: i32,
    pub session_id: String,
}

/// Outcome of a merge attempt.
///
/// A conflict is a recoverable condition communicated as data: the worktree,
/// branch, and environment are left untouched so the caller can remediate in
/// place and retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Rebase and fast-forward completed; the sandbox was torn down.
    Merged { target: String },
    /// Overlapping edits; the listed paths are conflicted.
    Conflicted { files: Vec<PathBuf> },
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    /// All sandbox branches with no live worktree (excluding the current
    /// branch).
    pub orphaned_branches: Vec<String>,
    /// The subset actually deleted (empty on a dry run).
    pub deleted_branches: Vec<String>,
}

/// A live sandbox, as reported by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxInfo {
    pub branch: String,
    pub worktree_path: PathBuf,
    pub head: Option<String>,
    pub state: SandboxState,
    pub sessions: Vec<SessionRecord>,
}

/// Coordinates sandbox lifecycles for one or more repositories.
pub struct SandboxCoordinator<R: ContainerRuntime> {
    runtime: R,
    config: Config,
    /// Counter for generating unique branch names (shared across clones).
    counter: Arc<AtomicU64>,
}

impl<R: ContainerRuntime> SandboxCoordinator<R> {
    /// Creates a coordinator with the given runtime and configuration.
    pub fn new(runtime: R, config: Config) -> Self {
        Self {
            runtime,
            config,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Provisions a sandbox: branch + worktree + execution environment.
    ///
    /// The branch name is auto-generated (timestamp-derived) when not given.
    /// If the environment fails to start, the worktree and branch created by
    /// this call are rolled back before the error is re-raised, so no
    /// partial sandbox is left behind.
    pub async fn up(
        &self,
        dir: &Path,
        branch: Option<&str>,
        base: &str,
        worktree_dir: Option<&Path>,
        progress: &dyn Progress,
    ) -> Result<SandboxUp> {
        let manager = WorktreeManager::discover(dir)?;
        let branch = branch
            .map(str::to_string)
            .unwrap_or_else(|| self.generate_branch_name());
        let path = worktree_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.worktree_base().join(branch.replace('/', "-")));

        manager.create(&path, &branch, base)?;

        match self.start_environment(&path, &branch, progress).await {
            Ok(handle) => {
                tracing::info!(branch = %branch, container = %handle.container_id, "sandbox up");
                Ok(SandboxUp {
                    branch,
                    worktree_path: path,
                    container_id: handle.container_id,
                    remote_user: handle.remote_user,
                    remote_workspace_folder: handle.remote_workspace_folder,
                })
            }
            Err(e) => {
                tracing::warn!(
                    branch = %branch,
                    error = %e,
                    "environment start failed, rolling back worktree and branch"
                );
                if let Err(re) = manager.remove(&path) {
                    tracing::warn!(error = %re, "rollback: failed to remove worktree");
                }
                if let Err(re) = manager.delete_branch(&branch) {
                    tracing::warn!(error = %re, "rollback: failed to delete branch");
                }
                Err(e)
            }
        }
    }

    /// Runs an agent task inside the sandbox for `branch`.
    ///
    /// The environment is (re)started if needed. A caller-supplied session
    /// id resumes a prior conversation; otherwise a fresh id is generated.
    /// Every call appends a record to the sandbox's session log.
    pub async fn exec(
        &self,
        dir: &Path,
        branch: &str,
        task: &str,
        session_id: Option<&str>,
        progress: &dyn Progress,
    ) -> Result<SandboxExec> {
        let manager = WorktreeManager::discover(dir)?;
        let worktree = self.find_worktree(&manager, branch)?;
        let env = self.credentials().environment();

        self.runtime.up(&worktree.path, &env, progress).await?;

        let resuming = session_id.is_some();
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut command = self.config.agent_command.clone();
        let session_flag = if resuming { "--resume" } else { "--session-id" };
        command.push(session_flag.to_string());
        command.push(session_id.clone());
        command.push(task.to_string());

        let outcome = self
            .runtime
            .exec(
                &worktree.path,
                &command,
                &env,
                self.config.exec_timeout(),
                progress,
            )
            .await?;

        let mut meta = SandboxMeta::load(&worktree.path)?
            .unwrap_or_else(|| SandboxMeta::new(branch));
        // Exec may be the remediation step for a conflicted merge; the
        // sandbox stays conflicted until the unmerged paths are gone.
        meta.state = match meta.state {
            SandboxState::Conflicted { .. } => {
                let files = manager.conflicted_files(&worktree.path)?;
                if files.is_empty() {
                    SandboxState::Ready
                } else {
                    SandboxState::Conflicted { files }
                }
            }
            _ => SandboxState::Ready,
        };
        meta.append_session(SessionRecord {
            session_id: session_id.clone(),
            created_at: Utc::now(),
            task: task.to_string(),
        });
        meta.save(&worktree.path)?;

        tracing::info!(
            branch = %branch,
            session = %session_id,
            exit_code = outcome.exit_code,
            "sandbox exec finished"
        );

        Ok(SandboxExec {
            worktree_path: worktree.path,
            exit_code: outcome.exit_code,
            session_id,
        })
    }

    /// Merges the sandbox branch into the caller's current branch.
    ///
    /// The sandbox branch is rebased onto the target first. On conflict the
    /// worktree, branch, and environment are all retained and the conflicted
    /// paths reported. On a clean rebase the target is fast-forwarded and
    /// the sandbox torn down; each teardown step is best-effort.
    pub async fn merge(&self, dir: &Path, branch: &str) -> Result<MergeOutcome> {
        let manager = WorktreeManager::discover(dir)?;
        let target = manager.current_branch()?;
        let worktree = self.find_worktree(&manager, branch)?;

        match manager.rebase(&worktree.path, &target)? {
            RebaseOutcome::Conflicted { files } => {
                if let Some(mut meta) = SandboxMeta::load(&worktree.path)? {
                    meta.state = SandboxState::Conflicted {
                        files: files.clone(),
                    };
                    meta.save(&worktree.path)?;
                }
                tracing::warn!(
                    branch = %branch,
                    target = %target,
                    conflicts = files.len(),
                    "merge conflicted, sandbox retained for remediation"
                );
                Ok(MergeOutcome::Conflicted { files })
            }
            RebaseOutcome::Clean => {
                manager.fast_forward(branch)?;

                if let Err(e) = self.runtime.down(&worktree.path).await {
                    tracing::warn!(error = %e, "teardown: failed to stop environment");
                }
                if let Err(e) = manager.remove(&worktree.path) {
                    tracing::warn!(error = %e, "teardown: failed to remove worktree");
                }
                if let Err(e) = manager.delete_branch(branch) {
                    tracing::warn!(error = %e, "teardown: failed to delete branch");
                }

                tracing::info!(branch = %branch, target = %target, "sandbox merged");
                Ok(MergeOutcome::Merged { target })
            }
        }
    }

    /// Stops the sandbox's environment; unless `container_only`, also
    /// removes the worktree and (best-effort) deletes the branch.
    pub async fn down(&self, dir: &Path, branch: &str, container_only: bool) -> Result<()> {
        let manager = WorktreeManager::discover(dir)?;
        let worktree = self.find_worktree(&manager, branch)?;

        if let Err(e) = self.runtime.down(&worktree.path).await {
            tracing::warn!(error = %e, "failed to stop environment, continuing");
        }

        if container_only {
            if let Some(mut meta) = SandboxMeta::load(&worktree.path)? {
                meta.state = SandboxState::Stopped;
                meta.save(&worktree.path)?;
            }
            tracing::info!(branch = %branch, "sandbox stopped, worktree retained");
            return Ok(());
        }

        manager.remove(&worktree.path)?;
        if let Err(e) = manager.delete_branch(branch) {
            tracing::warn!(error = %e, "failed to delete branch, may need manual cleanup");
        }

        tracing::info!(branch = %branch, "sandbox removed");
        Ok(())
    }

    /// Reclaims orphaned sandbox branches: branches carrying the sandbox
    /// prefix with no live worktree that are not the current branch. With
    /// `dry_run` nothing is deleted; the orphan set is reported either way.
    pub fn cleanup(&self, dir: &Path, dry_run: bool) -> Result<CleanupReport> {
        let manager = WorktreeManager::discover(dir)?;
        let live: HashSet<String> = manager
            .list()?
            .into_iter()
            .filter_map(|wt| wt.branch)
            .collect();
        let current = manager.current_branch()?;

        let orphaned: Vec<String> = manager
            .local_branches()?
            .into_iter()
            .filter(|b| b.starts_with(&self.config.branch_prefix))
            .filter(|b| !live.contains(b) && *b != current)
            .collect();

        let mut deleted = Vec::new();
        if !dry_run {
            for branch in &orphaned {
                match manager.delete_branch(branch) {
                    Ok(()) => deleted.push(branch.clone()),
                    Err(e) => {
                        tracing::warn!(branch = %branch, error = %e, "failed to delete orphan")
                    }
                }
            }
        }

        Ok(CleanupReport {
            orphaned_branches: orphaned,
            deleted_branches: deleted,
        })
    }

    /// Lists live sandboxes with their session histories. The root worktree
    /// and bare entries are excluded.
    pub fn list(&self, dir: &Path) -> Result<Vec<SandboxInfo>> {
        let manager = WorktreeManager::discover(dir)?;
        let root = canonical_or_raw(manager.root());

        let mut sandboxes = Vec::new();
        for wt in manager.list()? {
            if wt.is_bare || canonical_or_raw(&wt.path) == root {
                continue;
            }
            let meta = SandboxMeta::load(&wt.path)?;
            sandboxes.push(SandboxInfo {
                branch: wt.branch.unwrap_or_default(),
                worktree_path: wt.path,
                head: wt.head,
                state: meta
                    .as_ref()
                    .map(|m| m.state.clone())
                    .unwrap_or(SandboxState::Ready),
                sessions: meta.map(|m| m.sessions).unwrap_or_default(),
            });
        }
        Ok(sandboxes)
    }

    /// Starts the environment for a freshly created worktree: descriptor
    /// synthesis, metadata file, credential forwarding, container up.
    async fn start_environment(
        &self,
        path: &Path,
        branch: &str,
        progress: &dyn Progress,
    ) -> Result<ContainerHandle> {
        ensure_devcontainer_config(path)?;
        SandboxMeta::new(branch).save(path)?;
        let env = self.credentials().environment();
        self.runtime.up(path, &env, progress).await
    }

    fn credentials(&self) -> CredentialForwarder {
        CredentialForwarder::new(
            &self.config.credential_var,
            self.config.credential_helper.clone(),
        )
    }

    fn find_worktree(&self, manager: &WorktreeManager, branch: &str) -> Result<WorktreeInfo> {
        manager
            .list()?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch))
            .ok_or_else(|| Error::NotFound(format!("no sandbox worktree for branch {}", branch)))
    }

    fn generate_branch_name(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("{}{}-{}", self.config.branch_prefix, timestamp, id)
    }
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
