//! Git worktree and branch management.
//!
//! Wraps the `git` binary for worktree allocation, porcelain enumeration,
//! rebase, and fast-forward merges. Content conflicts during rebase are
//! reported as data, not errors, so callers can remediate in place.

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// A single entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Path to the working directory.
    pub path: PathBuf,
    /// Checked-out branch, if any.
    pub branch: Option<String>,
    /// HEAD commit id, if any.
    pub head: Option<String>,
    /// Whether this is the bare repository entry.
    pub is_bare: bool,
    /// Whether HEAD is detached.
    pub is_detached: bool,
}

/// Outcome of a rebase attempt.
///
/// A content conflict leaves the repository in the mid-rebase state so the
/// caller can resolve and continue; it is never surfaced as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Rebase completed without conflicts.
    Clean,
    /// Rebase stopped on overlapping edits; the listed paths are unmerged.
    Conflicted { files: Vec<PathBuf> },
}

/// Manages worktrees and branches of a single repository.
pub struct WorktreeManager {
    /// Path to the repository root.
    repo_root: PathBuf,
}

impl WorktreeManager {
    /// Resolves the repository root containing `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let output = git_in(dir, &["rev-parse", "--show-toplevel"])?;
        let root = PathBuf::from(String::from_utf8_lossy(&output).trim());
        Ok(Self { repo_root: root })
    }

    /// Creates a manager for a known repository root.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Returns the repository root.
    pub fn root(&self) -> &Path {
        &self.repo_root
    }

    /// Creates a new branch from `base_ref` checked out in a worktree at `path`.
    ///
    /// After creation, the worktree's `.git` link file is rewritten to a
    /// gitdir path relative to the worktree itself, so the directory still
    /// resolves when mounted under a different filesystem root (e.g. inside
    /// a container where the host's absolute path does not exist).
    ///
    /// Fails if `branch` already exists or `base_ref` cannot be resolved.
    pub fn create(&self, path: &Path, branch: &str, base_ref: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.git(&[
            "worktree",
            "add",
            "-b",
            branch,
            &path.to_string_lossy(),
            base_ref,
        ])?;

        rewrite_gitdir_relative(path)?;

        tracing::info!(path = ?path, branch = %branch, base = %base_ref, "created worktree");
        Ok(())
    }

    /// Force-removes the worktree at `path`. A missing path is not an error.
    pub fn remove(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            tracing::debug!(path = ?path, "worktree path already gone");
            return Ok(());
        }

        self.git(&["worktree", "remove", "--force", &path.to_string_lossy()])?;
        tracing::info!(path = ?path, "removed worktree");
        Ok(())
    }

    /// Lists all worktrees of the repository, parsing porcelain output.
    pub fn list(&self) -> Result<Vec<WorktreeInfo>> {
        let output = self.git(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_porcelain(&String::from_utf8_lossy(&output)))
    }

    /// Deletes a local branch. Callers treat failure as best-effort.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.git(&["branch", "-D", branch])?;
        tracing::info!(branch = %branch, "deleted branch");
        Ok(())
    }

    /// Returns the branch currently checked out at the repository root.
    pub fn current_branch(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }

    /// Returns all local branch names.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let output = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])?;
        Ok(String::from_utf8_lossy(&output)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Replays the worktree's branch onto `onto`.
    ///
    /// On a content conflict the repository is left mid-rebase and the
    /// unmerged paths are returned. Any other failure aborts the rebase and
    /// raises a VCS error.
    pub fn rebase(&self, worktree_path: &Path, onto: &str) -> Result<RebaseOutcome> {
        let output = Command::new("git")
            .current_dir(worktree_path)
            .args(["rebase", onto])
            .output()?;

        if output.status.success() {
            return Ok(RebaseOutcome::Clean);
        }

        let files = self.conflicted_files(worktree_path)?;
        if !files.is_empty() {
            tracing::warn!(
                onto = %onto,
                conflicts = files.len(),
                "rebase stopped on conflicts"
            );
            return Ok(RebaseOutcome::Conflicted { files });
        }

        // Not a content conflict: abort so the worktree is usable again.
        let _ = Command::new("git")
            .current_dir(worktree_path)
            .args(["rebase", "--abort"])
            .output();

        Err(Error::Vcs(format!(
            "rebase onto {} failed: {}",
            onto,
            String::from_utf8_lossy(&output.stderr)
        )))
    }

    /// Merges `branch` into the currently checked-out branch, fast-forward only.
    pub fn fast_forward(&self, branch: &str) -> Result<()> {
        self.git(&["merge", "--ff-only", branch])?;
        tracing::info!(branch = %branch, "fast-forwarded current branch");
        Ok(())
    }

    /// Returns the unmerged paths in a worktree, if any.
    pub fn conflicted_files(&self, worktree_path: &Path) -> Result<Vec<PathBuf>> {
        let output = Command::new("git")
            .current_dir(worktree_path)
            .args(["diff", "--name-only", "--diff-filter=U"])
            .output()?;

        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "failed to list conflicted files: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Runs git at the repository root, mapping failure to a VCS error.
    fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        git_in(&self.repo_root, args)
    }
}

fn git_in(dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git").current_dir(dir).args(args).output()?;

    if !output.status.success() {
        return Err(Error::Vcs(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output.stdout)
}

/// Parses `git worktree list --porcelain` output.
fn parse_worktree_porcelain(output: &str) -> Vec<WorktreeInfo> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: None,
                head: None,
                is_bare: false,
                is_detached: false,
            });
        } else if let Some(entry) = current.as_mut() {
            if let Some(head) = line.strip_prefix("HEAD ") {
                entry.head = Some(head.to_string());
            } else if let Some(branch) = line.strip_prefix("branch ") {
                entry.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            } else if line == "bare" {
                entry.is_bare = true;
            } else if line == "detached" {
                entry.is_detached = true;
            }
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }

    entries
}

/// Rewrites a worktree's `.git` link file to use a relative gitdir path.
fn rewrite_gitdir_relative(worktree_path: &Path) -> Result<()> {
    let link_file = worktree_path.join(".git");
    let contents = std::fs::read_to_string(&link_file)?;

    let gitdir = contents
        .trim()
        .strip_prefix("gitdir:")
        .map(str::trim)
        .ok_or_else(|| Error::Vcs(format!("malformed .git link file at {:?}", link_file)))?;

    let gitdir = PathBuf::from(gitdir);
    if gitdir.is_relative() {
        return Ok(());
    }

    // Canonicalize both sides so symlinked temp dirs compare correctly.
    let gitdir = gitdir.canonicalize()?;
    let base = worktree_path.canonicalize()?;
    let relative = relative_path(&base, &gitdir);

    std::fs::write(&link_file, format!("gitdir: {}\n", relative.display()))?;
    tracing::debug!(path = ?worktree_path, gitdir = %relative.display(), "rewrote gitdir link");
    Ok(())
}

/// Computes a relative path from `base` to `target` (both absolute).
fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..base_parts.len() {
        result.push("..");
    }
    for part in &target_parts[common..] {
        result.push(part.as_os_str());
    }

    if result.as_os_str().is_empty() {
        result.push(".");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Helper to create a temp git repo for testing.
    fn create_temp_git_repo() -> TempDir {
        let temp_dir = TempDir::new().expect("failed to create temp dir");

        Command::new("git")
            .current_dir(temp_dir.path())
            .args(["init", "-b", "main"])
            .output()
            .expect("failed to init git repo");

        Command::new("git")
            .current_dir(temp_dir.path())
            .args(["config", "user.email", "test@test.com"])
            .output()
            .expect("failed to config git email");

        Command::new("git")
            .current_dir(temp_dir.path())
            .args(["config", "user.name", "Test User"])
            .output()
            .expect("failed to config git name");

        std::fs::write(temp_dir.path().join("README.md"), "# Test Repo\n")
            .expect("failed to write README");

        commit_all(temp_dir.path(), "Initial commit");

        temp_dir
    }

    fn commit_all(dir: &Path, message: &str) {
        Command::new("git")
            .current_dir(dir)
            .args(["add", "-A"])
            .output()
            .expect("failed to add files");

        Command::new("git")
            .current_dir(dir)
            .args(["commit", "-m", message])
            .output()
            .expect("failed to commit");
    }

    fn head_of(dir: &Path) -> String {
        let output = Command::new("git")
            .current_dir(dir)
            .args(["rev-parse", "HEAD"])
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[test]
    fn discover_resolves_repo_root_from_subdir() {
        let repo = create_temp_git_repo();
        let subdir = repo.path().join("nested/dir");
        std::fs::create_dir_all(&subdir).unwrap();

        let manager = WorktreeManager::discover(&subdir).expect("discover failed");

        assert_eq!(
            manager.root().canonicalize().unwrap(),
            repo.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn create_allocates_branch_and_worktree() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("sandbox-a");
        manager.create(&path, "sandbox-a", "main").expect("create failed");

        assert!(path.join("README.md").exists());
        assert!(manager.local_branches().unwrap().contains(&"sandbox-a".to_string()));
    }

    #[test]
    fn create_rewrites_gitdir_to_relative_path() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("sandbox-rel");
        manager.create(&path, "sandbox-rel", "main").unwrap();

        let link = std::fs::read_to_string(path.join(".git")).unwrap();
        let gitdir = link.trim().strip_prefix("gitdir:").unwrap().trim();
        assert!(
            PathBuf::from(gitdir).is_relative(),
            "gitdir should be relative, got {}",
            gitdir
        );

        // Git must still resolve the worktree after the rewrite.
        let status = Command::new("git")
            .current_dir(&path)
            .args(["status", "--porcelain"])
            .output()
            .unwrap();
        assert!(status.status.success());
    }

    #[test]
    fn create_fails_for_existing_branch() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        manager
            .create(&wt_dir.path().join("a"), "dup-branch", "main")
            .unwrap();
        let result = manager.create(&wt_dir.path().join("b"), "dup-branch", "main");

        assert!(matches!(result, Err(Error::Vcs(_))));
    }

    #[test]
    fn create_fails_for_unresolvable_base() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let result = manager.create(&wt_dir.path().join("x"), "no-base", "no-such-ref");

        assert!(matches!(result, Err(Error::Vcs(_))));
    }

    #[test]
    fn remove_tolerates_missing_path() {
        let repo = create_temp_git_repo();
        let manager = WorktreeManager::new(repo.path());

        manager
            .remove(Path::new("/nonexistent/worktree/path"))
            .expect("remove of missing path should succeed");
    }

    #[test]
    fn remove_detaches_existing_worktree() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("gone");
        manager.create(&path, "gone-branch", "main").unwrap();
        manager.remove(&path).expect("remove failed");

        assert!(!path.exists());
    }

    #[test]
    fn list_parses_root_and_linked_worktrees() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        manager
            .create(&wt_dir.path().join("linked"), "linked-branch", "main")
            .unwrap();

        let entries = manager.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert!(entries[0].head.is_some());
        assert_eq!(entries[1].branch.as_deref(), Some("linked-branch"));
        assert!(!entries[1].is_bare);
        assert!(!entries[1].is_detached);
    }

    #[test]
    fn porcelain_parser_handles_bare_and_detached() {
        let output = "worktree /repo\nbare\n\nworktree /wt\nHEAD abc123\ndetached\n";
        let entries = parse_worktree_porcelain(output);

        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_bare);
        assert!(entries[1].is_detached);
        assert_eq!(entries[1].head.as_deref(), Some("abc123"));
        assert_eq!(entries[1].branch, None);
    }

    #[test]
    fn rebase_replays_cleanly_onto_advanced_base() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("feature");
        manager.create(&path, "feature", "main").unwrap();

        // Non-overlapping edits on both sides.
        std::fs::write(path.join("feature.txt"), "feature\n").unwrap();
        commit_all(&path, "Add feature file");
        std::fs::write(repo.path().join("main.txt"), "main\n").unwrap();
        commit_all(repo.path(), "Advance main");

        let outcome = manager.rebase(&path, "main").unwrap();
        assert_eq!(outcome, RebaseOutcome::Clean);
    }

    #[test]
    fn rebase_reports_conflicted_files_and_leaves_state() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        std::fs::write(repo.path().join("shared.txt"), "base\n").unwrap();
        commit_all(repo.path(), "Add shared");

        let path = wt_dir.path().join("conflicting");
        manager.create(&path, "conflicting", "main").unwrap();

        std::fs::write(path.join("shared.txt"), "sandbox edit\n").unwrap();
        commit_all(&path, "Sandbox edit");
        std::fs::write(repo.path().join("shared.txt"), "main edit\n").unwrap();
        commit_all(repo.path(), "Main edit");

        let outcome = manager.rebase(&path, "main").unwrap();
        assert_eq!(
            outcome,
            RebaseOutcome::Conflicted {
                files: vec![PathBuf::from("shared.txt")]
            }
        );

        // Mid-rebase state is preserved for remediation.
        assert!(!manager.conflicted_files(&path).unwrap().is_empty());

        // Clean up the rebase so the temp dirs can be dropped.
        let _ = Command::new("git")
            .current_dir(&path)
            .args(["rebase", "--abort"])
            .output();
    }

    #[test]
    fn rebase_onto_missing_ref_is_a_vcs_error() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("bad-rebase");
        manager.create(&path, "bad-rebase", "main").unwrap();

        let result = manager.rebase(&path, "no-such-branch");
        assert!(matches!(result, Err(Error::Vcs(_))));
    }

    #[test]
    fn fast_forward_advances_current_branch() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("ff");
        manager.create(&path, "ff-branch", "main").unwrap();
        std::fs::write(path.join("new.txt"), "new\n").unwrap();
        commit_all(&path, "Sandbox commit");

        let branch_head = head_of(&path);
        manager.fast_forward("ff-branch").unwrap();

        assert_eq!(head_of(repo.path()), branch_head);
    }

    #[test]
    fn fast_forward_fails_on_divergent_history() {
        let repo = create_temp_git_repo();
        let wt_dir = TempDir::new().unwrap();
        let manager = WorktreeManager::new(repo.path());

        let path = wt_dir.path().join("diverged");
        manager.create(&path, "diverged", "main").unwrap();
        std::fs::write(path.join("a.txt"), "a\n").unwrap();
        commit_all(&path, "Sandbox commit");
        std::fs::write(repo.path().join("b.txt"), "b\n").unwrap();
        commit_all(repo.path(), "Main commit");

        let result = manager.fast_forward("diverged");
        assert!(matches!(result, Err(Error::Vcs(_))));
    }

    #[test]
    fn current_branch_reports_checked_out_branch() {
        let repo = create_temp_git_repo();
        let manager = WorktreeManager::new(repo.path());

        assert_eq!(manager.current_branch().unwrap(), "main");
    }

    #[test]
    fn delete_branch_removes_local_branch() {
        let repo = create_temp_git_repo();
        let manager = WorktreeManager::new(repo.path());

        Command::new("git")
            .current_dir(repo.path())
            .args(["branch", "doomed"])
            .output()
            .unwrap();

        manager.delete_branch("doomed").unwrap();
        assert!(!manager.local_branches().unwrap().contains(&"doomed".to_string()));

        // Deleting again fails; callers swallow this.
        assert!(manager.delete_branch("doomed").is_err());
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        let rel = relative_path(Path::new("/a/b/c"), Path::new("/a/x/y"));
        assert_eq!(rel, PathBuf::from("../../x/y"));

        let rel = relative_path(Path::new("/a/b"), Path::new("/a/b/c/d"));
        assert_eq!(rel, PathBuf::from("c/d"));

        let rel = relative_path(Path::new("/a/b"), Path::new("/a/b"));
        assert_eq!(rel, PathBuf::from("."));
    }
}
