//! Per-sandbox metadata persisted inside the worktree.
//!
//! Saved to `.drydock/sandbox.json` so the session log and the explicit
//! lifecycle state survive process restarts and travel with the worktree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Explicit lifecycle state of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxState {
    /// Environment started (or startable); work can proceed.
    Ready,
    /// Environment stopped, worktree and branch retained.
    Stopped,
    /// A merge attempt hit overlapping edits; the worktree holds the
    /// mid-rebase state for remediation.
    Conflicted { files: Vec<PathBuf> },
}

/// One entry in the append-only session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Agent session id (caller-supplied or generated).
    pub session_id: String,
    /// When the session entry was recorded.
    pub created_at: DateTime<Utc>,
    /// The task text given to the agent.
    pub task: String,
}

/// Metadata for one sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxMeta {
    /// Branch bound to this sandbox.
    pub branch: String,
    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: SandboxState,
    /// Append-only session log.
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

impl SandboxMeta {
    /// Creates fresh metadata for a just-provisioned sandbox.
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            created_at: Utc::now(),
            state: SandboxState::Ready,
            sessions: Vec::new(),
        }
    }

    /// Metadata file path within a worktree.
    pub fn file_path(worktree: &Path) -> PathBuf {
        worktree.join(".drydock").join("sandbox.json")
    }

    /// Loads metadata from a worktree. Returns `None` when the file does not
    /// exist (e.g. a worktree created outside the coordinator).
    pub fn load(worktree: &Path) -> Result<Option<Self>> {
        let path = Self::file_path(worktree);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let meta = serde_json::from_str(&contents).map_err(|e| Error::StoreCorruption {
            path,
            reason: e.to_string(),
        })?;
        Ok(Some(meta))
    }

    /// Saves metadata into the worktree.
    pub fn save(&self, worktree: &Path) -> Result<()> {
        let path = Self::file_path(worktree);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            // Agents routinely stage everything; metadata must stay out of
            // branch history or later writes dirty the tree mid-rebase.
            let ignore = parent.join(".gitignore");
            if !ignore.exists() {
                std::fs::write(&ignore, "*\n")?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::StoreCorruption {
            path: path.clone(),
            reason: format!("serialize: {}", e),
        })?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Appends a session record to the log.
    pub fn append_session(&mut self, record: SessionRecord) {
        self.sessions.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut meta = SandboxMeta::new("sandbox-1");
        meta.append_session(SessionRecord {
            session_id: "s1".to_string(),
            created_at: Utc::now(),
            task: "fix the bug".to_string(),
        });

        meta.save(dir.path()).unwrap();
        let loaded = SandboxMeta::load(dir.path()).unwrap().expect("meta exists");

        assert_eq!(loaded.branch, "sandbox-1");
        assert_eq!(loaded.state, SandboxState::Ready);
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.sessions[0].task, "fix the bug");
    }

    #[test]
    fn load_returns_none_when_missing() {
        let dir = TempDir::new().unwrap();
        assert!(SandboxMeta::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn save_keeps_metadata_directory_ignored() {
        let dir = TempDir::new().unwrap();
        SandboxMeta::new("sandbox-1").save(dir.path()).unwrap();

        let ignore = dir.path().join(".drydock/.gitignore");
        assert_eq!(std::fs::read_to_string(ignore).unwrap(), "*\n");
    }

    #[test]
    fn conflicted_state_serializes_with_files() {
        let mut meta = SandboxMeta::new("sandbox-2");
        meta.state = SandboxState::Conflicted {
            files: vec![PathBuf::from("src/lib.rs")],
        };

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"conflicted\""));
        assert!(json.contains("src/lib.rs"));

        let back: SandboxMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, meta.state);
    }

    #[test]
    fn session_log_is_append_only_in_order() {
        let mut meta = SandboxMeta::new("sandbox-3");
        for i in 0..3 {
            meta.append_session(SessionRecord {
                session_id: format!("s{}", i),
                created_at: Utc::now(),
                task: format!("task {}", i),
            });
        }

        let ids: Vec<&str> = meta.sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s0", "s1", "s2"]);
    }
}
