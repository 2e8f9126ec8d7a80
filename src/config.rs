//! Coordinator configuration.
//!
//! Loaded from an optional `.drydock/config.toml` at the repository root;
//! every field has a default so a repo with no config file works out of the
//! box. Validated before use to catch errors early.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the sandbox coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Prefix for auto-generated sandbox branch names. Also defines which
    /// branches `cleanup` considers reclaimable.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Base directory for sandbox worktrees. Defaults to a directory under
    /// the system temp dir.
    #[serde(default)]
    pub worktree_base: Option<PathBuf>,

    /// Command run inside the environment to execute an agent task. The task
    /// text and session flags are appended.
    #[serde(default = "default_agent_command")]
    pub agent_command: Vec<String>,

    /// Environment variable name for the forwarded host credential.
    #[serde(default = "default_credential_var")]
    pub credential_var: String,

    /// Optional helper command that prints the credential to stdout.
    #[serde(default = "default_credential_helper")]
    pub credential_helper: Option<Vec<String>>,

    /// Deadline for a single exec step, in seconds. `None` means no deadline.
    #[serde(default)]
    pub exec_timeout_secs: Option<u64>,
}

fn default_branch_prefix() -> String {
    "sandbox-".to_string()
}

fn default_agent_command() -> Vec<String> {
    vec![
        "claude".to_string(),
        "--print".to_string(),
        // The sandbox provides the isolation boundary.
        "--dangerously-skip-permissions".to_string(),
    ]
}

fn default_credential_var() -> String {
    "GH_TOKEN".to_string()
}

fn default_credential_helper() -> Option<Vec<String>> {
    Some(vec![
        "gh".to_string(),
        "auth".to_string(),
        "token".to_string(),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            worktree_base: None,
            agent_command: default_agent_command(),
            credential_var: default_credential_var(),
            credential_helper: default_credential_helper(),
            exec_timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads the config from `.drydock/config.toml` under `repo_root`, or
    /// the defaults if the file does not exist.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join(".drydock").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.branch_prefix.trim().is_empty() {
            errors.push("branch_prefix cannot be empty".to_string());
        }
        if self.agent_command.is_empty() {
            errors.push("agent_command cannot be empty".to_string());
        }
        if self.credential_var.trim().is_empty() {
            errors.push("credential_var cannot be empty".to_string());
        }
        if self.exec_timeout_secs == Some(0) {
            errors.push("exec_timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join("; ")))
        }
    }

    /// Returns the base directory for sandbox worktrees.
    pub fn worktree_base(&self) -> PathBuf {
        match &self.worktree_base {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("drydock-sandboxes"),
        }
    }

    /// Returns the exec deadline, if configured.
    pub fn exec_timeout(&self) -> Option<Duration> {
        self.exec_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.branch_prefix, "sandbox-");
        assert!(config.exec_timeout().is_none());
    }

    #[test]
    fn load_returns_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.branch_prefix, "sandbox-");
    }

    #[test]
    fn load_reads_overrides_from_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".drydock")).unwrap();
        std::fs::write(
            dir.path().join(".drydock/config.toml"),
            "branch_prefix = \"box/\"\nexec_timeout_secs = 600\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.branch_prefix, "box/");
        assert_eq!(config.exec_timeout(), Some(Duration::from_secs(600)));
        // Untouched fields keep their defaults.
        assert_eq!(config.credential_var, "GH_TOKEN");
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".drydock")).unwrap();
        std::fs::write(dir.path().join(".drydock/config.toml"), "not = [valid").unwrap();

        assert!(matches!(Config::load(dir.path()), Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let config = Config {
            branch_prefix: "".to_string(),
            agent_command: vec![],
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = Config {
            exec_timeout_secs: Some(0),
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
