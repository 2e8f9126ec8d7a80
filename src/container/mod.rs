//! Execution environment runtime.
//!
//! The coordinator talks to an isolated execution environment through the
//! [`ContainerRuntime`] trait; production uses the `devcontainer` CLI, tests
//! substitute a fake.

mod devcontainer;

pub use devcontainer::{ensure_devcontainer_config, DevcontainerCli};

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::progress::Progress;

/// Identifying info for a started environment instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Instance id assigned by the environment manager.
    pub container_id: String,
    /// User the environment runs commands as.
    pub remote_user: String,
    /// Workspace path as seen from inside the environment.
    pub remote_workspace_folder: String,
}

/// Result of executing a command inside a running environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit code of the command.
    pub exit_code: i32,
}

/// Starts, drives, and stops isolated execution environments bound to a
/// workspace directory.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts (or reuses) the environment for `workspace`, forwarding `env`.
    ///
    /// Must be idempotent: calling `up` on a running environment returns its
    /// handle without error.
    async fn up(
        &self,
        workspace: &Path,
        env: &HashMap<String, String>,
        progress: &dyn Progress,
    ) -> Result<ContainerHandle>;

    /// Runs a command inside the running environment, streaming output to
    /// `progress`. An optional deadline aborts the command with a timeout
    /// error.
    async fn exec(
        &self,
        workspace: &Path,
        command: &[String],
        env: &HashMap<String, String>,
        deadline: Option<Duration>,
        progress: &dyn Progress,
    ) -> Result<ExecOutcome>;

    /// Stops and removes the environment bound to `workspace`. Stopping an
    /// environment that is not running is not an error.
    async fn down(&self, workspace: &Path) -> Result<()>;
}
