//! Dev container CLI runtime.
//!
//! Drives the `devcontainer` CLI for environment lifecycle and `docker` for
//! label-matched teardown. `devcontainer up` emits JSON lines culminating in
//! an outcome record carrying the container id, remote user, and remote
//! workspace folder.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::progress::Progress;

use super::{ContainerHandle, ContainerRuntime, ExecOutcome};

/// Minimal environment descriptor synthesized when a workspace has none.
const DEFAULT_DEVCONTAINER: &str = r#"{
  "name": "drydock-sandbox",
  "image": "mcr.microsoft.com/devcontainers/base:ubuntu"
}
"#;

/// Ensures a workspace has a dev container descriptor.
///
/// Returns `true` if a minimal default was written, `false` if one already
/// existed.
pub fn ensure_devcontainer_config(workspace: &Path) -> Result<bool> {
    let nested = workspace.join(".devcontainer").join("devcontainer.json");
    let flat = workspace.join(".devcontainer.json");
    if nested.exists() || flat.exists() {
        return Ok(false);
    }

    std::fs::create_dir_all(workspace.join(".devcontainer"))?;
    std::fs::write(&nested, DEFAULT_DEVCONTAINER)?;
    tracing::info!(path = ?nested, "synthesized default devcontainer config");
    Ok(true)
}

/// Runtime backed by the `devcontainer` CLI.
pub struct DevcontainerCli {
    /// Path to the devcontainer CLI binary.
    cli_path: String,
    /// Path to the docker binary, used for teardown by label.
    docker_path: String,
}

impl Default for DevcontainerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DevcontainerCli {
    /// Creates a runtime using the default `devcontainer` and `docker` commands.
    pub fn new() -> Self {
        Self {
            cli_path: "devcontainer".to_string(),
            docker_path: "docker".to_string(),
        }
    }

    /// Creates a runtime with custom binary paths.
    pub fn with_paths(cli_path: impl Into<String>, docker_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
            docker_path: docker_path.into(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DevcontainerCli {
    async fn up(
        &self,
        workspace: &Path,
        env: &HashMap<String, String>,
        progress: &dyn Progress,
    ) -> Result<ContainerHandle> {
        tracing::info!(workspace = ?workspace, "starting dev container");

        let mut child = Command::new(&self.cli_path)
            .args(["up", "--workspace-folder"])
            .arg(workspace)
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::EnvironmentStart(format!("failed to spawn devcontainer: {}", e)))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        // The outcome record is the last parseable JSON line with an
        // "outcome" field. The last stderr line is kept for diagnostics when
        // the CLI dies without one.
        let mut outcome: Option<Value> = None;
        let mut last_stderr: Option<String> = None;
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout_reader.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => {
                        progress.on_output(&line);
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            if value.get("outcome").is_some() {
                                outcome = Some(value);
                            }
                        }
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        tracing::error!(error = %e, "error reading devcontainer stdout");
                        stdout_done = true;
                    }
                },
                line = stderr_reader.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            last_stderr = Some(line.clone());
                        }
                        progress.on_output(&line);
                    }
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        tracing::error!(error = %e, "error reading devcontainer stderr");
                        stderr_done = true;
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::EnvironmentStart(format!("devcontainer up: {}", e)))?;

        let outcome = match outcome {
            Some(value) => value,
            None => {
                return Err(Error::EnvironmentStart(format!(
                    "devcontainer up produced no outcome record: {}",
                    last_stderr.unwrap_or_else(|| "no stderr output".to_string())
                )))
            }
        };

        if !status.success() || outcome.get("outcome").and_then(Value::as_str) != Some("success") {
            let message = outcome
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown failure");
            return Err(Error::EnvironmentStart(format!(
                "devcontainer up failed: {}",
                message
            )));
        }

        let field = |name: &str| {
            outcome
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::EnvironmentStart(format!("outcome record missing {}", name))
                })
        };

        let handle = ContainerHandle {
            container_id: field("containerId")?,
            remote_user: field("remoteUser")?,
            remote_workspace_folder: field("remoteWorkspaceFolder")?,
        };

        tracing::info!(container = %handle.container_id, "dev container up");
        Ok(handle)
    }

    async fn exec(
        &self,
        workspace: &Path,
        command: &[String],
        env: &HashMap<String, String>,
        deadline: Option<Duration>,
        progress: &dyn Progress,
    ) -> Result<ExecOutcome> {
        let mut cmd = Command::new(&self.cli_path);
        cmd.args(["exec", "--workspace-folder"]).arg(workspace);
        for (key, value) in env {
            cmd.arg("--remote-env").arg(format!("{}={}", key, value));
        }
        cmd.args(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            // A command that outlives its deadline must not keep running.
            .kill_on_drop(true);

        tracing::info!(workspace = ?workspace, "executing command in dev container");

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Environment(format!("failed to spawn devcontainer exec: {}", e)))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stream = async {
            let mut stdout_reader = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr).lines();
            let mut stdout_done = false;
            let mut stderr_done = false;

            while !(stdout_done && stderr_done) {
                tokio::select! {
                    line = stdout_reader.next_line(), if !stdout_done => match line {
                        Ok(Some(line)) => progress.on_output(&line),
                        Ok(None) => stdout_done = true,
                        Err(e) => {
                            tracing::error!(error = %e, "error reading exec stdout");
                            stdout_done = true;
                        }
                    },
                    line = stderr_reader.next_line(), if !stderr_done => match line {
                        Ok(Some(line)) => progress.on_output(&line),
                        Ok(None) => stderr_done = true,
                        Err(e) => {
                            tracing::error!(error = %e, "error reading exec stderr");
                            stderr_done = true;
                        }
                    },
                }
            }

            child.wait().await
        };

        let status = match deadline {
            Some(limit) => match tokio::time::timeout(limit, stream).await {
                Ok(status) => {
                    status.map_err(|e| Error::Environment(format!("devcontainer exec: {}", e)))?
                }
                Err(_) => {
                    tracing::warn!(
                        workspace = ?workspace,
                        limit_secs = limit.as_secs(),
                        "exec deadline exceeded, killing command"
                    );
                    return Err(Error::ExecTimeout(limit.as_secs()));
                }
            },
            None => stream
                .await
                .map_err(|e| Error::Environment(format!("devcontainer exec: {}", e)))?,
        };

        Ok(ExecOutcome {
            exit_code: status.code().unwrap_or(-1),
        })
    }

    async fn down(&self, workspace: &Path) -> Result<()> {
        // Dev containers carry their workspace path as a docker label; match
        // on it to find the instance(s) to remove.
        let folder = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());
        let label = format!("label=devcontainer.local_folder={}", folder.display());

        let ps = Command::new(&self.docker_path)
            .args(["ps", "-aq", "--filter", &label])
            .output()
            .await
            .map_err(|e| Error::Environment(format!("failed to run docker ps: {}", e)))?;

        if !ps.status.success() {
            return Err(Error::Environment(format!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&ps.stderr)
            )));
        }

        let ids: Vec<String> = String::from_utf8_lossy(&ps.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if ids.is_empty() {
            tracing::debug!(workspace = ?workspace, "no container to stop");
            return Ok(());
        }

        for id in &ids {
            let rm = Command::new(&self.docker_path)
                .args(["rm", "-f", id])
                .output()
                .await
                .map_err(|e| Error::Environment(format!("failed to run docker rm: {}", e)))?;

            if !rm.status.success() {
                return Err(Error::Environment(format!(
                    "docker rm {} failed: {}",
                    id,
                    String::from_utf8_lossy(&rm.stderr)
                )));
            }
        }

        tracing::info!(workspace = ?workspace, containers = ids.len(), "dev container down");
        Ok(())
    }
}
