//! Drydock - ephemeral sandboxes for autonomous coding agents
//!
//! This library pairs git worktrees on dedicated branches with isolated
//! execution environments, and keeps a dependency-aware ledger of the
//! orchestrations, tasks, and issues driving the work inside them.

pub mod config;
pub mod container;
pub mod error;
pub mod ledger;
pub mod progress;
pub mod sandbox;
pub mod secrets;
pub mod worktree;

pub use error::{Error, Result};

pub use config::Config;
pub use container::{
    ensure_devcontainer_config, ContainerHandle, ContainerRuntime, DevcontainerCli, ExecOutcome,
};
pub use ledger::{
    Issue, IssuePriority, IssueStatus, IssueUpdate, Ledger, NewIssue, NewTask, Orchestration,
    OrchestrationStatus, Task, TaskFilter, TaskStatus, TaskUpdate,
};
pub use progress::{NoProgress, Progress};
pub use sandbox::{
    CleanupReport, MergeOutcome, SandboxCoordinator, SandboxExec, SandboxInfo, SandboxMeta,
    SandboxState, SandboxUp, SessionRecord,
};
pub use secrets::CredentialForwarder;
pub use worktree::{RebaseOutcome, WorktreeInfo, WorktreeManager};
